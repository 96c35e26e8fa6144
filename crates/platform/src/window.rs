//! Window creation via winit.

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, RawDisplayHandle};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::{Window as WinitWindow, WindowAttributes};

use inflight_core::config::WindowConfig;
use inflight_core::{Error, Result};

use crate::surface::{Surface, required_extensions};

/// A resizable window. The size is always read back from winit, so it
/// reflects the latest resize even before the event is handled.
pub struct Window {
    window: Arc<WinitWindow>,
}

impl Window {
    pub fn new(event_loop: &ActiveEventLoop, config: &WindowConfig) -> Result<Self> {
        let attributes = WindowAttributes::default()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .with_resizable(true);

        let window = event_loop
            .create_window(attributes)
            .map_err(|e| Error::Window(e.to_string()))?;

        tracing::info!(title = %config.title, width = config.width, height = config.height, "window opened");

        Ok(Self {
            window: Arc::new(window),
        })
    }

    pub fn inner(&self) -> &WinitWindow {
        &self.window
    }

    /// Current inner size in physical pixels.
    pub fn size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    /// Zero-sized windows cannot be presented to.
    pub fn is_minimized(&self) -> bool {
        let (width, height) = self.size();
        width == 0 || height == 0
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    pub fn raw_display_handle(&self) -> Result<RawDisplayHandle> {
        self.window
            .display_handle()
            .map(|handle| handle.as_raw())
            .map_err(|e| Error::Window(format!("display handle unavailable: {e}")))
    }

    /// Instance extensions required for [`Window::create_surface`].
    pub fn required_extensions(&self) -> Result<Vec<*const std::ffi::c_char>> {
        required_extensions(self.raw_display_handle()?)
    }

    pub fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<Surface> {
        Surface::new(entry, instance, self.window.as_ref())
    }
}
