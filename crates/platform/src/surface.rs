//! Vulkan surface ownership.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{CStr, c_char};
use tracing::debug;

use inflight_core::{Error, Result};

/// Owns a `vk::SurfaceKHR` and destroys it on drop.
///
/// The instance that created it must outlive this value.
pub struct Surface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

impl Surface {
    /// Creates a surface for any window exposing raw handles.
    pub fn new<W>(entry: &ash::Entry, instance: &ash::Instance, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| Error::Window(format!("display handle unavailable: {e}")))?;
        let handle = window
            .window_handle()
            .map_err(|e| Error::Window(format!("window handle unavailable: {e}")))?;

        // SAFETY: both raw handles come from a live window, and the returned
        // surface is destroyed in `Drop` before the instance goes away.
        let surface = unsafe {
            ash_window::create_surface(entry, instance, display.as_raw(), handle.as_raw(), None)
        }
        .map_err(|e| Error::Surface(format!("surface creation failed: {e}")))?;

        debug!(surface = ?surface, "surface created");

        Ok(Self {
            handle: surface,
            loader: ash::khr::surface::Instance::new(entry, instance),
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Loader for capability, format and present mode queries.
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance {
        &self.loader
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // SAFETY: the handle was created by `ash_window::create_surface` from
        // the same instance as the loader and is destroyed only here.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
        debug!("surface destroyed");
    }
}

/// Instance extensions needed to create a surface on this display.
///
/// The pointers reference static strings owned by `ash_window`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>> {
    let extensions = ash_window::enumerate_required_extensions(display)
        .map_err(|e| Error::Surface(format!("surface extensions unavailable: {e}")))?;

    // SAFETY: ash_window returns pointers to static, nul-terminated names.
    let names: Vec<&CStr> = extensions.iter().map(|&name| unsafe { CStr::from_ptr(name) }).collect();
    debug!(?names, "surface extensions required");

    Ok(extensions.to_vec())
}
