//! Windowing and Vulkan surface plumbing.
//!
//! - Window creation via winit, sized from [`inflight_core::config::WindowConfig`]
//! - RAII [`Surface`] built from raw window handles
//! - The instance extensions a surface needs on the current platform

mod surface;
mod window;

pub use surface::{Surface, required_extensions};
pub use window::Window;
