//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! This crate is the device and presentation collaborator of the frame core:
//! - [`backend`]: the `GpuDevice` and `PresentSurface` traits
//! - [`device`], [`swapchain`], [`instance`], [`physical_device`]: the ash implementation
//! - [`headless`]: a recording implementation for tests and GPU-less runs
//! - [`descriptor`] and [`command`]: layout, pool sizing and recording helpers

mod error;

pub mod backend;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod headless;
pub mod instance;
pub mod physical_device;
pub mod swapchain;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
