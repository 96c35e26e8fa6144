//! Core utilities shared by every inflight crate.
//!
//! This crate provides:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Engine configuration loaded from TOML

pub mod config;
mod error;
mod logging;
mod timer;

pub use config::{DescriptorKind, EngineConfig, PresentModePreference};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::{FrameReport, FrameStats, Timer};
