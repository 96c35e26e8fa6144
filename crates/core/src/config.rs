//! Engine configuration, loaded from `inflight.toml`.
//!
//! Every section and field has a default, so a partial file (or no file at
//! all) yields a usable configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "INFLIGHT_CONFIG";

/// File used when [`CONFIG_ENV_VAR`] is not set.
pub const DEFAULT_CONFIG_PATH: &str = "inflight.toml";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub frames: FrameConfig,
    #[serde(default)]
    pub descriptors: DescriptorConfig,
    #[serde(default)]
    pub vulkan: VulkanConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

/// Frame-overlap scheduling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameConfig {
    /// Number of frame slots the CPU may run ahead of the GPU.
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
    /// Bound on the per-slot completion fence wait. Exceeding it is fatal.
    #[serde(default = "default_timeout_ms")]
    pub fence_timeout_ms: u64,
    /// Bound on presentable image acquisition.
    #[serde(default = "default_timeout_ms")]
    pub acquire_timeout_ms: u64,
}

/// Growable descriptor allocator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Set capacity of the first pool.
    #[serde(default = "default_initial_sets")]
    pub initial_sets: u32,
    #[serde(default = "default_growth_factor")]
    pub growth_factor: f32,
    /// Hard ceiling on a single pool's set capacity.
    #[serde(default = "default_max_sets_per_pool")]
    pub max_sets_per_pool: u32,
    #[serde(default = "default_ratios")]
    pub ratios: Vec<RatioEntry>,
}

/// Relative quantity of one descriptor kind per set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatioEntry {
    pub kind: DescriptorKind,
    pub ratio: f32,
}

/// Descriptor kinds that may appear in the pool ratio table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptorKind {
    Sampler,
    CombinedImageSampler,
    SampledImage,
    StorageImage,
    UniformBuffer,
    StorageBuffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulkanConfig {
    /// Enable validation layers (only honored when they are installed).
    #[serde(default = "default_validation")]
    pub validation: bool,
    #[serde(default)]
    pub present_mode: PresentModePreference,
}

/// Preferred presentation mode. FIFO is always available and is the fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModePreference {
    #[default]
    Fifo,
    Mailbox,
    Immediate,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: default_frames_in_flight(),
            fence_timeout_ms: default_timeout_ms(),
            acquire_timeout_ms: default_timeout_ms(),
        }
    }
}

impl FrameConfig {
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    pub fn acquire_timeout_ns(&self) -> u64 {
        self.acquire_timeout_ms.saturating_mul(1_000_000)
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            initial_sets: default_initial_sets(),
            growth_factor: default_growth_factor(),
            max_sets_per_pool: default_max_sets_per_pool(),
            ratios: default_ratios(),
        }
    }
}

impl Default for VulkanConfig {
    fn default() -> Self {
        Self {
            validation: default_validation(),
            present_mode: PresentModePreference::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from file if it exists, otherwise return defaults.
    ///
    /// A file that exists but fails to parse or validate is reported as an
    /// error rather than silently replaced.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let config = Self::load(path)?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve the config path from `INFLIGHT_CONFIG`, falling back to
    /// `inflight.toml` in the working directory.
    pub fn default_path() -> String {
        std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let frames = &self.frames;
        if !(1..=4).contains(&frames.frames_in_flight) {
            return Err(Error::Config(format!(
                "frames.frames_in_flight must be in 1..=4, got {}",
                frames.frames_in_flight
            )));
        }
        if frames.fence_timeout_ms == 0 || frames.acquire_timeout_ms == 0 {
            return Err(Error::Config("frame timeouts must be non-zero".into()));
        }

        let descriptors = &self.descriptors;
        if descriptors.initial_sets == 0 {
            return Err(Error::Config("descriptors.initial_sets must be > 0".into()));
        }
        if descriptors.max_sets_per_pool < descriptors.initial_sets {
            return Err(Error::Config(format!(
                "descriptors.max_sets_per_pool ({}) is below initial_sets ({})",
                descriptors.max_sets_per_pool, descriptors.initial_sets
            )));
        }
        if !descriptors.growth_factor.is_finite() || descriptors.growth_factor < 1.0 {
            return Err(Error::Config(format!(
                "descriptors.growth_factor must be >= 1.0, got {}",
                descriptors.growth_factor
            )));
        }
        if descriptors.ratios.is_empty() {
            return Err(Error::Config("descriptors.ratios must not be empty".into()));
        }
        if let Some(bad) = descriptors
            .ratios
            .iter()
            .find(|entry| !entry.ratio.is_finite() || entry.ratio <= 0.0)
        {
            return Err(Error::Config(format!(
                "descriptor ratio for {:?} must be positive, got {}",
                bad.kind, bad.ratio
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(Error::Config("window size must be non-zero".into()));
        }

        Ok(())
    }
}

fn default_width() -> u32 {
    1700
}

fn default_height() -> u32 {
    900
}

fn default_title() -> String {
    "inflight".to_string()
}

fn default_frames_in_flight() -> usize {
    2
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_initial_sets() -> u32 {
    10
}

fn default_growth_factor() -> f32 {
    1.5
}

fn default_max_sets_per_pool() -> u32 {
    4092
}

fn default_ratios() -> Vec<RatioEntry> {
    vec![RatioEntry {
        kind: DescriptorKind::StorageImage,
        ratio: 1.0,
    }]
}

fn default_validation() -> bool {
    cfg!(debug_assertions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames.frames_in_flight, 2);
        assert_eq!(config.frames.fence_timeout_ns(), 1_000_000_000);
        assert_eq!(config.descriptors.initial_sets, 10);
        assert_eq!(config.descriptors.max_sets_per_pool, 4092);
        assert_eq!(config.descriptors.ratios.len(), 1);
        assert_eq!(config.descriptors.ratios[0].kind, DescriptorKind::StorageImage);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            [window]
            title = "demo"

            [vulkan]
            present_mode = "mailbox"
            "#,
        )
        .expect("valid config");

        assert_eq!(config.window.title, "demo");
        assert_eq!(config.window.width, 1700);
        assert_eq!(config.vulkan.present_mode, PresentModePreference::Mailbox);
        assert_eq!(config.frames, FrameConfig::default());
    }

    #[test]
    fn test_ratio_table_parses() {
        let config = EngineConfig::from_toml_str(
            r#"
            [descriptors]
            initial_sets = 4
            ratios = [
                { kind = "storage_image", ratio = 3.0 },
                { kind = "uniform_buffer", ratio = 0.5 },
            ]
            "#,
        )
        .expect("valid config");

        assert_eq!(config.descriptors.initial_sets, 4);
        assert_eq!(config.descriptors.ratios[1].kind, DescriptorKind::UniformBuffer);
        assert!((config.descriptors.ratios[1].ratio - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let cases = [
            "[frames]\nframes_in_flight = 0",
            "[frames]\nframes_in_flight = 5",
            "[frames]\nfence_timeout_ms = 0",
            "[descriptors]\ninitial_sets = 0",
            "[descriptors]\ngrowth_factor = 0.5",
            "[descriptors]\ninitial_sets = 20\nmax_sets_per_pool = 10",
            "[descriptors]\nratios = []",
            "[descriptors]\nratios = [{ kind = \"sampler\", ratio = -1.0 }]",
        ];

        for case in cases {
            let result = EngineConfig::from_toml_str(case);
            assert!(
                matches!(result, Err(Error::Config(_))),
                "expected config error for {case:?}"
            );
        }
    }

    #[test]
    fn test_parse_error_is_config_error() {
        let result = EngineConfig::from_toml_str("[frames\nbroken");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = EngineConfig::load_or_default("/nonexistent/inflight.toml")
            .expect("defaults for missing file");
        assert_eq!(config, EngineConfig::default());
    }
}
