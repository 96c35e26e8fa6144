//! Growable descriptor set allocator.
//!
//! Descriptor pools cannot shrink or cheaply free individual sets, so the
//! allocator keeps a list of pools instead of one large pool:
//!
//! - `ready` pools are available for allocation
//! - `exhausted` pools reported `OUT_OF_POOL_MEMORY` or `FRAGMENTED_POOL`
//!   since the last [`clear_pools`](DescriptorAllocatorGrowable::clear_pools)
//!
//! Each new pool is `growth_factor` times larger than the previous one, up
//! to `max_sets_per_pool`. A failed allocation retires the pool and retries
//! exactly once on a fresh one; a second failure is fatal.

use ash::vk;
use inflight_core::DescriptorKind;
use inflight_core::config::DescriptorConfig;
use inflight_rhi::backend::GpuDevice;
use inflight_rhi::descriptor::{PoolSizeRatio, pool_sizes};
use inflight_rhi::{RhiError, RhiResult};
use tracing::{debug, error, warn};

/// Immutable allocator settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorAllocatorConfig {
    pub initial_sets: u32,
    pub growth_factor: f32,
    pub max_sets_per_pool: u32,
    pub ratios: Vec<PoolSizeRatio>,
}

impl Default for DescriptorAllocatorConfig {
    fn default() -> Self {
        Self::from(&DescriptorConfig::default())
    }
}

impl From<&DescriptorConfig> for DescriptorAllocatorConfig {
    fn from(config: &DescriptorConfig) -> Self {
        Self {
            initial_sets: config.initial_sets,
            growth_factor: config.growth_factor,
            max_sets_per_pool: config.max_sets_per_pool,
            ratios: config
                .ratios
                .iter()
                .map(|entry| PoolSizeRatio {
                    ty: descriptor_type(entry.kind),
                    ratio: entry.ratio,
                })
                .collect(),
        }
    }
}

/// Maps a configured descriptor kind to its Vulkan type.
pub fn descriptor_type(kind: DescriptorKind) -> vk::DescriptorType {
    match kind {
        DescriptorKind::Sampler => vk::DescriptorType::SAMPLER,
        DescriptorKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DescriptorKind::SampledImage => vk::DescriptorType::SAMPLED_IMAGE,
        DescriptorKind::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
        DescriptorKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        DescriptorKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

#[derive(Debug)]
pub struct DescriptorAllocatorGrowable {
    config: DescriptorAllocatorConfig,
    ready: Vec<vk::DescriptorPool>,
    exhausted: Vec<vk::DescriptorPool>,
    next_capacity: u32,
    pools_created: usize,
}

impl DescriptorAllocatorGrowable {
    /// Creates the allocator with one pool of `initial_sets` sets, never
    /// fewer than one.
    pub fn new<D: GpuDevice + ?Sized>(
        device: &D,
        config: DescriptorAllocatorConfig,
    ) -> RhiResult<Self> {
        let mut allocator = Self {
            next_capacity: config.initial_sets.clamp(1, config.max_sets_per_pool.max(1)),
            config,
            ready: Vec::new(),
            exhausted: Vec::new(),
            pools_created: 0,
        };
        let pool = allocator.create_pool(device)?;
        allocator.ready.push(pool);
        Ok(allocator)
    }

    /// Allocates one set with `layout`.
    ///
    /// Pool exhaustion is handled internally by switching to a fresh pool.
    /// Only a second consecutive exhaustion or a failure to create a pool
    /// reaches the caller.
    pub fn allocate<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let pool = self.get_pool(device)?;

        let err = match device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready.push(pool);
                return Ok(set);
            }
            Err(err) if err.is_pool_exhaustion() => err,
            Err(err) => {
                self.ready.push(pool);
                return Err(err);
            }
        };

        warn!(
            "Descriptor pool {:?} exhausted ({}), retiring it",
            pool, err
        );
        self.exhausted.push(pool);

        let pool = self.get_pool(device)?;
        match device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready.push(pool);
                Ok(set)
            }
            Err(err) if err.is_pool_exhaustion() => {
                self.exhausted.push(pool);
                error!("Descriptor allocation failed on a fresh pool: {}", err);
                Err(RhiError::DescriptorPoolExhausted { attempts: 2 })
            }
            Err(err) => {
                self.ready.push(pool);
                Err(err)
            }
        }
    }

    /// Resets every pool and makes all of them ready again.
    ///
    /// Every set allocated so far becomes invalid; the caller guarantees
    /// the GPU no longer uses any of them.
    pub fn clear_pools<D: GpuDevice + ?Sized>(&mut self, device: &D) -> RhiResult<()> {
        for &pool in &self.ready {
            device.reset_descriptor_pool(pool)?;
        }
        while let Some(pool) = self.exhausted.pop() {
            if let Err(err) = device.reset_descriptor_pool(pool) {
                self.exhausted.push(pool);
                return Err(err);
            }
            self.ready.push(pool);
        }
        debug!("Reset {} descriptor pool(s)", self.ready.len());
        Ok(())
    }

    /// Destroys every pool. The caller guarantees the GPU is idle.
    pub fn destroy_pools<D: GpuDevice + ?Sized>(&mut self, device: &D) {
        let count = self.ready.len() + self.exhausted.len();
        for pool in self.ready.drain(..).chain(self.exhausted.drain(..)) {
            device.destroy_descriptor_pool(pool);
        }
        if count > 0 {
            debug!("Destroyed {} descriptor pool(s)", count);
        }
    }

    pub fn ready_pool_count(&self) -> usize {
        self.ready.len()
    }

    pub fn exhausted_pool_count(&self) -> usize {
        self.exhausted.len()
    }

    /// Set capacity the next newly created pool will get.
    pub fn next_pool_capacity(&self) -> u32 {
        self.next_capacity
    }

    /// Pools created since construction, including destroyed ones.
    pub fn pools_created(&self) -> usize {
        self.pools_created
    }

    pub fn config(&self) -> &DescriptorAllocatorConfig {
        &self.config
    }

    fn get_pool<D: GpuDevice + ?Sized>(&mut self, device: &D) -> RhiResult<vk::DescriptorPool> {
        match self.ready.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(device),
        }
    }

    /// Creates a pool at the current capacity and grows the capacity for
    /// the next one.
    fn create_pool<D: GpuDevice + ?Sized>(&mut self, device: &D) -> RhiResult<vk::DescriptorPool> {
        let capacity = self.next_capacity;
        let sizes = pool_sizes(&self.config.ratios, capacity);
        let pool = device.create_descriptor_pool(capacity, &sizes)?;
        self.pools_created += 1;

        let grown = (capacity as f32 * self.config.growth_factor) as u32;
        self.next_capacity = grown.clamp(capacity, self.config.max_sets_per_pool.max(capacity));

        debug!(
            "Created descriptor pool {:?} with {} sets (next: {})",
            pool, capacity, self.next_capacity
        );
        Ok(pool)
    }
}
