//! Set layouts, pool sizing from a ratio table, and descriptor writes.
//!
//! Layouts come back as raw handles; whoever builds one registers its
//! destruction with a deletion queue.
//!
//! ```no_run
//! use inflight_rhi::descriptor::DescriptorLayoutBuilder;
//! use inflight_rhi::device::Device;
//! use inflight_rhi::vk;
//!
//! # fn example(device: &Device) -> inflight_rhi::RhiResult<()> {
//! let layout = DescriptorLayoutBuilder::default()
//!     .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
//!     .build(device, vk::ShaderStageFlags::COMPUTE)?;
//! # let _ = layout;
//! # Ok(())
//! # }
//! ```

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Descriptors of type `ty` reserved per set in a pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

/// Sizes for a pool of `max_sets` sets: `floor(ratio * max_sets)` per type,
/// clamped to at least one.
pub fn pool_sizes(ratios: &[PoolSizeRatio], max_sets: u32) -> Vec<vk::DescriptorPoolSize> {
    let sets = max_sets as f32;
    ratios
        .iter()
        .map(|&PoolSizeRatio { ty, ratio }| vk::DescriptorPoolSize {
            ty,
            descriptor_count: ((ratio * sets).floor() as u32).max(1),
        })
        .collect()
}

#[derive(Debug, Default, Clone)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
}

impl DescriptorLayoutBuilder {
    /// One descriptor at `binding`; stages are filled in by [`build`](Self::build).
    pub fn add_binding(&mut self, binding: u32, ty: vk::DescriptorType) -> &mut Self {
        self.bindings.push(vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: ty,
            descriptor_count: 1,
            ..Default::default()
        });
        self
    }

    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    pub fn build(
        &self,
        device: &Device,
        stages: vk::ShaderStageFlags,
    ) -> RhiResult<vk::DescriptorSetLayout> {
        let staged: Vec<_> = self
            .bindings
            .iter()
            .map(|b| b.stage_flags(b.stage_flags | stages))
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&staged);
        let layout = unsafe { device.handle().create_descriptor_set_layout(&info, None)? };
        debug!(bindings = staged.len(), ?stages, "descriptor set layout created");
        Ok(layout)
    }
}

pub fn update_descriptor_sets(device: &Device, writes: &[vk::WriteDescriptorSet]) {
    if !writes.is_empty() {
        unsafe { device.handle().update_descriptor_sets(writes, &[]) };
    }
}

/// Storage images take a null sampler.
pub fn image_info(
    sampler: vk::Sampler,
    image_view: vk::ImageView,
    image_layout: vk::ImageLayout,
) -> vk::DescriptorImageInfo {
    vk::DescriptorImageInfo {
        sampler,
        image_view,
        image_layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(ty: vk::DescriptorType, ratio: f32) -> PoolSizeRatio {
        PoolSizeRatio { ty, ratio }
    }

    #[test]
    fn test_sizes_follow_set_capacity() {
        let table = [
            ratio(vk::DescriptorType::STORAGE_IMAGE, 3.0),
            ratio(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 0.5),
        ];
        let sizes: Vec<_> = pool_sizes(&table, 15)
            .iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect();
        assert_eq!(
            sizes,
            vec![
                (vk::DescriptorType::STORAGE_IMAGE, 45),
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 7),
            ]
        );
    }

    #[test]
    fn test_tiny_ratio_still_reserves_one() {
        let sizes = pool_sizes(&[ratio(vk::DescriptorType::UNIFORM_BUFFER, 0.05)], 4);
        assert_eq!(sizes[0].descriptor_count, 1);
    }

    #[test]
    fn test_builder_records_single_descriptor_bindings() {
        let mut builder = DescriptorLayoutBuilder::default();
        builder
            .add_binding(0, vk::DescriptorType::STORAGE_IMAGE)
            .add_binding(3, vk::DescriptorType::UNIFORM_BUFFER);

        let recorded: Vec<_> = builder
            .bindings()
            .iter()
            .map(|b| (b.binding, b.descriptor_type, b.descriptor_count))
            .collect();
        assert_eq!(
            recorded,
            vec![
                (0, vk::DescriptorType::STORAGE_IMAGE, 1),
                (3, vk::DescriptorType::UNIFORM_BUFFER, 1),
            ]
        );
        assert!(builder.bindings().iter().all(|b| b.stage_flags.is_empty()));
    }
}
