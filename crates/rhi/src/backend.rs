//! Collaborator traits between the frame core and the GPU.
//!
//! [`GpuDevice`] covers object creation, submission and idle waits.
//! [`PresentSurface`] covers presentable image acquisition, presentation
//! and resize. The ash-backed [`Device`](crate::device::Device) and
//! [`Swapchain`](crate::swapchain::Swapchain) implement them for real
//! hardware; [`headless`](crate::headless) implements them without a GPU.
//!
//! Handles are plain `vk` handle types. Implementations own nothing the
//! caller created; every `create_*` has a matching `destroy_*` the caller
//! is responsible for.

use std::ops::Range;

use ash::vk;
pub use gpu_allocator::MemoryLocation;

use crate::error::{RhiError, RhiResult};

/// Outcome of a bounded fence wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// A semaphore wait dependency with the stage that must not start before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreWait {
    pub semaphore: vk::Semaphore,
    pub stage: vk::PipelineStageFlags,
}

impl SemaphoreWait {
    /// Wait before color attachment output, as presentable image writes require.
    pub fn color_output(semaphore: vk::Semaphore) -> Self {
        Self {
            semaphore,
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }
    }
}

/// Result of asking the surface for the next presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    /// The surface changed; the swapchain must be recreated before use.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

impl PresentOutcome {
    /// Whether the swapchain should be recreated before the next frame.
    pub fn needs_recreate(self) -> bool {
        !matches!(self, Self::Presented)
    }
}

/// Description of a device-local 2D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
}

/// Description of a buffer and the memory it is placed in.
///
/// Only `CpuToGpu` and `GpuToCpu` buffers can be written from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDesc {
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
}

impl BufferDesc {
    /// Host-visible transfer source for uploads.
    pub fn staging(size: vk::DeviceSize) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            location: MemoryLocation::CpuToGpu,
        }
    }

    pub fn is_host_visible(&self) -> bool {
        matches!(
            self.location,
            MemoryLocation::CpuToGpu | MemoryLocation::GpuToCpu
        )
    }
}

/// Byte range `data_len` bytes at `offset` occupy in a buffer of `size`
/// bytes, or an error when they do not fit.
pub fn write_range(
    offset: vk::DeviceSize,
    data_len: usize,
    size: vk::DeviceSize,
) -> RhiResult<Range<usize>> {
    let end = offset.checked_add(data_len as vk::DeviceSize);
    match end {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(RhiError::BufferWrite(format!(
            "{data_len} bytes at offset {offset} exceed buffer size {size}"
        ))),
    }
}

/// Device collaborator: object lifetimes, submission and waits.
pub trait GpuDevice {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence>;
    /// Waits at most `timeout_ns`. A timeout is reported, not raised.
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<FenceWait>;
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()>;
    fn destroy_fence(&self, fence: vk::Fence);

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Creates a resettable command pool on the graphics queue family.
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool>;
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer>;
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    /// Begins recording for a single submission.
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()>;

    /// Submits one command buffer to the graphics queue.
    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> RhiResult<()>;
    /// Blocks until every queue is idle.
    fn wait_idle(&self) -> RhiResult<()>;

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool>;
    /// Fails with `ERROR_OUT_OF_POOL_MEMORY` or `ERROR_FRAGMENTED_POOL`
    /// when the pool has no room left.
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet>;
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);

    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image>;
    fn destroy_image(&self, image: vk::Image);
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer>;
    /// Copies `data` into a host-visible buffer at `offset`.
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()>;
    /// Records a copy of the first `size` bytes of `src` into `dst`.
    fn copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize);
    fn destroy_buffer(&self, buffer: vk::Buffer);
}

/// Presentation collaborator: the swapchain and the surface behind it.
pub trait PresentSurface {
    /// Requests the next image, signaling `signal` when it is ready to be written.
    fn acquire_next_image(
        &mut self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome>;
    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> RhiResult<PresentOutcome>;

    /// Presentable images. Owned by the surface.
    fn images(&self) -> &[vk::Image];
    fn format(&self) -> vk::Format;
    fn extent(&self) -> vk::Extent2D;

    /// Rebuilds the swapchain for a new window size. The caller guarantees
    /// the device is idle.
    fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()>;
}

impl<T: GpuDevice + ?Sized> GpuDevice for std::sync::Arc<T> {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        (**self).create_fence(signaled)
    }
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RhiResult<FenceWait> {
        (**self).wait_for_fence(fence, timeout_ns)
    }
    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        (**self).reset_fence(fence)
    }
    fn destroy_fence(&self, fence: vk::Fence) {
        (**self).destroy_fence(fence)
    }
    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        (**self).create_semaphore()
    }
    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        (**self).destroy_semaphore(semaphore)
    }
    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        (**self).create_command_pool()
    }
    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        (**self).allocate_command_buffer(pool)
    }
    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        (**self).destroy_command_pool(pool)
    }
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        (**self).reset_command_buffer(cmd)
    }
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        (**self).begin_command_buffer(cmd)
    }
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        (**self).end_command_buffer(cmd)
    }
    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        (**self).submit(cmd, waits, signals, fence)
    }
    fn wait_idle(&self) -> RhiResult<()> {
        (**self).wait_idle()
    }
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        (**self).create_descriptor_pool(max_sets, sizes)
    }
    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        (**self).allocate_descriptor_set(pool, layout)
    }
    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        (**self).reset_descriptor_pool(pool)
    }
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        (**self).destroy_descriptor_pool(pool)
    }
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        (**self).destroy_descriptor_set_layout(layout)
    }
    fn create_image(&self, desc: &ImageDesc) -> RhiResult<vk::Image> {
        (**self).create_image(desc)
    }
    fn destroy_image(&self, image: vk::Image) {
        (**self).destroy_image(image)
    }
    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        (**self).create_image_view(image, format, aspect)
    }
    fn destroy_image_view(&self, view: vk::ImageView) {
        (**self).destroy_image_view(view)
    }
    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer> {
        (**self).create_buffer(desc)
    }
    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        (**self).write_buffer(buffer, offset, data)
    }
    fn copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        (**self).copy_buffer(cmd, src, dst, size)
    }
    fn destroy_buffer(&self, buffer: vk::Buffer) {
        (**self).destroy_buffer(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_range_accepts_exact_fit() {
        assert_eq!(write_range(0, 16, 16).unwrap(), 0..16);
        assert_eq!(write_range(12, 4, 16).unwrap(), 12..16);
        assert_eq!(write_range(16, 0, 16).unwrap(), 16..16);
    }

    #[test]
    fn test_write_range_rejects_overrun() {
        assert!(matches!(
            write_range(12, 5, 16),
            Err(RhiError::BufferWrite(_))
        ));
        assert!(write_range(u64::MAX, 1, u64::MAX).is_err());
    }

    #[test]
    fn test_only_mapped_locations_are_host_visible() {
        assert!(BufferDesc::staging(64).is_host_visible());
        let device_local = BufferDesc {
            location: MemoryLocation::GpuOnly,
            ..BufferDesc::staging(64)
        };
        assert!(!device_local.is_host_visible());
    }
}
