//! Deferred destruction of GPU objects.
//!
//! Every GPU object that outlives a single function is destroyed through a
//! [`DeletionQueue`]: creation sites push a [`DeferredAction`] naming the
//! object, and the owner flushes the queue at a point where the GPU is known
//! to be done with everything in it. Flushing runs actions last-in,
//! first-out, so objects go away in the reverse of their creation order
//! (a view before its image, a command pool after the fence that guards it).

use ash::vk;
use inflight_rhi::backend::GpuDevice;
use tracing::debug;

/// A pending destruction, tagged by object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredAction {
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    CommandPool(vk::CommandPool),
    DescriptorPool(vk::DescriptorPool),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    ImageView(vk::ImageView),
    Image(vk::Image),
    Buffer(vk::Buffer),
}

impl DeferredAction {
    /// Destroys the object through `device`.
    pub fn execute<D: GpuDevice + ?Sized>(self, device: &D) {
        match self {
            Self::Fence(fence) => device.destroy_fence(fence),
            Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore),
            Self::CommandPool(pool) => device.destroy_command_pool(pool),
            Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool),
            Self::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout),
            Self::ImageView(view) => device.destroy_image_view(view),
            Self::Image(image) => device.destroy_image(image),
            Self::Buffer(buffer) => device.destroy_buffer(buffer),
        }
    }
}

/// LIFO queue of pending destructions.
///
/// Single owner: `push` and `flush` both take `&mut self`.
#[derive(Debug, Default)]
pub struct DeletionQueue {
    actions: Vec<DeferredAction>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, action: DeferredAction) {
        self.actions.push(action);
    }

    /// Runs every pending action, newest first, and empties the queue.
    /// Returns how many actions ran.
    pub fn flush<D: GpuDevice + ?Sized>(&mut self, device: &D) -> usize {
        let count = self.actions.len();
        while let Some(action) = self.actions.pop() {
            action.execute(device);
        }
        if count > 0 {
            debug!("Flushed {} deferred destruction(s)", count);
        }
        count
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            tracing::warn!(
                "Deletion queue dropped with {} pending action(s); objects leaked",
                self.actions.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_rhi::backend::BufferDesc;
    use inflight_rhi::headless::{DeviceCall, HeadlessDevice};

    #[test]
    fn test_flush_runs_in_reverse_order() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        let semaphore = device.create_semaphore().unwrap();
        let pool = device.create_command_pool().unwrap();
        device.clear_calls();

        let mut queue = DeletionQueue::new();
        queue.push(DeferredAction::Fence(fence));
        queue.push(DeferredAction::Semaphore(semaphore));
        queue.push(DeferredAction::CommandPool(pool));

        assert_eq!(queue.flush(&device), 3);
        assert!(queue.is_empty());
        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::DestroyCommandPool(pool),
                DeviceCall::DestroySemaphore(semaphore),
                DeviceCall::DestroyFence(fence),
            ]
        );
    }

    #[test]
    fn test_flush_empty_queue_is_noop() {
        let device = HeadlessDevice::new();
        let mut queue = DeletionQueue::new();
        assert_eq!(queue.flush(&device), 0);
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_queue_is_reusable_after_flush() {
        let device = HeadlessDevice::new();
        let mut queue = DeletionQueue::new();

        queue.push(DeferredAction::Fence(device.create_fence(false).unwrap()));
        queue.flush(&device);

        queue.push(DeferredAction::Semaphore(device.create_semaphore().unwrap()));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.flush(&device), 1);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_buffers_are_destroyed_newest_first() {
        let device = HeadlessDevice::new();
        let first = device.create_buffer(&BufferDesc::staging(64)).unwrap();
        let second = device.create_buffer(&BufferDesc::staging(64)).unwrap();
        let fence = device.create_fence(false).unwrap();
        device.clear_calls();

        let mut queue = DeletionQueue::new();
        queue.push(DeferredAction::Buffer(first));
        queue.push(DeferredAction::Fence(fence));
        queue.push(DeferredAction::Buffer(second));
        queue.flush(&device);

        assert_eq!(
            device.calls(),
            vec![
                DeviceCall::DestroyBuffer(second),
                DeviceCall::DestroyFence(fence),
                DeviceCall::DestroyBuffer(first),
            ]
        );
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_every_kind_dispatches_to_matching_destroy() {
        let device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout();
        let pool = device.create_descriptor_pool(1, &[]).unwrap();

        let mut queue = DeletionQueue::new();
        queue.push(DeferredAction::DescriptorSetLayout(layout));
        queue.push(DeferredAction::DescriptorPool(pool));
        queue.flush(&device);

        let calls = device.calls();
        assert!(calls.contains(&DeviceCall::DestroyDescriptorPool(pool)));
        assert!(calls.contains(&DeviceCall::DestroyDescriptorSetLayout(layout)));
        assert_eq!(device.live_object_count(), 0);
    }
}
