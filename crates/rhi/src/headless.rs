//! GPU-free implementation of [`GpuDevice`] and [`PresentSurface`].
//!
//! The headless backend fabricates unique handles and records every call in
//! an ordered log shared between the device and its surfaces. Submissions
//! complete immediately unless auto-completion is turned off, in which case
//! they stay in flight until [`HeadlessDevice::complete_all`] or a
//! `wait_idle`. This lets tests observe ordering between fence waits, resets,
//! idle waits and destruction without touching a driver.
//!
//! Buffers keep their bytes in host memory, so uploads can be checked end to
//! end. A recorded buffer copy takes effect when it is recorded.
//!
//! # Example
//!
//! ```
//! use inflight_rhi::backend::{FenceWait, GpuDevice};
//! use inflight_rhi::headless::HeadlessDevice;
//!
//! let device = HeadlessDevice::new();
//! let fence = device.create_fence(true).unwrap();
//! assert_eq!(device.wait_for_fence(fence, 1).unwrap(), FenceWait::Signaled);
//! device.destroy_fence(fence);
//! assert_eq!(device.live_object_count(), 0);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ash::vk::{self, Handle};

use crate::backend::{
    AcquireOutcome, BufferDesc, FenceWait, GpuDevice, ImageDesc, PresentOutcome,
    PresentSurface, SemaphoreWait, write_range,
};
use crate::error::{RhiError, RhiResult};

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCall {
    CreateFence { fence: vk::Fence, signaled: bool },
    WaitForFence { fence: vk::Fence, signaled: bool },
    ResetFence(vk::Fence),
    DestroyFence(vk::Fence),
    CreateSemaphore(vk::Semaphore),
    DestroySemaphore(vk::Semaphore),
    CreateCommandPool(vk::CommandPool),
    AllocateCommandBuffer { pool: vk::CommandPool, cmd: vk::CommandBuffer },
    DestroyCommandPool(vk::CommandPool),
    ResetCommandBuffer(vk::CommandBuffer),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    Submit {
        cmd: vk::CommandBuffer,
        waits: Vec<vk::Semaphore>,
        signals: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    WaitIdle,
    CreateDescriptorPool { pool: vk::DescriptorPool, max_sets: u32 },
    AllocateDescriptorSet {
        pool: vk::DescriptorPool,
        set: Option<vk::DescriptorSet>,
    },
    ResetDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorPool(vk::DescriptorPool),
    DestroyDescriptorSetLayout(vk::DescriptorSetLayout),
    CreateImage(vk::Image),
    DestroyImage(vk::Image),
    CreateImageView { image: vk::Image, view: vk::ImageView },
    DestroyImageView(vk::ImageView),
    CreateBuffer { buffer: vk::Buffer, size: vk::DeviceSize },
    WriteBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, len: usize },
    CopyBuffer {
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    },
    DestroyBuffer(vk::Buffer),
    AcquireNextImage {
        semaphore: vk::Semaphore,
        outcome: AcquireOutcome,
    },
    Present {
        image_index: u32,
        waits: Vec<vk::Semaphore>,
        outcome: PresentOutcome,
    },
    RecreateSwapchain { width: u32, height: u32 },
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    allocated: u32,
}

#[derive(Debug)]
struct BufferState {
    host_visible: bool,
    bytes: Vec<u8>,
}

#[derive(Debug)]
struct State {
    calls: Vec<DeviceCall>,
    next_handle: u64,
    live: HashSet<u64>,
    signaled: HashMap<vk::Fence, bool>,
    in_flight: Vec<vk::Fence>,
    auto_complete: bool,
    destroyed_while_in_flight: usize,
    pools: HashMap<vk::DescriptorPool, PoolState>,
    allocation_attempts: u32,
    fail_at: Option<u32>,
    fail_all: bool,
    buffers: HashMap<vk::Buffer, BufferState>,
    fail_wait_idle: bool,
}

impl State {
    fn fabricate<H: Handle>(&mut self) -> H {
        self.next_handle += 1;
        self.live.insert(self.next_handle);
        H::from_raw(self.next_handle)
    }

    fn release<H: Handle>(&mut self, handle: H) {
        self.live.remove(&handle.as_raw());
    }

    fn complete_all(&mut self) {
        for fence in self.in_flight.drain(..) {
            if fence != vk::Fence::null() {
                self.signaled.insert(fence, true);
            }
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recording device. Cloning shares the same state and call log.
#[derive(Debug, Clone)]
pub struct HeadlessDevice {
    state: Arc<Mutex<State>>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                calls: Vec::new(),
                next_handle: 0,
                live: HashSet::new(),
                signaled: HashMap::new(),
                in_flight: Vec::new(),
                auto_complete: true,
                destroyed_while_in_flight: 0,
                pools: HashMap::new(),
                allocation_attempts: 0,
                fail_at: None,
                fail_all: false,
                buffers: HashMap::new(),
                fail_wait_idle: false,
            })),
        }
    }

    /// Creates a surface with `image_count` presentable images that logs
    /// into this device's call log.
    pub fn create_surface(&self, width: u32, height: u32, image_count: usize) -> HeadlessSurface {
        let images = {
            let mut state = lock(&self.state);
            (0..image_count).map(|_| state.fabricate()).collect()
        };
        HeadlessSurface {
            state: Arc::clone(&self.state),
            images,
            extent: vk::Extent2D { width, height },
            format: vk::Format::B8G8R8A8_UNORM,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
        }
    }

    /// Fabricates a descriptor set layout handle. Layout creation is not
    /// part of [`GpuDevice`]; callers build layouts with their own helpers.
    pub fn create_descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        lock(&self.state).fabricate()
    }

    /// When disabled, submissions stay in flight until completed explicitly.
    pub fn set_auto_complete(&self, enabled: bool) {
        lock(&self.state).auto_complete = enabled;
    }

    /// Signals every in-flight submission's fence.
    pub fn complete_all(&self) {
        lock(&self.state).complete_all();
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.state).in_flight.len()
    }

    /// Images, views and buffers destroyed while a submission was still in
    /// flight.
    pub fn destroyed_while_in_flight(&self) -> usize {
        lock(&self.state).destroyed_while_in_flight
    }

    /// Makes the `n`-th descriptor set allocation attempt (1-based, counted
    /// from device creation) report pool exhaustion once.
    pub fn fail_allocation_at(&self, n: u32) {
        lock(&self.state).fail_at = Some(n);
    }

    /// Makes every later descriptor set allocation report pool exhaustion.
    pub fn fail_all_allocations(&self) {
        lock(&self.state).fail_all = true;
    }

    /// Makes the next `wait_idle` report device loss without completing
    /// anything in flight.
    pub fn fail_next_wait_idle(&self) {
        lock(&self.state).fail_wait_idle = true;
    }

    /// Current bytes of a live buffer.
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> Option<Vec<u8>> {
        lock(&self.state)
            .buffers
            .get(&buffer)
            .map(|state| state.bytes.clone())
    }

    pub fn allocation_attempts(&self) -> u32 {
        lock(&self.state).allocation_attempts
    }

    /// Objects created and not yet destroyed. Command buffers are freed
    /// with their pool and are not counted.
    pub fn live_object_count(&self) -> usize {
        lock(&self.state).live.len()
    }

    /// Snapshot of the call log.
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of logged calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|call| predicate(call)).count()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn log(&self, call: DeviceCall) {
        lock(&self.state).calls.push(call);
    }

    fn fabricate<H: Handle>(&self) -> H {
        lock(&self.state).fabricate()
    }

    fn release<H: Handle>(&self, handle: H) {
        lock(&self.state).release(handle);
    }

    fn release_gpu_resource<H: Handle>(&self, handle: H, call: DeviceCall) {
        let mut state = lock(&self.state);
        if !state.in_flight.is_empty() {
            state.destroyed_while_in_flight += 1;
        }
        state.release(handle);
        state.calls.push(call);
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_fence(&self, signaled: bool) -> RhiResult<vk::Fence> {
        let mut state = lock(&self.state);
        let fence: vk::Fence = state.fabricate();
        state.signaled.insert(fence, signaled);
        state.calls.push(DeviceCall::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RhiResult<FenceWait> {
        let mut state = lock(&self.state);
        let signaled = *state
            .signaled
            .get(&fence)
            .ok_or_else(|| RhiError::InvalidState(format!("unknown fence {fence:?}")))?;
        state.calls.push(DeviceCall::WaitForFence { fence, signaled });
        Ok(if signaled {
            FenceWait::Signaled
        } else {
            FenceWait::TimedOut
        })
    }

    fn reset_fence(&self, fence: vk::Fence) -> RhiResult<()> {
        let mut state = lock(&self.state);
        match state.signaled.get_mut(&fence) {
            Some(signaled) => *signaled = false,
            None => return Err(RhiError::InvalidState(format!("unknown fence {fence:?}"))),
        }
        state.calls.push(DeviceCall::ResetFence(fence));
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = lock(&self.state);
        state.signaled.remove(&fence);
        state.release(fence);
        state.calls.push(DeviceCall::DestroyFence(fence));
    }

    fn create_semaphore(&self) -> RhiResult<vk::Semaphore> {
        let semaphore = self.fabricate();
        self.log(DeviceCall::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.release(semaphore);
        self.log(DeviceCall::DestroySemaphore(semaphore));
    }

    fn create_command_pool(&self) -> RhiResult<vk::CommandPool> {
        let pool = self.fabricate();
        self.log(DeviceCall::CreateCommandPool(pool));
        Ok(pool)
    }

    fn allocate_command_buffer(&self, pool: vk::CommandPool) -> RhiResult<vk::CommandBuffer> {
        let mut state = lock(&self.state);
        let cmd: vk::CommandBuffer = state.fabricate();
        // Freed implicitly with the pool.
        state.release(cmd);
        state.calls.push(DeviceCall::AllocateCommandBuffer { pool, cmd });
        Ok(cmd)
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        self.release(pool);
        self.log(DeviceCall::DestroyCommandPool(pool));
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.log(DeviceCall::ResetCommandBuffer(cmd));
        Ok(())
    }

    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.log(DeviceCall::BeginCommandBuffer(cmd));
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        self.log(DeviceCall::EndCommandBuffer(cmd));
        Ok(())
    }

    fn submit(
        &self,
        cmd: vk::CommandBuffer,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        let mut state = lock(&self.state);
        if fence != vk::Fence::null() && state.signaled.get(&fence) != Some(&false) {
            return Err(RhiError::InvalidState(format!(
                "fence {fence:?} submitted while signaled or unknown"
            )));
        }
        state.calls.push(DeviceCall::Submit {
            cmd,
            waits: waits.iter().map(|wait| wait.semaphore).collect(),
            signals: signals.to_vec(),
            fence,
        });
        state.in_flight.push(fence);
        if state.auto_complete {
            state.complete_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let mut state = lock(&self.state);
        state.calls.push(DeviceCall::WaitIdle);
        if std::mem::take(&mut state.fail_wait_idle) {
            return Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST));
        }
        state.complete_all();
        Ok(())
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        _sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<vk::DescriptorPool> {
        let mut state = lock(&self.state);
        let pool: vk::DescriptorPool = state.fabricate();
        state.pools.insert(
            pool,
            PoolState {
                max_sets,
                allocated: 0,
            },
        );
        state
            .calls
            .push(DeviceCall::CreateDescriptorPool { pool, max_sets });
        Ok(pool)
    }

    fn allocate_descriptor_set(
        &self,
        pool: vk::DescriptorPool,
        _layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        let mut state = lock(&self.state);
        state.allocation_attempts += 1;

        let injected = state.fail_all || state.fail_at == Some(state.allocation_attempts);
        if state.fail_at == Some(state.allocation_attempts) {
            state.fail_at = None;
        }

        let has_room = match state.pools.get(&pool) {
            Some(pool_state) => pool_state.allocated < pool_state.max_sets,
            None => {
                return Err(RhiError::InvalidState(format!(
                    "unknown descriptor pool {pool:?}"
                )));
            }
        };

        if injected || !has_room {
            state
                .calls
                .push(DeviceCall::AllocateDescriptorSet { pool, set: None });
            return Err(RhiError::VulkanError(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }

        if let Some(pool_state) = state.pools.get_mut(&pool) {
            pool_state.allocated += 1;
        }
        // Sets are freed with their pool and are not tracked as live objects.
        state.next_handle += 1;
        let set = vk::DescriptorSet::from_raw(state.next_handle);
        state.calls.push(DeviceCall::AllocateDescriptorSet {
            pool,
            set: Some(set),
        });
        Ok(set)
    }

    fn reset_descriptor_pool(&self, pool: vk::DescriptorPool) -> RhiResult<()> {
        let mut state = lock(&self.state);
        if let Some(pool_state) = state.pools.get_mut(&pool) {
            pool_state.allocated = 0;
        }
        state.calls.push(DeviceCall::ResetDescriptorPool(pool));
        Ok(())
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = lock(&self.state);
        state.pools.remove(&pool);
        state.release(pool);
        state.calls.push(DeviceCall::DestroyDescriptorPool(pool));
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.release(layout);
        self.log(DeviceCall::DestroyDescriptorSetLayout(layout));
    }

    fn create_image(&self, _desc: &ImageDesc) -> RhiResult<vk::Image> {
        let image = self.fabricate();
        self.log(DeviceCall::CreateImage(image));
        Ok(image)
    }

    fn destroy_image(&self, image: vk::Image) {
        self.release_gpu_resource(image, DeviceCall::DestroyImage(image));
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> RhiResult<vk::ImageView> {
        let view = self.fabricate();
        self.log(DeviceCall::CreateImageView { image, view });
        Ok(view)
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release_gpu_resource(view, DeviceCall::DestroyImageView(view));
    }

    fn create_buffer(&self, desc: &BufferDesc) -> RhiResult<vk::Buffer> {
        if desc.size == 0 {
            return Err(RhiError::InvalidState("buffer size must be non-zero".into()));
        }
        let mut state = lock(&self.state);
        let buffer: vk::Buffer = state.fabricate();
        state.buffers.insert(
            buffer,
            BufferState {
                host_visible: desc.is_host_visible(),
                bytes: vec![0; desc.size as usize],
            },
        );
        state.calls.push(DeviceCall::CreateBuffer {
            buffer,
            size: desc.size,
        });
        Ok(buffer)
    }

    fn write_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        let mut state = lock(&self.state);
        let target = state
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| RhiError::InvalidState(format!("unknown buffer {buffer:?}")))?;
        if !target.host_visible {
            return Err(RhiError::BufferWrite("buffer memory is not host visible".into()));
        }
        let range = write_range(offset, data.len(), target.bytes.len() as vk::DeviceSize)?;
        target.bytes[range].copy_from_slice(data);
        state.calls.push(DeviceCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn copy_buffer(&self, cmd: vk::CommandBuffer, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) {
        let mut state = lock(&self.state);
        let bytes = state
            .buffers
            .get(&src)
            .map(|source| source.bytes[..(size as usize).min(source.bytes.len())].to_vec());
        if let (Some(bytes), Some(target)) = (bytes, state.buffers.get_mut(&dst)) {
            let len = bytes.len().min(target.bytes.len());
            target.bytes[..len].copy_from_slice(&bytes[..len]);
        }
        state.calls.push(DeviceCall::CopyBuffer {
            cmd,
            src,
            dst,
            size,
        });
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        lock(&self.state).buffers.remove(&buffer);
        self.release_gpu_resource(buffer, DeviceCall::DestroyBuffer(buffer));
    }
}

/// Recording presentation surface created by [`HeadlessDevice::create_surface`].
#[derive(Debug)]
pub struct HeadlessSurface {
    state: Arc<Mutex<State>>,
    images: Vec<vk::Image>,
    extent: vk::Extent2D,
    format: vk::Format,
    next_image: u32,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
}

impl HeadlessSurface {
    /// Makes the next acquire report `outcome` instead of an image.
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    /// Makes the next present report `outcome`.
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }
}

impl PresentSurface for HeadlessSurface {
    fn acquire_next_image(
        &mut self,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome> {
        let outcome = match self.acquire_script.pop_front() {
            Some(outcome) => outcome,
            None => {
                let index = self.next_image;
                self.next_image = (self.next_image + 1) % self.images.len().max(1) as u32;
                AcquireOutcome::Acquired {
                    index,
                    suboptimal: false,
                }
            }
        };
        lock(&self.state).calls.push(DeviceCall::AcquireNextImage {
            semaphore: signal,
            outcome,
        });
        Ok(outcome)
    }

    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> RhiResult<PresentOutcome> {
        if image_index as usize >= self.images.len() {
            return Err(RhiError::SwapchainError(format!(
                "image index {image_index} out of range"
            )));
        }
        let outcome = self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented);
        lock(&self.state).calls.push(DeviceCall::Present {
            image_index,
            waits: waits.to_vec(),
            outcome,
        });
        Ok(outcome)
    }

    fn images(&self) -> &[vk::Image] {
        &self.images
    }

    fn format(&self) -> vk::Format {
        self.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let mut state = lock(&self.state);
        let count = self.images.len().max(1);
        for image in self.images.drain(..) {
            state.release(image);
        }
        self.images = (0..count).map(|_| state.fabricate()).collect();
        self.extent = vk::Extent2D { width, height };
        self.next_image = 0;
        state
            .calls
            .push(DeviceCall::RecreateSwapchain { width, height });
        Ok(())
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        for image in self.images.drain(..) {
            state.release(image);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let device = HeadlessDevice::new();
        let a = device.create_semaphore().unwrap();
        let b = device.create_semaphore().unwrap();
        assert_ne!(a, b);
        assert_ne!(a, vk::Semaphore::null());
    }

    #[test]
    fn test_submission_stays_in_flight_without_auto_complete() {
        let device = HeadlessDevice::new();
        device.set_auto_complete(false);

        let fence = device.create_fence(false).unwrap();
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.submit(cmd, &[], &[], fence).unwrap();

        assert_eq!(device.in_flight(), 1);
        assert_eq!(device.wait_for_fence(fence, 0).unwrap(), FenceWait::TimedOut);

        device.complete_all();
        assert_eq!(device.in_flight(), 0);
        assert_eq!(device.wait_for_fence(fence, 0).unwrap(), FenceWait::Signaled);
    }

    #[test]
    fn test_submit_rejects_signaled_fence() {
        let device = HeadlessDevice::new();
        let fence = device.create_fence(true).unwrap();
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        assert!(matches!(
            device.submit(cmd, &[], &[], fence),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_destruction_in_flight_is_counted() {
        let device = HeadlessDevice::new();
        device.set_auto_complete(false);

        let desc = ImageDesc {
            extent: vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            },
            format: vk::Format::R8G8B8A8_UNORM,
            usage: vk::ImageUsageFlags::TRANSFER_DST,
        };
        let image = device.create_image(&desc).unwrap();
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.submit(cmd, &[], &[], vk::Fence::null()).unwrap();

        device.destroy_image(image);
        assert_eq!(device.destroyed_while_in_flight(), 1);
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout();
        let pool = device.create_descriptor_pool(2, &[]).unwrap();

        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
        let err = device.allocate_descriptor_set(pool, layout).unwrap_err();
        assert!(err.is_pool_exhaustion());

        device.reset_descriptor_pool(pool).unwrap();
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
    }

    #[test]
    fn test_injected_allocation_failure_is_one_shot() {
        let device = HeadlessDevice::new();
        let layout = device.create_descriptor_set_layout();
        let pool = device.create_descriptor_pool(10, &[]).unwrap();
        device.fail_allocation_at(2);

        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
        assert!(device.allocate_descriptor_set(pool, layout).is_err());
        assert!(device.allocate_descriptor_set(pool, layout).is_ok());
        assert_eq!(device.allocation_attempts(), 3);
    }

    #[test]
    fn test_surface_script_and_recreate() {
        let device = HeadlessDevice::new();
        let mut surface = device.create_surface(800, 600, 2);
        let semaphore = device.create_semaphore().unwrap();

        surface.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(
            surface.acquire_next_image(0, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            surface.acquire_next_image(0, semaphore).unwrap(),
            AcquireOutcome::Acquired {
                index: 0,
                suboptimal: false
            }
        );

        let old_images = surface.images().to_vec();
        surface.recreate(1024, 768).unwrap();
        assert_eq!(surface.extent().width, 1024);
        assert!(surface.images().iter().all(|image| !old_images.contains(image)));
        assert_eq!(
            device.count(|call| matches!(call, DeviceCall::RecreateSwapchain { .. })),
            1
        );
    }

    #[test]
    fn test_buffer_write_and_copy_move_bytes() {
        let device = HeadlessDevice::new();
        let staging = device.create_buffer(&BufferDesc::staging(4)).unwrap();
        let target = device
            .create_buffer(&BufferDesc {
                size: 4,
                usage: vk::BufferUsageFlags::TRANSFER_DST,
                location: crate::backend::MemoryLocation::GpuOnly,
            })
            .unwrap();

        device.write_buffer(staging, 1, &[7, 8]).unwrap();
        assert!(matches!(
            device.write_buffer(target, 0, &[1]),
            Err(RhiError::BufferWrite(_))
        ));
        assert!(matches!(
            device.write_buffer(staging, 3, &[1, 2]),
            Err(RhiError::BufferWrite(_))
        ));

        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.copy_buffer(cmd, staging, target, 4);
        assert_eq!(device.buffer_contents(target), Some(vec![0, 7, 8, 0]));

        device.destroy_buffer(target);
        device.destroy_buffer(staging);
        device.destroy_command_pool(pool);
        assert_eq!(device.buffer_contents(staging), None);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_zero_sized_buffer_is_rejected() {
        let device = HeadlessDevice::new();
        assert!(device.create_buffer(&BufferDesc::staging(0)).is_err());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_failed_wait_idle_leaves_work_in_flight_once() {
        let device = HeadlessDevice::new();
        device.set_auto_complete(false);
        let pool = device.create_command_pool().unwrap();
        let cmd = device.allocate_command_buffer(pool).unwrap();
        device.submit(cmd, &[], &[], vk::Fence::null()).unwrap();

        device.fail_next_wait_idle();
        assert!(matches!(
            device.wait_idle(),
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert_eq!(device.in_flight(), 1);

        device.wait_idle().unwrap();
        assert_eq!(device.in_flight(), 0);
    }

    #[test]
    fn test_live_objects_return_to_zero() {
        let device = HeadlessDevice::new();
        {
            let _surface = device.create_surface(64, 64, 3);
            let fence = device.create_fence(true).unwrap();
            let pool = device.create_command_pool().unwrap();
            device.allocate_command_buffer(pool).unwrap();
            device.destroy_command_pool(pool);
            device.destroy_fence(fence);
        }
        assert_eq!(device.live_object_count(), 0);
    }
}
