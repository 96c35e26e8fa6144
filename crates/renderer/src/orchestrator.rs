//! Per-frame orchestration.
//!
//! [`FrameOrchestrator`] drives one frame at a time through the ring:
//!
//! ```text
//! draw_frame
//!   ├─ minimized?            -> Skipped(Minimized)
//!   ├─ resize pending?       -> recreate (idle wait, rebuild)
//!   ├─ wait slot fence       (bounded; timeout is fatal)
//!   ├─ acquire image         (out of date -> recreate, retry once)
//!   ├─ begin, record, submit
//!   ├─ present               (suboptimal / out of date -> resize pending)
//!   └─ advance
//! ```
//!
//! It also owns the objects shared across frames: the immediate executor,
//! the growable descriptor allocator and the global teardown queue.

use ash::vk;
use inflight_core::EngineConfig;
use inflight_rhi::backend::{AcquireOutcome, GpuDevice, PresentSurface};
use inflight_rhi::{RhiError, RhiResult};
use tracing::{debug, error, info, warn};

use crate::deletion_queue::{DeferredAction, DeletionQueue};
use crate::descriptor_allocator::{DescriptorAllocatorConfig, DescriptorAllocatorGrowable};
use crate::draw_target::DrawTarget;
use crate::frame::{FrameRing, SlotHandle};
use crate::immediate::ImmediateExecutor;
use crate::swapchain_coordinator::SwapchainCoordinator;

/// Everything a recording callback needs for the current frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub cmd: vk::CommandBuffer,
    pub frame_number: u64,
    pub slot: SlotHandle,
    pub image_index: u32,
    pub swapchain_image: vk::Image,
    pub swapchain_view: vk::ImageView,
    pub swapchain_extent: vk::Extent2D,
    pub draw_target: DrawTarget,
}

/// Why a frame produced no submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The surface has a zero-sized extent.
    Minimized,
    /// The surface was still out of date after one recreation.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented {
        frame_number: u64,
        image_index: u32,
        slot: SlotHandle,
    },
    Skipped(SkipReason),
}

pub struct FrameOrchestrator<D: GpuDevice, S: PresentSurface> {
    device: D,
    surface: S,
    frames: FrameRing,
    immediate: ImmediateExecutor,
    descriptors: DescriptorAllocatorGrowable,
    swapchain: SwapchainCoordinator,
    /// Objects that live until shutdown.
    teardown: DeletionQueue,
    acquire_timeout_ns: u64,
    shut_down: bool,
}

impl<D: GpuDevice, S: PresentSurface> FrameOrchestrator<D, S> {
    /// Builds the frame ring, immediate executor, descriptor allocator and
    /// swapchain-sized resources. Anything created before a failure is
    /// destroyed again.
    ///
    /// An invalid `config` is rejected before any object is created.
    pub fn new(device: D, surface: S, config: &EngineConfig) -> RhiResult<Self> {
        config
            .validate()
            .map_err(|err| RhiError::InvalidState(err.to_string()))?;

        let mut teardown = DeletionQueue::new();

        let frames = FrameRing::new(
            &device,
            config.frames.frames_in_flight,
            config.frames.fence_timeout_ns(),
            &mut teardown,
        )
        .map_err(|err| abandon(&device, &mut teardown, err))?;

        let immediate = ImmediateExecutor::new(&device, &mut teardown)
            .map_err(|err| abandon(&device, &mut teardown, err))?;

        let mut descriptors = DescriptorAllocatorGrowable::new(
            &device,
            DescriptorAllocatorConfig::from(&config.descriptors),
        )
        .map_err(|err| abandon(&device, &mut teardown, err))?;

        let swapchain = match SwapchainCoordinator::new(&device, &surface) {
            Ok(swapchain) => swapchain,
            Err(err) => {
                descriptors.destroy_pools(&device);
                return Err(abandon(&device, &mut teardown, err));
            }
        };

        info!(
            "Frame orchestrator ready: {} frame(s) in flight, {}x{} surface",
            frames.frames_in_flight(),
            surface.extent().width,
            surface.extent().height
        );

        Ok(Self {
            device,
            surface,
            frames,
            immediate,
            descriptors,
            swapchain,
            teardown,
            acquire_timeout_ns: config.frames.acquire_timeout_ns(),
            shut_down: false,
        })
    }

    /// Runs one frame. `record` is called with the command buffer in the
    /// recording state and must leave the swapchain image in
    /// `PRESENT_SRC_KHR`.
    ///
    /// Errors are fatal; the caller should shut down.
    pub fn draw_frame<F>(&mut self, record: F) -> RhiResult<FrameOutcome>
    where
        F: FnOnce(&FrameContext),
    {
        if self.shut_down {
            return Err(RhiError::InvalidState(
                "draw_frame called after shutdown".into(),
            ));
        }

        if self.swapchain.is_minimized() {
            return Ok(FrameOutcome::Skipped(SkipReason::Minimized));
        }
        if self.swapchain.needs_recreate() {
            self.swapchain.recreate(&self.device, &mut self.surface)?;
        }

        let slot = self.frames.acquire_slot();
        self.frames.wait(&self.device, slot)?;

        let acquire_semaphore = self.frames.slot(slot).acquire_semaphore();
        let (image_index, acquire_suboptimal) = match self.acquire(acquire_semaphore)? {
            AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
            AcquireOutcome::OutOfDate => {
                self.swapchain.mark_out_of_date();
                self.swapchain.recreate(&self.device, &mut self.surface)?;
                match self.acquire(acquire_semaphore)? {
                    AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
                    AcquireOutcome::OutOfDate => {
                        warn!("Surface still out of date after recreation, skipping frame");
                        self.swapchain.mark_out_of_date();
                        return Ok(FrameOutcome::Skipped(SkipReason::OutOfDate));
                    }
                }
            }
        };

        let swapchain = self.swapchain.swapchain();
        let (swapchain_image, swapchain_view) = match (
            swapchain.images.get(image_index as usize),
            swapchain.views.get(image_index as usize),
        ) {
            (Some(&image), Some(&view)) => (image, view),
            _ => {
                return Err(RhiError::SwapchainError(format!(
                    "acquired image index {} out of range ({} images)",
                    image_index,
                    swapchain.images.len()
                )));
            }
        };
        let swapchain_extent = swapchain.extent;

        let cmd = self.frames.begin(&self.device, slot)?;
        let context = FrameContext {
            cmd,
            frame_number: self.frames.frame_number(),
            slot,
            image_index,
            swapchain_image,
            swapchain_view,
            swapchain_extent,
            draw_target: *self.swapchain.draw_target(),
        };
        record(&context);

        self.frames.submit_frame(&self.device, slot)?;
        let presented = self.frames.present(&mut self.surface, slot, image_index)?;
        if presented.needs_recreate() || acquire_suboptimal {
            debug!("Present reported {:?}", presented);
            self.swapchain.mark_out_of_date();
        }

        let frame_number = self.frames.frame_number();
        self.frames.advance();

        Ok(FrameOutcome::Presented {
            frame_number,
            image_index,
            slot,
        })
    }

    fn acquire(&mut self, semaphore: vk::Semaphore) -> RhiResult<AcquireOutcome> {
        self.surface
            .acquire_next_image(self.acquire_timeout_ns, semaphore)
    }

    /// Forwards a window size change; recreation happens at the start of
    /// the next frame.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.swapchain.notify_resize(width, height);
    }

    /// Records and runs one-off work, blocking until the GPU finished it.
    pub fn immediate_submit<F, R>(&mut self, work: F) -> RhiResult<R>
    where
        F: FnOnce(vk::CommandBuffer) -> R,
    {
        self.immediate.run(&self.device, work)
    }

    /// Uploads `data` into a new GPU-only buffer through a staging buffer,
    /// blocking until the copy finished. The returned buffer belongs to the
    /// caller; hand it to [`register_teardown`](Self::register_teardown) or
    /// [`defer_destroy`](Self::defer_destroy).
    pub fn upload_buffer(
        &mut self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> RhiResult<vk::Buffer> {
        self.immediate
            .upload_buffer(&self.device, data, usage, &mut self.teardown)
    }

    pub fn allocate_descriptor_set(
        &mut self,
        layout: vk::DescriptorSetLayout,
    ) -> RhiResult<vk::DescriptorSet> {
        self.descriptors.allocate(&self.device, layout)
    }

    /// Resets every descriptor pool after waiting on every frame fence.
    /// All previously allocated sets become invalid.
    pub fn clear_descriptor_pools(&mut self) -> RhiResult<()> {
        self.frames.wait_all(&self.device)?;
        self.descriptors.clear_pools(&self.device)
    }

    /// Hands an object to the global teardown queue, destroyed at shutdown.
    pub fn register_teardown(&mut self, action: DeferredAction) {
        self.teardown.push(action);
    }

    /// Destroys an object once the most recently submitted frame finished.
    pub fn defer_destroy(&mut self, action: DeferredAction) {
        let slot = self.frames.previous_slot();
        self.frames.defer_destroy(slot, action);
    }

    /// Waits for the device to go idle and destroys everything this
    /// orchestrator owns, newest first. Runs once; later calls are no-ops.
    ///
    /// A failed idle wait is reported but teardown still proceeds.
    pub fn shutdown(&mut self) -> RhiResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        let idle = self.device.wait_idle();
        if let Err(err) = &idle {
            error!("Device idle wait failed during shutdown: {}", err);
        }

        let deferred = self.frames.flush_deferred(&self.device);
        let swapchain = self.swapchain.destroy(&self.device);
        self.descriptors.destroy_pools(&self.device);
        let teardown = self.teardown.flush(&self.device);

        info!(
            "Frame orchestrator shut down after {} frame(s): {} deferred, {} swapchain, {} global object(s) destroyed",
            self.frames.frame_number(),
            deferred,
            swapchain,
            teardown
        );
        idle
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }

    pub fn swapchain(&self) -> &SwapchainCoordinator {
        &self.swapchain
    }

    pub fn descriptors(&self) -> &DescriptorAllocatorGrowable {
        &self.descriptors
    }

    pub fn teardown_len(&self) -> usize {
        self.teardown.len()
    }
}

impl<D: GpuDevice, S: PresentSurface> Drop for FrameOrchestrator<D, S> {
    fn drop(&mut self) {
        if !self.shut_down
            && let Err(err) = self.shutdown()
        {
            error!("Shutdown on drop failed: {}", err);
        }
    }
}

fn abandon<D: GpuDevice + ?Sized>(
    device: &D,
    teardown: &mut DeletionQueue,
    err: RhiError,
) -> RhiError {
    error!("Frame orchestrator setup failed: {}", err);
    teardown.flush(device);
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_rhi::backend::PresentOutcome;
    use inflight_rhi::headless::{DeviceCall, HeadlessDevice, HeadlessSurface};

    fn orchestrator(device: &HeadlessDevice) -> FrameOrchestrator<HeadlessDevice, HeadlessSurface> {
        let surface = device.create_surface(800, 600, 3);
        FrameOrchestrator::new(device.clone(), surface, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_frame_presents_acquired_image() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);

        let mut seen = None;
        let outcome = orchestrator.draw_frame(|ctx| seen = Some(*ctx)).unwrap();

        let ctx = seen.unwrap();
        assert_eq!(
            outcome,
            FrameOutcome::Presented {
                frame_number: 0,
                image_index: 0,
                slot: ctx.slot
            }
        );
        assert_eq!(ctx.swapchain_extent.width, 800);
        assert_eq!(orchestrator.frame_number(), 1);
    }

    #[test]
    fn test_minimized_skips_without_touching_fences() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.notify_resize(0, 0);
        device.clear_calls();

        let outcome = orchestrator.draw_frame(|_| {}).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::Minimized));
        assert!(device.calls().is_empty());
        assert_eq!(orchestrator.frame_number(), 0);
    }

    #[test]
    fn test_second_out_of_date_skips_frame() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.surface_mut().script_acquire(AcquireOutcome::OutOfDate);
        orchestrator.surface_mut().script_acquire(AcquireOutcome::OutOfDate);

        let outcome = orchestrator.draw_frame(|_| panic!("nothing to record")).unwrap();
        assert_eq!(outcome, FrameOutcome::Skipped(SkipReason::OutOfDate));
        assert!(orchestrator.swapchain().needs_recreate());

        // The slot fence was never reset, so the next frame proceeds.
        let outcome = orchestrator.draw_frame(|_| {}).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { frame_number: 0, .. }));
    }

    #[test]
    fn test_suboptimal_present_schedules_recreate() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.surface_mut().script_present(PresentOutcome::Suboptimal);

        orchestrator.draw_frame(|_| {}).unwrap();
        assert!(orchestrator.swapchain().needs_recreate());

        orchestrator.draw_frame(|_| {}).unwrap();
        assert!(!orchestrator.swapchain().needs_recreate());
        assert_eq!(device.count(|call| *call == DeviceCall::WaitIdle), 1);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.draw_frame(|_| {}).unwrap();

        orchestrator.shutdown().unwrap();
        orchestrator.shutdown().unwrap();
        assert_eq!(device.count(|call| *call == DeviceCall::WaitIdle), 1);
        assert!(matches!(
            orchestrator.draw_frame(|_| {}),
            Err(RhiError::InvalidState(_))
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_any_object_exists() {
        let device = HeadlessDevice::new();
        let surface = device.create_surface(800, 600, 3);
        let mut config = EngineConfig::default();
        config.descriptors.initial_sets = 0;

        let result = FrameOrchestrator::new(device.clone(), surface, &config);
        assert!(matches!(result, Err(RhiError::InvalidState(_))));
        assert!(device.calls().is_empty());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_failed_idle_wait_still_tears_everything_down() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.draw_frame(|_| {}).unwrap();
        device.fail_next_wait_idle();

        assert!(matches!(
            orchestrator.shutdown(),
            Err(RhiError::VulkanError(vk::Result::ERROR_DEVICE_LOST))
        ));
        assert!(orchestrator.is_shut_down());
        assert_eq!(orchestrator.teardown_len(), 0);

        // Only the presentable images the surface owns are still alive.
        assert_eq!(
            device.live_object_count(),
            orchestrator.surface().images().len()
        );

        orchestrator.shutdown().unwrap();
        assert_eq!(device.count(|call| *call == DeviceCall::WaitIdle), 1);

        drop(orchestrator);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_uploaded_buffer_is_released_with_teardown() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);

        let buffer = orchestrator
            .upload_buffer(&[0xAB; 32], vk::BufferUsageFlags::UNIFORM_BUFFER)
            .unwrap();
        assert_eq!(device.buffer_contents(buffer), Some(vec![0xAB; 32]));
        orchestrator.register_teardown(DeferredAction::Buffer(buffer));

        orchestrator.shutdown().unwrap();
        assert!(device.calls().contains(&DeviceCall::DestroyBuffer(buffer)));
        drop(orchestrator);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_drop_runs_shutdown() {
        let device = HeadlessDevice::new();
        {
            let mut orchestrator = orchestrator(&device);
            orchestrator.draw_frame(|_| {}).unwrap();
        }
        assert_eq!(device.count(|call| *call == DeviceCall::WaitIdle), 1);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_defer_destroy_runs_after_slot_fence() {
        let device = HeadlessDevice::new();
        let mut orchestrator = orchestrator(&device);
        orchestrator.draw_frame(|_| {}).unwrap();

        let semaphore = device.create_semaphore().unwrap();
        orchestrator.defer_destroy(DeferredAction::Semaphore(semaphore));

        // Frame 1 uses the other slot; frame 2 reuses slot 0 and flushes it.
        orchestrator.draw_frame(|_| {}).unwrap();
        assert!(!device.calls().contains(&DeviceCall::DestroySemaphore(semaphore)));
        orchestrator.draw_frame(|_| {}).unwrap();
        assert!(device.calls().contains(&DeviceCall::DestroySemaphore(semaphore)));
    }
}
