//! Frame-overlap scheduling.
//!
//! The [`FrameRing`] owns N [`FrameSlot`]s, each with its own command
//! buffer, completion fence and semaphore pair, so the CPU can record frame
//! N+1 while the GPU still executes frame N. Slot `k` is reused only after
//! its fence from the previous use has been observed signaled.
//!
//! # Synchronization Flow
//!
//! ```text
//! 1. acquire_slot   frame_number % N
//! 2. wait           bounded wait on the slot fence (timeout is fatal),
//!                   then flush the slot's deferred destructions
//! 3. (acquire the presentable image, signaling acquire_semaphore)
//! 4. begin          reset fence and command buffer, begin recording
//! 5. submit         wait acquire_semaphore at COLOR_ATTACHMENT_OUTPUT,
//!                   signal submit_semaphore and the slot fence
//! 6. present        wait submit_semaphore
//! 7. advance
//! ```
//!
//! The fence is reset in `begin`, after image acquisition succeeded, so a
//! frame skipped because the surface went stale never leaves an unsignaled
//! fence behind.

use ash::vk;
use inflight_rhi::backend::{FenceWait, GpuDevice, PresentOutcome, PresentSurface, SemaphoreWait};
use inflight_rhi::{RhiError, RhiResult};
use tracing::{debug, error, info};

use crate::deletion_queue::{DeferredAction, DeletionQueue};

/// Index of a slot in the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(usize);

impl SlotHandle {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotPhase {
    /// Submitted (or freshly created); the fence has not been observed since.
    Pending,
    /// The fence was observed signaled; the slot may be reset.
    Idle,
    /// Between `begin` and `submit`.
    Recording,
}

/// Per-frame resources.
#[derive(Debug)]
pub struct FrameSlot {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    render_fence: vk::Fence,
    acquire_semaphore: vk::Semaphore,
    submit_semaphore: vk::Semaphore,
    /// Destructions that wait for this slot's next fence signal.
    deletion_queue: DeletionQueue,
    phase: SlotPhase,
}

impl FrameSlot {
    fn new<D: GpuDevice + ?Sized>(device: &D, teardown: &mut DeletionQueue) -> RhiResult<Self> {
        let command_pool = device.create_command_pool()?;
        teardown.push(DeferredAction::CommandPool(command_pool));
        let command_buffer = device.allocate_command_buffer(command_pool)?;

        // Signaled so the first wait returns immediately.
        let render_fence = device.create_fence(true)?;
        teardown.push(DeferredAction::Fence(render_fence));
        let acquire_semaphore = device.create_semaphore()?;
        teardown.push(DeferredAction::Semaphore(acquire_semaphore));
        let submit_semaphore = device.create_semaphore()?;
        teardown.push(DeferredAction::Semaphore(submit_semaphore));

        Ok(Self {
            command_pool,
            command_buffer,
            render_fence,
            acquire_semaphore,
            submit_semaphore,
            deletion_queue: DeletionQueue::new(),
            phase: SlotPhase::Pending,
        })
    }

    #[inline]
    pub fn command_pool(&self) -> vk::CommandPool {
        self.command_pool
    }

    #[inline]
    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    #[inline]
    pub fn render_fence(&self) -> vk::Fence {
        self.render_fence
    }

    /// Signaled by image acquisition; waited on by the submission.
    #[inline]
    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore
    }

    /// Signaled by the submission; waited on by presentation.
    #[inline]
    pub fn submit_semaphore(&self) -> vk::Semaphore {
        self.submit_semaphore
    }

    pub fn pending_destructions(&self) -> usize {
        self.deletion_queue.len()
    }
}

/// Ring of frame slots selected round-robin by frame number.
#[derive(Debug)]
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    frame_number: u64,
    fence_timeout_ns: u64,
}

impl FrameRing {
    /// Creates `frames_in_flight` slots. Their objects are registered with
    /// `teardown` in creation order.
    pub fn new<D: GpuDevice + ?Sized>(
        device: &D,
        frames_in_flight: usize,
        fence_timeout_ns: u64,
        teardown: &mut DeletionQueue,
    ) -> RhiResult<Self> {
        if frames_in_flight == 0 {
            return Err(RhiError::InvalidState(
                "frame ring needs at least one slot".into(),
            ));
        }

        let mut slots = Vec::with_capacity(frames_in_flight);
        for i in 0..frames_in_flight {
            slots.push(FrameSlot::new(device, teardown)?);
            debug!("Created frame slot {}", i);
        }

        info!("Frame ring created with {} frames in flight", frames_in_flight);

        Ok(Self {
            slots,
            frame_number: 0,
            fence_timeout_ns,
        })
    }

    /// Slot for the current frame: `frame_number % N`.
    #[inline]
    pub fn acquire_slot(&self) -> SlotHandle {
        SlotHandle((self.frame_number % self.slots.len() as u64) as usize)
    }

    /// Slot used by the most recently submitted frame.
    #[inline]
    pub fn previous_slot(&self) -> SlotHandle {
        let len = self.slots.len() as u64;
        SlotHandle(((self.frame_number + len - 1) % len) as usize)
    }

    #[inline]
    pub fn slot(&self, slot: SlotHandle) -> &FrameSlot {
        &self.slots[slot.0]
    }

    #[inline]
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Blocks until the slot's previous submission finished, then runs the
    /// destructions deferred on it.
    ///
    /// A timeout means the GPU stopped making progress and is returned as
    /// [`RhiError::FenceTimeout`]; it is never retried.
    pub fn wait<D: GpuDevice + ?Sized>(&mut self, device: &D, slot: SlotHandle) -> RhiResult<()> {
        let timeout_ns = self.fence_timeout_ns;
        let frame = &mut self.slots[slot.0];

        match device.wait_for_fence(frame.render_fence, timeout_ns)? {
            FenceWait::Signaled => {}
            FenceWait::TimedOut => {
                error!(
                    "Frame slot {} fence not signaled within {} ns",
                    slot.0, timeout_ns
                );
                return Err(RhiError::FenceTimeout {
                    what: "frame fence",
                    timeout_ns,
                });
            }
        }

        if frame.phase == SlotPhase::Pending {
            frame.phase = SlotPhase::Idle;
        }
        frame.deletion_queue.flush(device);
        Ok(())
    }

    /// Resets the slot's fence and command buffer and begins recording.
    pub fn begin<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: SlotHandle,
    ) -> RhiResult<vk::CommandBuffer> {
        let frame = &mut self.slots[slot.0];
        debug_assert_eq!(
            frame.phase,
            SlotPhase::Idle,
            "frame slot reset before its fence was observed signaled"
        );
        if frame.phase != SlotPhase::Idle {
            return Err(RhiError::InvalidState(format!(
                "frame slot {} is {:?}, not idle",
                slot.0, frame.phase
            )));
        }

        device.reset_fence(frame.render_fence)?;
        device.reset_command_buffer(frame.command_buffer)?;
        device.begin_command_buffer(frame.command_buffer)?;
        frame.phase = SlotPhase::Recording;
        Ok(frame.command_buffer)
    }

    /// Ends recording and submits the slot's command buffer, signaling its
    /// fence on completion.
    pub fn submit<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: SlotHandle,
        waits: &[SemaphoreWait],
        signals: &[vk::Semaphore],
    ) -> RhiResult<()> {
        let frame = &mut self.slots[slot.0];
        debug_assert_eq!(frame.phase, SlotPhase::Recording, "submit without begin");
        if frame.phase != SlotPhase::Recording {
            return Err(RhiError::InvalidState(format!(
                "frame slot {} submitted while {:?}",
                slot.0, frame.phase
            )));
        }

        device.end_command_buffer(frame.command_buffer)?;
        device.submit(frame.command_buffer, waits, signals, frame.render_fence)?;
        frame.phase = SlotPhase::Pending;
        Ok(())
    }

    /// Submits with the standard frame dependencies: wait for the acquired
    /// image before color output, signal the slot's submit semaphore.
    pub fn submit_frame<D: GpuDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: SlotHandle,
    ) -> RhiResult<()> {
        let waits = [SemaphoreWait::color_output(self.slots[slot.0].acquire_semaphore)];
        let signals = [self.slots[slot.0].submit_semaphore];
        self.submit(device, slot, &waits, &signals)
    }

    /// Presents `image_index` once the slot's submission has finished rendering.
    pub fn present<S: PresentSurface + ?Sized>(
        &self,
        surface: &mut S,
        slot: SlotHandle,
        image_index: u32,
    ) -> RhiResult<PresentOutcome> {
        surface.present(image_index, &[self.slots[slot.0].submit_semaphore])
    }

    /// Moves to the next frame.
    #[inline]
    pub fn advance(&mut self) {
        self.frame_number += 1;
    }

    /// Defers a destruction until `slot`'s next observed fence signal.
    pub fn defer_destroy(&mut self, slot: SlotHandle, action: DeferredAction) {
        self.slots[slot.0].deletion_queue.push(action);
    }

    /// Waits on every slot fence with the bounded timeout.
    pub fn wait_all<D: GpuDevice + ?Sized>(&mut self, device: &D) -> RhiResult<()> {
        for i in 0..self.slots.len() {
            self.wait(device, SlotHandle(i))?;
        }
        Ok(())
    }

    /// Runs every slot's deferred destructions regardless of fence state.
    /// Only for shutdown, after a device idle-wait.
    pub fn flush_deferred<D: GpuDevice + ?Sized>(&mut self, device: &D) -> usize {
        self.slots
            .iter_mut()
            .map(|slot| slot.deletion_queue.flush(device))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_rhi::headless::{DeviceCall, HeadlessDevice};

    const TIMEOUT: u64 = 1_000_000_000;

    fn ring(device: &HeadlessDevice, count: usize) -> (FrameRing, DeletionQueue) {
        let mut teardown = DeletionQueue::new();
        let ring = FrameRing::new(device, count, TIMEOUT, &mut teardown).unwrap();
        (ring, teardown)
    }

    fn run_cycle(device: &HeadlessDevice, ring: &mut FrameRing) -> SlotHandle {
        let slot = ring.acquire_slot();
        ring.wait(device, slot).unwrap();
        ring.begin(device, slot).unwrap();
        ring.submit(device, slot, &[], &[]).unwrap();
        ring.advance();
        slot
    }

    #[test]
    fn test_slots_rotate_round_robin() {
        let device = HeadlessDevice::new();
        let (mut ring, mut teardown) = ring(&device, 2);

        let slots: Vec<usize> = (0..5).map(|_| run_cycle(&device, &mut ring).index()).collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
        assert_eq!(ring.frame_number(), 5);

        teardown.flush(&device);
    }

    #[test]
    fn test_new_registers_teardown_for_every_object() {
        let device = HeadlessDevice::new();
        let (ring, mut teardown) = ring(&device, 3);

        assert_eq!(ring.frames_in_flight(), 3);
        // Pool, fence and two semaphores per slot.
        assert_eq!(teardown.len(), 12);
        teardown.flush(&device);
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_zero_slots_rejected() {
        let device = HeadlessDevice::new();
        let mut teardown = DeletionQueue::new();
        assert!(FrameRing::new(&device, 0, TIMEOUT, &mut teardown).is_err());
    }

    #[test]
    fn test_wait_timeout_is_fatal() {
        let device = HeadlessDevice::new();
        let (mut ring, mut teardown) = ring(&device, 1);
        device.set_auto_complete(false);

        run_cycle(&device, &mut ring);
        let slot = ring.acquire_slot();
        let err = ring.wait(&device, slot).unwrap_err();
        assert!(matches!(err, RhiError::FenceTimeout { .. }));

        device.complete_all();
        teardown.flush(&device);
    }

    #[test]
    fn test_fence_reset_follows_wait() {
        let device = HeadlessDevice::new();
        let (mut ring, mut teardown) = ring(&device, 2);
        let fence = ring.slot(SlotHandle(0)).render_fence();
        device.clear_calls();

        run_cycle(&device, &mut ring);

        let calls = device.calls();
        let wait = calls
            .iter()
            .position(|call| *call == DeviceCall::WaitForFence { fence, signaled: true })
            .unwrap();
        let reset = calls
            .iter()
            .position(|call| *call == DeviceCall::ResetFence(fence))
            .unwrap();
        assert!(wait < reset);

        teardown.flush(&device);
    }

    #[test]
    fn test_deferred_destruction_waits_for_slot_fence() {
        let device = HeadlessDevice::new();
        let (mut ring, mut teardown) = ring(&device, 2);
        device.set_auto_complete(false);

        let slot = run_cycle(&device, &mut ring);
        let semaphore = device.create_semaphore().unwrap();
        ring.defer_destroy(slot, DeferredAction::Semaphore(semaphore));

        // Slot 1 is unrelated; the semaphore survives its cycle.
        device.complete_all();
        run_cycle(&device, &mut ring);
        assert_eq!(ring.slot(slot).pending_destructions(), 1);

        device.complete_all();
        ring.wait(&device, slot).unwrap();
        assert_eq!(ring.slot(slot).pending_destructions(), 0);
        assert!(device.calls().contains(&DeviceCall::DestroySemaphore(semaphore)));

        teardown.flush(&device);
    }

    #[test]
    #[should_panic(expected = "fence was observed")]
    #[cfg(debug_assertions)]
    fn test_begin_without_wait_panics_in_debug() {
        let device = HeadlessDevice::new();
        let (mut ring, _teardown) = ring(&device, 1);
        let slot = ring.acquire_slot();
        let _ = ring.begin(&device, slot);
    }
}
