//! End-to-end frame pipeline tests on the headless backend.

use std::collections::HashMap;

use inflight_core::EngineConfig;
use inflight_renderer::{
    DeferredAction, DeletionQueue, DescriptorAllocatorConfig, DescriptorAllocatorGrowable,
    FrameOrchestrator, FrameOutcome, ResizeState,
};
use inflight_rhi::backend::{AcquireOutcome, GpuDevice};
use inflight_rhi::descriptor::PoolSizeRatio;
use inflight_rhi::headless::{DeviceCall, HeadlessDevice, HeadlessSurface};
use inflight_rhi::vk;

type Orchestrator = FrameOrchestrator<HeadlessDevice, HeadlessSurface>;

fn orchestrator(device: &HeadlessDevice) -> Orchestrator {
    let surface = device.create_surface(800, 600, 3);
    FrameOrchestrator::new(device.clone(), surface, &EngineConfig::default()).unwrap()
}

fn is_destroy(call: &DeviceCall) -> bool {
    matches!(
        call,
        DeviceCall::DestroyFence(_)
            | DeviceCall::DestroySemaphore(_)
            | DeviceCall::DestroyCommandPool(_)
            | DeviceCall::DestroyDescriptorPool(_)
            | DeviceCall::DestroyDescriptorSetLayout(_)
            | DeviceCall::DestroyImage(_)
            | DeviceCall::DestroyImageView(_)
    )
}

fn pool_capacities(calls: &[DeviceCall]) -> Vec<u32> {
    calls
        .iter()
        .filter_map(|call| match call {
            DeviceCall::CreateDescriptorPool { max_sets, .. } => Some(*max_sets),
            _ => None,
        })
        .collect()
}

#[test]
fn test_slot_reset_never_precedes_signaled_wait() {
    let device = HeadlessDevice::new();
    device.set_auto_complete(false);
    let mut orchestrator = orchestrator(&device);

    let mut fence_of_cmd = HashMap::new();
    for _ in 0..6 {
        let mut cmd_slot = None;
        orchestrator
            .draw_frame(|ctx| cmd_slot = Some((ctx.cmd, ctx.slot)))
            .unwrap();
        let (cmd, slot) = cmd_slot.unwrap();
        fence_of_cmd.insert(cmd, orchestrator.frames().slot(slot).render_fence());
        device.complete_all();
    }

    // Fence -> observed signaled since its last submission.
    let mut observed: HashMap<vk::Fence, bool> = HashMap::new();
    let mut checked = 0;
    for call in device.calls() {
        match call {
            DeviceCall::CreateFence { fence, signaled } => {
                observed.insert(fence, signaled);
            }
            DeviceCall::Submit { fence, .. } => {
                observed.insert(fence, false);
            }
            DeviceCall::WaitForFence {
                fence,
                signaled: true,
            } => {
                observed.insert(fence, true);
            }
            DeviceCall::ResetCommandBuffer(cmd) => {
                if let Some(fence) = fence_of_cmd.get(&cmd) {
                    assert_eq!(observed.get(fence), Some(&true), "cmd {cmd:?} reset early");
                    checked += 1;
                }
            }
            DeviceCall::ResetFence(fence) if fence_of_cmd.values().any(|f| *f == fence) => {
                assert_eq!(observed.get(&fence), Some(&true), "fence {fence:?} reset early");
            }
            _ => {}
        }
    }
    assert_eq!(checked, 6);
}

#[test]
fn test_deletion_queue_flushes_in_reverse() {
    let device = HeadlessDevice::new();
    let mut queue = DeletionQueue::new();

    let semaphores: Vec<vk::Semaphore> = (0..5).map(|_| device.create_semaphore().unwrap()).collect();
    for &semaphore in &semaphores {
        queue.push(DeferredAction::Semaphore(semaphore));
    }
    device.clear_calls();

    assert_eq!(queue.flush(&device), 5);

    let expected: Vec<DeviceCall> = semaphores
        .iter()
        .rev()
        .map(|&semaphore| DeviceCall::DestroySemaphore(semaphore))
        .collect();
    assert_eq!(device.calls(), expected);
    assert!(queue.is_empty());
}

#[test]
fn test_pool_capacity_grows_monotonically_up_to_ceiling() {
    let device = HeadlessDevice::new();
    let layout = device.create_descriptor_set_layout();
    let config = DescriptorAllocatorConfig {
        initial_sets: 2,
        growth_factor: 1.5,
        max_sets_per_pool: 5,
        ratios: vec![PoolSizeRatio {
            ty: vk::DescriptorType::STORAGE_IMAGE,
            ratio: 1.0,
        }],
    };
    let mut allocator = DescriptorAllocatorGrowable::new(&device, config).unwrap();

    for _ in 0..30 {
        allocator.allocate(&device, layout).unwrap();
    }

    let capacities = pool_capacities(&device.calls());
    assert!(capacities.len() > 3);
    assert!(capacities.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(capacities.iter().all(|&capacity| capacity <= 5));
    assert_eq!(capacities.last(), Some(&5));

    allocator.destroy_pools(&device);
    device.destroy_descriptor_set_layout(layout);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_clear_pools_then_allocate_creates_no_pool() {
    let device = HeadlessDevice::new();
    let layout = device.create_descriptor_set_layout();
    let mut allocator =
        DescriptorAllocatorGrowable::new(&device, DescriptorAllocatorConfig::default()).unwrap();

    for _ in 0..40 {
        allocator.allocate(&device, layout).unwrap();
    }
    assert!(allocator.exhausted_pool_count() > 0);

    allocator.clear_pools(&device).unwrap();
    assert_eq!(allocator.exhausted_pool_count(), 0);
    let created = allocator.pools_created();

    for _ in 0..5 {
        allocator.allocate(&device, layout).unwrap();
    }
    assert_eq!(allocator.pools_created(), created);

    allocator.destroy_pools(&device);
    device.destroy_descriptor_set_layout(layout);
}

#[test]
fn test_resize_while_in_flight_waits_for_idle_before_destroying() {
    let device = HeadlessDevice::new();
    device.set_auto_complete(false);
    let mut orchestrator = orchestrator(&device);

    orchestrator.draw_frame(|_| {}).unwrap();
    assert_eq!(device.in_flight(), 1);

    orchestrator.notify_resize(1024, 768);
    assert_eq!(orchestrator.swapchain().state(), ResizeState::ResizePending);
    assert_eq!(device.count(is_destroy), 0);

    orchestrator.draw_frame(|_| {}).unwrap();

    let calls = device.calls();
    let idle = calls
        .iter()
        .position(|call| *call == DeviceCall::WaitIdle)
        .unwrap();
    let first_destroy = calls.iter().position(is_destroy).unwrap();
    assert!(idle < first_destroy);
    assert_eq!(device.destroyed_while_in_flight(), 0);
    assert_eq!(orchestrator.swapchain().swapchain().extent.width, 1024);

    orchestrator.shutdown().unwrap();
}

#[test]
fn test_scenario_a_slots_alternate_and_teardown_waits_for_shutdown() {
    let device = HeadlessDevice::new();
    let mut orchestrator = orchestrator(&device);
    let teardown = orchestrator.teardown_len();

    let mut slots = Vec::new();
    for expected_frame in 0..5 {
        match orchestrator.draw_frame(|_| {}).unwrap() {
            FrameOutcome::Presented {
                frame_number, slot, ..
            } => {
                assert_eq!(frame_number, expected_frame);
                slots.push(slot.index());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    assert_eq!(device.count(is_destroy), 0);
    assert_eq!(orchestrator.teardown_len(), teardown);

    orchestrator.shutdown().unwrap();
    assert!(device.count(is_destroy) > 0);

    drop(orchestrator);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_scenario_b_fourth_allocation_rotates_pool() {
    let device = HeadlessDevice::new();
    let mut orchestrator = orchestrator(&device);
    let layout = device.create_descriptor_set_layout();
    orchestrator.register_teardown(DeferredAction::DescriptorSetLayout(layout));

    device.fail_allocation_at(4);
    for _ in 0..4 {
        orchestrator.allocate_descriptor_set(layout).unwrap();
    }

    let descriptors = orchestrator.descriptors();
    assert_eq!(descriptors.exhausted_pool_count(), 1);
    assert_eq!(descriptors.pools_created(), 2);
    assert_eq!(pool_capacities(&device.calls()), vec![10, 15]);
    assert_eq!(device.allocation_attempts(), 5);

    let failed = device.count(|call| {
        matches!(call, DeviceCall::AllocateDescriptorSet { set: None, .. })
    });
    assert_eq!(failed, 1);

    drop(orchestrator);
    assert_eq!(device.live_object_count(), 0);
}

#[test]
fn test_scenario_c_stale_acquire_recreates_once() {
    let device = HeadlessDevice::new();
    let mut orchestrator = orchestrator(&device);

    orchestrator.draw_frame(|_| {}).unwrap();
    orchestrator.draw_frame(|_| {}).unwrap();

    let old_views: Vec<vk::ImageView> = orchestrator
        .swapchain()
        .swapchain()
        .views
        .iter()
        .copied()
        .chain(std::iter::once(orchestrator.swapchain().draw_target().view()))
        .collect();
    let old_draw_image = orchestrator.swapchain().draw_target().image();

    device.clear_calls();
    orchestrator
        .surface_mut()
        .script_acquire(AcquireOutcome::OutOfDate);

    let outcome = orchestrator.draw_frame(|_| {}).unwrap();
    assert!(matches!(outcome, FrameOutcome::Presented { frame_number: 2, .. }));

    assert_eq!(
        orchestrator.swapchain().transitions(),
        &[
            ResizeState::Stable,
            ResizeState::ResizePending,
            ResizeState::Recreating,
            ResizeState::Stable
        ]
    );
    assert_eq!(orchestrator.swapchain().state(), ResizeState::Stable);

    let calls = device.calls();
    assert_eq!(calls.iter().filter(|call| **call == DeviceCall::WaitIdle).count(), 1);

    let destroyed: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, call)| matches!(call, DeviceCall::DestroyImageView(view) if old_views.contains(view)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(destroyed.len(), old_views.len());
    assert_eq!(calls.iter().filter(|call| is_destroy(call)).count(), old_views.len() + 1);
    assert!(calls.contains(&DeviceCall::DestroyImage(old_draw_image)));

    let first_create = calls
        .iter()
        .position(|call| matches!(call, DeviceCall::CreateImageView { .. }))
        .unwrap();
    assert!(destroyed.iter().all(|&i| i < first_create));

    orchestrator.shutdown().unwrap();
}

#[test]
fn test_immediate_submit_blocks_outside_frame_ring() {
    let device = HeadlessDevice::new();
    let mut orchestrator = orchestrator(&device);
    device.clear_calls();

    let value = orchestrator.immediate_submit(|_cmd| 42).unwrap();
    assert_eq!(value, 42);

    let submits: Vec<DeviceCall> = device
        .calls()
        .into_iter()
        .filter(|call| matches!(call, DeviceCall::Submit { .. }))
        .collect();
    assert_eq!(submits.len(), 1);
    match &submits[0] {
        DeviceCall::Submit { waits, signals, .. } => {
            assert!(waits.is_empty());
            assert!(signals.is_empty());
        }
        _ => unreachable!(),
    }
    assert_eq!(orchestrator.frame_number(), 0);
}

#[test]
fn test_frame_submit_waits_on_acquire_and_present_waits_on_submit() {
    let device = HeadlessDevice::new();
    let mut orchestrator = orchestrator(&device);
    device.clear_calls();

    let mut slot = None;
    orchestrator.draw_frame(|ctx| slot = Some(ctx.slot)).unwrap();
    let frame = orchestrator.frames().slot(slot.unwrap());

    let calls = device.calls();
    assert!(calls.iter().any(|call| matches!(
        call,
        DeviceCall::Submit { waits, signals, .. }
            if waits == &vec![frame.acquire_semaphore()] && signals == &vec![frame.submit_semaphore()]
    )));
    assert!(calls.iter().any(|call| matches!(
        call,
        DeviceCall::Present { waits, .. } if waits == &vec![frame.submit_semaphore()]
    )));
}
