//! Frame orchestration on top of the RHI.
//!
//! This crate schedules overlapping frames and manages the lifetimes of the
//! GPU objects they use:
//! - Frame ring with per-slot fences and semaphores
//! - LIFO deletion queues (global and per-frame)
//! - Growable descriptor pool allocation
//! - Swapchain resize coordination
//! - Blocking immediate submissions and staging uploads
//!
//! Everything is generic over [`inflight_rhi::backend::GpuDevice`] and
//! [`inflight_rhi::backend::PresentSurface`], so it runs unchanged on the
//! Vulkan backend and on the headless one used in tests.

pub mod deletion_queue;
pub mod descriptor_allocator;
pub mod draw_target;
pub mod frame;
pub mod immediate;
pub mod orchestrator;
pub mod swapchain_coordinator;

pub use deletion_queue::{DeferredAction, DeletionQueue};
pub use descriptor_allocator::{DescriptorAllocatorConfig, DescriptorAllocatorGrowable};
pub use draw_target::DrawTarget;
pub use frame::{FrameRing, FrameSlot, SlotHandle};
pub use immediate::ImmediateExecutor;
pub use orchestrator::{FrameContext, FrameOrchestrator, FrameOutcome, SkipReason};
pub use swapchain_coordinator::{ResizeState, SwapchainCoordinator, SwapchainState};
