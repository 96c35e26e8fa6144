//! Swapchain resize coordination.
//!
//! [`SwapchainCoordinator`] owns everything whose size follows the window:
//! the per-image views of the presentable images and the offscreen
//! [`DrawTarget`]. Their destruction lives in a swapchain-scoped
//! [`DeletionQueue`] that is flushed mid-run only while recreating, after a
//! full device idle-wait.
//!
//! ```text
//! Stable --notify_resize / mark_out_of_date--> ResizePending
//! ResizePending --recreate--> Recreating --(new resources)--> Stable
//! Recreating --(failure)--> ResizePending
//! ```
//!
//! A failed recreation leaves no views and a null draw target behind, so
//! nothing stale can be handed to a frame; the next attempt starts over.
//!
//! A zero-sized resize (minimized window) does not schedule a recreation;
//! it marks the surface minimized until a real size arrives.

use ash::vk;
use inflight_rhi::backend::{GpuDevice, PresentSurface};
use inflight_rhi::{RhiError, RhiResult};
use tracing::{debug, info, warn};

use crate::deletion_queue::{DeferredAction, DeletionQueue};
use crate::draw_target::DrawTarget;

/// Resize protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeState {
    Stable,
    ResizePending,
    Recreating,
}

/// Presentable images with the views this side owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainState {
    /// Owned by the presentation surface.
    pub images: Vec<vk::Image>,
    /// One per image, owned here.
    pub views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub format: vk::Format,
}

#[derive(Debug)]
pub struct SwapchainCoordinator {
    state: ResizeState,
    /// States visited during the most recent resize cycle.
    transitions: Vec<ResizeState>,
    swapchain: SwapchainState,
    draw_target: DrawTarget,
    deletion_queue: DeletionQueue,
    pending_size: Option<(u32, u32)>,
    minimized: bool,
    recreate_count: u64,
}

impl SwapchainCoordinator {
    /// Builds views and the draw target for the surface as it is now.
    pub fn new<D, S>(device: &D, surface: &S) -> RhiResult<Self>
    where
        D: GpuDevice + ?Sized,
        S: PresentSurface + ?Sized,
    {
        let mut deletion_queue = DeletionQueue::new();
        let built = build_resources(device, surface, &mut deletion_queue);
        let (swapchain, draw_target) = match built {
            Ok(resources) => resources,
            Err(err) => {
                deletion_queue.flush(device);
                return Err(err);
            }
        };

        Ok(Self {
            state: ResizeState::Stable,
            transitions: Vec::new(),
            swapchain,
            draw_target,
            deletion_queue,
            pending_size: None,
            minimized: false,
            recreate_count: 0,
        })
    }

    /// Records a window size change. A zero dimension marks the surface
    /// minimized instead of scheduling a recreation.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            if !self.minimized {
                info!("Surface minimized, pausing presentation");
            }
            self.minimized = true;
            return;
        }

        if self.minimized {
            info!("Surface restored at {}x{}", width, height);
        }
        self.minimized = false;
        self.pending_size = Some((width, height));
        self.enter_pending();
    }

    /// Records that acquire or present reported a stale surface.
    pub fn mark_out_of_date(&mut self) {
        warn!("Swapchain out of date, scheduling recreation");
        self.enter_pending();
    }

    fn enter_pending(&mut self) {
        if self.state == ResizeState::Stable {
            self.transitions.clear();
            self.transitions.push(ResizeState::Stable);
            self.state = ResizeState::ResizePending;
            self.transitions.push(ResizeState::ResizePending);
        }
    }

    /// Whether a recreation is pending and the surface can take one.
    #[inline]
    pub fn needs_recreate(&self) -> bool {
        self.state == ResizeState::ResizePending && !self.minimized
    }

    /// Idle-waits the device, destroys the old size-dependent resources and
    /// builds new ones at the pending size.
    ///
    /// The frame counter lives elsewhere and is untouched.
    pub fn recreate<D, S>(&mut self, device: &D, surface: &mut S) -> RhiResult<()>
    where
        D: GpuDevice + ?Sized,
        S: PresentSurface + ?Sized,
    {
        if self.state != ResizeState::ResizePending {
            return Err(RhiError::InvalidState(format!(
                "recreate requested while {:?}",
                self.state
            )));
        }

        self.state = ResizeState::Recreating;
        self.transitions.push(ResizeState::Recreating);

        let requested = self.pending_size.take();
        if let Err(err) = self.rebuild(device, surface, requested) {
            warn!("Swapchain recreation failed: {}", err);
            self.swapchain.images.clear();
            self.swapchain.views.clear();
            self.draw_target = DrawTarget::default();
            self.pending_size = requested;
            self.state = ResizeState::ResizePending;
            self.transitions.push(ResizeState::ResizePending);
            return Err(err);
        }

        self.state = ResizeState::Stable;
        self.transitions.push(ResizeState::Stable);
        self.recreate_count += 1;

        info!(
            "Swapchain resources recreated at {}x{}",
            self.swapchain.extent.width, self.swapchain.extent.height
        );
        Ok(())
    }

    fn rebuild<D, S>(
        &mut self,
        device: &D,
        surface: &mut S,
        requested: Option<(u32, u32)>,
    ) -> RhiResult<()>
    where
        D: GpuDevice + ?Sized,
        S: PresentSurface + ?Sized,
    {
        device.wait_idle()?;
        let destroyed = self.deletion_queue.flush(device);
        debug!("Released {} swapchain-scoped object(s)", destroyed);

        let current = surface.extent();
        let (width, height) = requested.unwrap_or((current.width, current.height));
        surface.recreate(width, height)?;

        let (swapchain, draw_target) = build_resources(device, surface, &mut self.deletion_queue)?;
        self.swapchain = swapchain;
        self.draw_target = draw_target;
        Ok(())
    }

    /// Destroys the current size-dependent resources. The caller guarantees
    /// the device is idle.
    pub fn destroy<D: GpuDevice + ?Sized>(&mut self, device: &D) -> usize {
        self.swapchain.views.clear();
        self.deletion_queue.flush(device)
    }

    #[inline]
    pub fn state(&self) -> ResizeState {
        self.state
    }

    pub fn transitions(&self) -> &[ResizeState] {
        &self.transitions
    }

    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn recreate_count(&self) -> u64 {
        self.recreate_count
    }

    pub fn swapchain(&self) -> &SwapchainState {
        &self.swapchain
    }

    pub fn draw_target(&self) -> &DrawTarget {
        &self.draw_target
    }
}

fn build_resources<D, S>(
    device: &D,
    surface: &S,
    deletion_queue: &mut DeletionQueue,
) -> RhiResult<(SwapchainState, DrawTarget)>
where
    D: GpuDevice + ?Sized,
    S: PresentSurface + ?Sized,
{
    let images = surface.images().to_vec();
    let format = surface.format();
    let extent = surface.extent();

    let mut views = Vec::with_capacity(images.len());
    for &image in &images {
        let view = device.create_image_view(image, format, vk::ImageAspectFlags::COLOR)?;
        deletion_queue.push(DeferredAction::ImageView(view));
        views.push(view);
    }

    let draw_target = DrawTarget::new(device, extent, deletion_queue)?;

    Ok((
        SwapchainState {
            images,
            views,
            extent,
            format,
        },
        draw_target,
    ))
}
