//! Offscreen color target rendered into each frame.
//!
//! Frame content is drawn into a [`DrawTarget`] at the surface's extent and
//! then blitted onto the acquired swapchain image. The target is
//! size-dependent: it is rebuilt with the swapchain on every resize.

use ash::vk;
use inflight_rhi::RhiResult;
use inflight_rhi::backend::{GpuDevice, ImageDesc};
use tracing::debug;

use crate::deletion_queue::{DeferredAction, DeletionQueue};

/// High-precision format so intermediate results don't band.
pub const DRAW_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Storage for compute writes, color attachment for raster, transfer both
/// ways for clears and the final blit.
pub const DRAW_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw()
        | vk::ImageUsageFlags::STORAGE.as_raw()
        | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// The default value holds null handles and stands in while no target
/// exists.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrawTarget {
    image: vk::Image,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
}

impl DrawTarget {
    /// Creates the image and its view. Destruction of both is pushed onto
    /// `deletion_queue`, image first so the view is destroyed first.
    pub fn new<D: GpuDevice + ?Sized>(
        device: &D,
        extent: vk::Extent2D,
        deletion_queue: &mut DeletionQueue,
    ) -> RhiResult<Self> {
        let image = device.create_image(&ImageDesc {
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            format: DRAW_FORMAT,
            usage: DRAW_USAGE,
        })?;
        deletion_queue.push(DeferredAction::Image(image));

        let view = device.create_image_view(image, DRAW_FORMAT, vk::ImageAspectFlags::COLOR)?;
        deletion_queue.push(DeferredAction::ImageView(view));

        debug!("Draw target created: {}x{}", extent.width, extent.height);

        Ok(Self {
            image,
            view,
            extent,
            format: DRAW_FORMAT,
        })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
}
