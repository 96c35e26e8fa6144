//! Command recording helpers for frame content.
//!
//! [`CommandRecorder`] wraps a command buffer that is already in the
//! recording state (the frame loop begins and ends it) and records the
//! layout transitions, clears and blits that move an offscreen image onto a
//! presentable one.
//!
//! # Example
//!
//! ```no_run
//! use inflight_rhi::command::CommandRecorder;
//! use inflight_rhi::device::Device;
//! use inflight_rhi::vk;
//!
//! # fn record(device: &Device, cmd: vk::CommandBuffer, image: vk::Image) {
//! let recorder = CommandRecorder::new(device.handle(), cmd);
//! recorder.transition_image(image, vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
//! recorder.clear_color_image(image, [0.0, 0.0, 1.0, 1.0]);
//! # }
//! ```

use ash::vk;

/// Records into a command buffer owned by someone else.
pub struct CommandRecorder<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
}

impl<'a> CommandRecorder<'a> {
    pub fn new(device: &'a ash::Device, cmd: vk::CommandBuffer) -> Self {
        Self { device, cmd }
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Moves every mip and layer of `image` from `old` to `new` layout.
    ///
    /// Uses a full ALL_COMMANDS barrier. Simple and correct, not fast; fine
    /// for a handful of transitions per frame.
    pub fn transition_image(&self, image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout) {
        let barrier = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags2::MEMORY_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .dst_access_mask(vk::AccessFlags2::MEMORY_WRITE | vk::AccessFlags2::MEMORY_READ)
            .old_layout(old)
            .new_layout(new)
            .image(image)
            .subresource_range(subresource_range(aspect_for_layout(new)));

        let barriers = [barrier];
        let dependency_info = vk::DependencyInfo::default().image_memory_barriers(&barriers);

        unsafe {
            self.device
                .cmd_pipeline_barrier2(self.cmd, &dependency_info);
        }
    }

    /// Clears a color image in GENERAL layout.
    pub fn clear_color_image(&self, image: vk::Image, rgba: [f32; 4]) {
        let color = vk::ClearColorValue { float32: rgba };
        let ranges = [subresource_range(vk::ImageAspectFlags::COLOR)];

        unsafe {
            self.device.cmd_clear_color_image(
                self.cmd,
                image,
                vk::ImageLayout::GENERAL,
                &color,
                &ranges,
            );
        }
    }

    /// Copies `src` (TRANSFER_SRC_OPTIMAL) onto `dst` (TRANSFER_DST_OPTIMAL),
    /// scaling with linear filtering when the extents differ.
    pub fn blit_image_to_image(
        &self,
        src: vk::Image,
        dst: vk::Image,
        src_extent: vk::Extent2D,
        dst_extent: vk::Extent2D,
    ) {
        let region = vk::ImageBlit2::default()
            .src_offsets([vk::Offset3D::default(), far_corner(src_extent)])
            .dst_offsets([vk::Offset3D::default(), far_corner(dst_extent)])
            .src_subresource(color_layers())
            .dst_subresource(color_layers());

        let regions = [region];
        let blit_info = vk::BlitImageInfo2::default()
            .src_image(src)
            .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
            .dst_image(dst)
            .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .filter(vk::Filter::LINEAR)
            .regions(&regions);

        unsafe {
            self.device.cmd_blit_image2(self.cmd, &blit_info);
        }
    }
}

/// Depth layouts transition the depth aspect; everything else is color.
pub fn aspect_for_layout(layout: vk::ImageLayout) -> vk::ImageAspectFlags {
    match layout {
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL
        | vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL
        | vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => vk::ImageAspectFlags::DEPTH,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Every mip level and array layer of one aspect.
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(vk::REMAINING_MIP_LEVELS)
        .base_array_layer(0)
        .layer_count(vk::REMAINING_ARRAY_LAYERS)
}

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .mip_level(0)
        .base_array_layer(0)
        .layer_count(1)
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}
