//! Vulkan bring-up and per-frame recording for the windowed app.

use std::sync::Arc;

use anyhow::{Context, Result};
use ash::vk;
use tracing::{debug, info};

use inflight_core::{EngineConfig, PresentModePreference};
use inflight_platform::{Surface, Window};
use inflight_renderer::{DeferredAction, FrameContext, FrameOrchestrator, FrameOutcome};
use inflight_rhi::RhiResult;
use inflight_rhi::command::CommandRecorder;
use inflight_rhi::descriptor::{DescriptorLayoutBuilder, image_info, update_descriptor_sets};
use inflight_rhi::device::Device;
use inflight_rhi::instance::Instance;
use inflight_rhi::physical_device::select_physical_device;
use inflight_rhi::swapchain::Swapchain;

/// Frames per full pulse of the clear color.
const PULSE_PERIOD_FRAMES: f32 = 120.0;

/// Owns the Vulkan objects behind the window.
///
/// Fields drop top to bottom: the orchestrator shuts down and releases the
/// swapchain, then the device, the surface and finally the instance.
pub struct Renderer {
    orchestrator: FrameOrchestrator<Arc<Device>, Swapchain>,
    device: Arc<Device>,
    /// Storage image binding for the draw target. Kept pointing at the
    /// current target across resizes; no pipeline binds it yet, so it only
    /// exercises the descriptor allocator and descriptor writes.
    draw_set: vk::DescriptorSet,
    /// Draw target view `draw_set` currently points at.
    bound_view: vk::ImageView,
    _surface: Surface,
    _instance: Instance,
}

impl Renderer {
    pub fn new(window: &Window, config: &EngineConfig) -> Result<Self> {
        let extensions = window.required_extensions()?;
        let instance = Instance::new(config.vulkan.validation, &extensions)
            .context("creating Vulkan instance")?;
        let surface = window.create_surface(instance.entry(), instance.handle())?;

        let physical = select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical)?;

        let (width, height) = window.size();
        let swapchain = Swapchain::new(
            &instance,
            Arc::clone(&device),
            surface.handle(),
            width,
            height,
            present_mode(config.vulkan.present_mode),
        )?;

        let mut orchestrator = FrameOrchestrator::new(Arc::clone(&device), swapchain, config)?;

        let mut builder = DescriptorLayoutBuilder::default();
        builder.add_binding(0, vk::DescriptorType::STORAGE_IMAGE);
        let layout = builder.build(&device, vk::ShaderStageFlags::COMPUTE)?;
        orchestrator.register_teardown(DeferredAction::DescriptorSetLayout(layout));

        let draw_set = orchestrator.allocate_descriptor_set(layout)?;
        let draw_target = *orchestrator.swapchain().draw_target();
        bind_draw_target(&device, draw_set, draw_target.view());

        // Start the draw image from a known layout and color.
        let recorder_device = Arc::clone(&device);
        orchestrator.immediate_submit(move |cmd| {
            let recorder = CommandRecorder::new(recorder_device.handle(), cmd);
            recorder.transition_image(
                draw_target.image(),
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::GENERAL,
            );
            recorder.clear_color_image(draw_target.image(), [0.0, 0.0, 0.0, 1.0]);
        })?;

        info!("Renderer initialized at {}x{}", width, height);

        Ok(Self {
            orchestrator,
            device,
            draw_set,
            bound_view: draw_target.view(),
            _surface: surface,
            _instance: instance,
        })
    }

    pub fn render_frame(&mut self) -> RhiResult<FrameOutcome> {
        let device = &self.device;
        let draw_set = self.draw_set;
        let bound_view = &mut self.bound_view;

        self.orchestrator.draw_frame(|ctx| {
            // Every frame that used the old view completed before the
            // resize, so the set can be rewritten here.
            if ctx.draw_target.view() != *bound_view {
                bind_draw_target(device, draw_set, ctx.draw_target.view());
                *bound_view = ctx.draw_target.view();
            }
            record_frame(device, ctx);
        })
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.orchestrator.notify_resize(width, height);
    }

    pub fn frame_number(&self) -> u64 {
        self.orchestrator.frame_number()
    }

    pub fn shutdown(&mut self) -> RhiResult<()> {
        self.orchestrator.shutdown()
    }
}

/// Clears the draw target with a pulsing color and blits it onto the
/// swapchain image, leaving that image ready to present.
fn record_frame(device: &Device, ctx: &FrameContext) {
    let recorder = CommandRecorder::new(device.handle(), ctx.cmd);
    let draw = ctx.draw_target;
    let flash = (ctx.frame_number as f32 / PULSE_PERIOD_FRAMES).sin().abs();

    recorder.transition_image(draw.image(), vk::ImageLayout::UNDEFINED, vk::ImageLayout::GENERAL);
    recorder.clear_color_image(draw.image(), [0.0, 0.0, flash, 1.0]);

    recorder.transition_image(
        draw.image(),
        vk::ImageLayout::GENERAL,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );
    recorder.transition_image(
        ctx.swapchain_image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );
    recorder.blit_image_to_image(
        draw.image(),
        ctx.swapchain_image,
        draw.extent(),
        ctx.swapchain_extent,
    );
    recorder.transition_image(
        ctx.swapchain_image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    );
}

fn bind_draw_target(device: &Device, set: vk::DescriptorSet, view: vk::ImageView) {
    let images = [image_info(vk::Sampler::null(), view, vk::ImageLayout::GENERAL)];
    let writes = [vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(&images)];
    update_descriptor_sets(device, &writes);
    debug!("Draw target view {:?} bound to {:?}", view, set);
}

fn present_mode(preference: PresentModePreference) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Fifo => vk::PresentModeKHR::FIFO,
        PresentModePreference::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePreference::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}
