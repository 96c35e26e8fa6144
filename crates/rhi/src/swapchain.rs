//! The real [`PresentSurface`]: a `VkSwapchainKHR` bound to one window surface.
//!
//! [`Swapchain`] owns the swapchain handle and the images the driver hands
//! back. Views over those images are size-dependent state and live with the
//! caller, which destroys them before asking for a [`PresentSurface::recreate`].
//!
//! ```no_run
//! use inflight_rhi::device::Device;
//! use inflight_rhi::instance::Instance;
//! use inflight_rhi::physical_device::select_physical_device;
//! use inflight_rhi::swapchain::Swapchain;
//! use inflight_rhi::vk;
//!
//! # fn run(surface: vk::SurfaceKHR) -> inflight_rhi::RhiResult<()> {
//! let instance = Instance::new(false, &[])?;
//! let loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let gpu = select_physical_device(instance.handle(), surface, &loader)?;
//! let device = Device::new(&instance, &gpu)?;
//! let _swapchain = Swapchain::new(&instance, device, surface, 1280, 720, vk::PresentModeKHR::FIFO)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::backend::{AcquireOutcome, PresentOutcome, PresentSurface};
use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// What the surface reports it can do on a given GPU.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn query(
        gpu: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        // SAFETY: `gpu` and `surface` come from the same live instance as `loader`.
        let (capabilities, formats, present_modes) = unsafe {
            (
                loader.get_physical_device_surface_capabilities(gpu, surface)?,
                loader.get_physical_device_surface_formats(gpu, surface)?,
                loader.get_physical_device_surface_present_modes(gpu, surface)?,
            )
        };
        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// A surface with no formats or no present modes cannot back a swapchain.
    pub fn is_usable(&self) -> bool {
        !(self.formats.is_empty() || self.present_modes.is_empty())
    }
}

/// Parameters picked for one swapchain build.
#[derive(Debug, Clone, Copy)]
struct SwapchainPlan {
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    min_images: u32,
    transform: vk::SurfaceTransformFlagsKHR,
}

impl SwapchainPlan {
    fn from_support(
        support: &SurfaceSupport,
        preferred_mode: vk::PresentModeKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let surface_format = pick_surface_format(&support.formats).ok_or_else(|| {
            RhiError::SwapchainError("surface reports no formats".to_string())
        })?;
        Ok(Self {
            surface_format,
            present_mode: pick_present_mode(&support.present_modes, preferred_mode),
            extent: fit_extent(&support.capabilities, width, height),
            min_images: image_budget(&support.capabilities),
            transform: support.capabilities.current_transform,
        })
    }
}

/// Window swapchain. Used only from the frame loop thread.
pub struct Swapchain {
    device: Arc<Device>,
    surface_fn: ash::khr::surface::Instance,
    swapchain_fn: ash::khr::swapchain::Device,
    /// Owned by the platform layer, which keeps it alive longer than us.
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    wanted_mode: vk::PresentModeKHR,
}

impl Swapchain {
    /// Builds the first swapchain for `surface` at roughly `width` x `height`.
    ///
    /// `wanted_mode` is honored when the surface supports it; FIFO otherwise.
    /// Images are created with TRANSFER_DST so the draw target can be blitted in.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        wanted_mode: vk::PresentModeKHR,
    ) -> RhiResult<Self> {
        let mut this = Self {
            swapchain_fn: ash::khr::swapchain::Device::new(instance.handle(), device.handle()),
            surface_fn: ash::khr::surface::Instance::new(instance.entry(), instance.handle()),
            device,
            surface,
            handle: vk::SwapchainKHR::null(),
            images: Vec::new(),
            surface_format: vk::SurfaceFormatKHR::default(),
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            wanted_mode,
        };
        this.rebuild(width, height)?;
        Ok(this)
    }

    /// Replaces the current handle, passing it as `old_swapchain` so the
    /// driver can recycle what it still holds.
    fn rebuild(&mut self, width: u32, height: u32) -> RhiResult<()> {
        let support =
            SurfaceSupport::query(self.device.physical_device(), self.surface, &self.surface_fn)?;
        if !support.is_usable() {
            return Err(RhiError::SwapchainError(
                "surface has no formats or present modes".to_string(),
            ));
        }
        let plan = SwapchainPlan::from_support(&support, self.wanted_mode, width, height)?;

        let families = self.device.queue_families();
        let shared = [families.graphics_family, families.present_family];
        let split = families.graphics_family != families.present_family;

        let retired = self.handle;
        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(plan.min_images)
            .image_format(plan.surface_format.format)
            .image_color_space(plan.surface_format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(plan.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true)
            .old_swapchain(retired);
        create_info = if split {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&shared)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        // SAFETY: the caller has waited for the device to go idle before a
        // rebuild, so neither the retired handle nor its images are in use.
        let handle = unsafe { self.swapchain_fn.create_swapchain(&create_info, None)? };
        if retired != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_fn.destroy_swapchain(retired, None) };
        }
        self.handle = handle;
        self.images = unsafe { self.swapchain_fn.get_swapchain_images(handle)? };
        self.surface_format = plan.surface_format;
        self.extent = plan.extent;
        self.present_mode = plan.present_mode;

        info!(
            width = plan.extent.width,
            height = plan.extent.height,
            format = ?plan.surface_format.format,
            mode = ?plan.present_mode,
            images = self.images.len(),
            "swapchain ready"
        );
        Ok(())
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.surface_format.color_space
    }

    /// The mode actually in use, which may differ from the one asked for.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl PresentSurface for Swapchain {
    fn acquire_next_image(
        &mut self,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RhiResult<AcquireOutcome> {
        let acquired = unsafe {
            self.swapchain_fn
                .acquire_next_image(self.handle, timeout_ns, signal, vk::Fence::null())
        };
        match acquired {
            Ok((index, suboptimal)) => Ok(AcquireOutcome::Acquired { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => Err(RhiError::FenceTimeout {
                what: "swapchain image",
                timeout_ns,
            }),
            Err(other) => Err(other.into()),
        }
    }

    fn present(&mut self, image_index: u32, waits: &[vk::Semaphore]) -> RhiResult<PresentOutcome> {
        let handles = [self.handle];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(waits)
            .swapchains(&handles)
            .image_indices(&indices);

        let presented = unsafe {
            self.swapchain_fn
                .queue_present(self.device.present_queue(), &present_info)
        };
        match presented {
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Ok(false) => Ok(PresentOutcome::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(other) => Err(other.into()),
        }
    }

    fn images(&self) -> &[vk::Image] {
        &self.images
    }

    fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn recreate(&mut self, width: u32, height: u32) -> RhiResult<()> {
        debug!(width, height, "rebuilding swapchain");
        self.rebuild(width, height)
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        if self.handle == vk::SwapchainKHR::null() {
            return;
        }
        unsafe { self.swapchain_fn.destroy_swapchain(self.handle, None) };
        debug!(images = self.images.len(), "swapchain released");
    }
}

/// B8G8R8A8_UNORM in sRGB-nonlinear space is the blit-friendly choice. The
/// SRGB variant comes next, then whatever the surface lists first.
fn pick_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let nonlinear = |wanted: vk::Format| {
        formats.iter().copied().find(|candidate| {
            candidate.format == wanted
                && candidate.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    nonlinear(vk::Format::B8G8R8A8_UNORM)
        .or_else(|| {
            let srgb = nonlinear(vk::Format::B8G8R8A8_SRGB);
            if srgb.is_some() {
                warn!("B8G8R8A8_UNORM unavailable, presenting through B8G8R8A8_SRGB");
            }
            srgb
        })
        .or_else(|| {
            let first = formats.first().copied();
            if let Some(format) = first {
                warn!(format = ?format.format, "no preferred surface format, taking the first");
            }
            first
        })
}

/// FIFO is the only mode every surface must support.
fn pick_present_mode(
    available: &[vk::PresentModeKHR],
    wanted: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&wanted) {
        return wanted;
    }
    warn!(wanted = ?wanted, "present mode not supported, using FIFO");
    vk::PresentModeKHR::FIFO
}

/// A `current_extent` of `u32::MAX` means the surface lets the swapchain
/// decide, within the reported bounds.
fn fit_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    let (lo, hi) = (caps.min_image_extent, caps.max_image_extent);
    vk::Extent2D {
        width: width.clamp(lo.width, hi.width),
        height: height.clamp(lo.height, hi.height),
    }
}

/// `max_image_count == 0` means unbounded.
fn image_budget(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    match caps.max_image_count {
        0 => wanted,
        max => wanted.min(max),
    }
}
