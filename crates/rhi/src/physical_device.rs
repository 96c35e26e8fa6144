//! Picking the GPU the frame loop runs on.
//!
//! A candidate must speak Vulkan 1.3 and expose a graphics queue plus a queue
//! that can present to the window surface. Candidates are ranked by device
//! class, then 2D image limit and device-local memory. A single graphics
//! queue is used for everything.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::error::{RhiError, RhiResult};

const MIB: u64 = 1024 * 1024;

/// Queue families the logical device is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics_family: u32,
    pub present_family: u32,
}

impl QueueFamilies {
    /// Families to request queues from; one entry when graphics can present.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = vec![self.graphics_family];
        if self.present_family != self.graphics_family {
            families.push(self.present_family);
        }
        families
    }
}

/// The chosen GPU and what was learned about it during selection.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    pub fn name(&self) -> &str {
        self.properties
            .device_name_as_c_str()
            .ok()
            .and_then(|name| name.to_str().ok())
            .unwrap_or("<unnamed>")
    }

    /// Sum of all DEVICE_LOCAL heaps, in bytes.
    pub fn vram_bytes(&self) -> u64 {
        let heaps = &self.memory_properties.memory_heaps
            [..self.memory_properties.memory_heap_count as usize];
        heaps
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }

    fn score(&self) -> u64 {
        let class = match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 4,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 3,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
            vk::PhysicalDeviceType::CPU => 1,
            _ => 0,
        };
        class * 1_000_000
            + u64::from(self.properties.limits.max_image_dimension2_d)
            + (self.vram_bytes() / MIB).min(65_536)
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let v = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.name())
            .field("kind", &self.properties.device_type)
            .field(
                "api",
                &format_args!(
                    "{}.{}",
                    vk::api_version_major(v),
                    vk::api_version_minor(v)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

fn is_vulkan_1_3(api_version: u32) -> bool {
    (vk::api_version_major(api_version), vk::api_version_minor(api_version)) >= (1, 3)
}

/// Chooses the best GPU that can render to and present on `surface`.
///
/// Fails with [`RhiError::NoSuitableGpu`] when nothing qualifies.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let gpus = unsafe { instance.enumerate_physical_devices()? };
    debug!(count = gpus.len(), "enumerated physical devices");

    let best = gpus
        .into_iter()
        .filter_map(|gpu| inspect(instance, gpu, surface, surface_loader))
        .max_by_key(PhysicalDeviceInfo::score)
        .ok_or(RhiError::NoSuitableGpu)?;

    info!(
        gpu = best.name(),
        kind = ?best.properties.device_type,
        vram_mib = best.vram_bytes() / MIB,
        "selected physical device"
    );
    Ok(best)
}

fn inspect(
    instance: &ash::Instance,
    gpu: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(gpu) };
    let name = properties
        .device_name_as_c_str()
        .map(CStr::to_string_lossy)
        .unwrap_or_default();

    if !is_vulkan_1_3(properties.api_version) {
        debug!(gpu = %name, "rejected: below Vulkan 1.3");
        return None;
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(gpu) };
    let supports_present = |index: u32| unsafe {
        surface_loader
            .get_physical_device_surface_support(gpu, index, surface)
            .unwrap_or(false)
    };
    let Some(queue_families) = pick_queue_families(&families, supports_present) else {
        debug!(gpu = %name, "rejected: no graphics or present queue");
        return None;
    };

    Some(PhysicalDeviceInfo {
        device: gpu,
        properties,
        memory_properties: unsafe { instance.get_physical_device_memory_properties(gpu) },
        queue_families,
    })
}

/// Prefers one family that does both graphics and present, which keeps
/// swapchain images in exclusive sharing mode. Otherwise the first of each.
fn pick_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> bool,
) -> Option<QueueFamilies> {
    let mut graphics = None;
    let mut present = None;

    for (index, family) in (0u32..).zip(families) {
        if family.queue_count == 0 {
            continue;
        }
        let draws = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let presents = supports_present(index);
        if draws && presents {
            return Some(QueueFamilies {
                graphics_family: index,
                present_family: index,
            });
        }
        if draws {
            graphics.get_or_insert(index);
        }
        if presents {
            present.get_or_insert(index);
        }
    }

    Some(QueueFamilies {
        graphics_family: graphics?,
        present_family: present?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn test_combined_family_is_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, 1),
        ];
        let picked = pick_queue_families(&families, |i| i != 0);
        assert_eq!(
            picked,
            Some(QueueFamilies {
                graphics_family: 2,
                present_family: 2,
            })
        );
    }

    #[test]
    fn test_split_families_when_nothing_does_both() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 1),
            family(vk::QueueFlags::TRANSFER, 1),
        ];
        let picked = pick_queue_families(&families, |i| i == 1);
        assert_eq!(
            picked,
            Some(QueueFamilies {
                graphics_family: 0,
                present_family: 1,
            })
        );
        assert_eq!(picked.map(|f| f.unique_families()), Some(vec![0, 1]));
    }

    #[test]
    fn test_empty_or_presentless_devices_are_rejected() {
        let families = [
            family(vk::QueueFlags::GRAPHICS, 0),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert!(pick_queue_families(&families, |_| false).is_none());
        // A family with no queues cannot satisfy presentation either.
        assert!(pick_queue_families(&families, |i| i == 0).is_none());
    }

    #[test]
    fn test_requires_vulkan_1_3() {
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 3, 0)));
        assert!(is_vulkan_1_3(vk::make_api_version(0, 1, 4, 0)));
        assert!(!is_vulkan_1_3(vk::make_api_version(0, 1, 2, 198)));
    }
}
