// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{CStr, CString};

use ash::khr::surface;
use ash::vk;
use cadence_render::RendererConfig;
use tracing::{debug, info};

use crate::ash_dispatch::AshDispatch;
use crate::dispatch::{DeviceDispatch, SwapchainSupport};
use crate::error::{GpuError, GpuResult};

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Debug, Clone)]
pub struct QueueFamilyInfo {
    pub flags: vk::QueueFlags,
    pub supports_present: bool,
}

/// Snapshot of everything selection needs to know about one GPU.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,
    pub sampler_anisotropy: bool,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub swapchain_support: SwapchainSupport,
    pub extensions: Vec<CString>,
    pub memory_heaps: Vec<vk::MemoryHeap>,
}

/// Graphics, present and transfer families are always required.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub compute: bool,
    pub sampler_anisotropy: bool,
    pub discrete_gpu: bool,
    pub extensions: Vec<&'static CStr>,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            compute: false,
            sampler_anisotropy: true,
            discrete_gpu: false,
            extensions: vec![ash::khr::swapchain::NAME],
        }
    }
}

impl DeviceRequirements {
    pub fn from_config(cfg: &RendererConfig) -> Self {
        Self {
            sampler_anisotropy: cfg.require_sampler_anisotropy,
            discrete_gpu: cfg.require_discrete_gpu,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
    pub transfer: u32,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    /// Distinct family indices, one queue create info each.
    pub fn unique(&self) -> Vec<u32> {
        let mut v = vec![self.graphics, self.present, self.transfer];
        v.sort_unstable();
        v.dedup();
        v
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FamilySelection {
    graphics: Option<u32>,
    present: Option<u32>,
    compute: Option<u32>,
    transfer: Option<u32>,
}

/// Graphics and compute take the first capable family. Present prefers the
/// graphics family. Transfer takes the family with the fewest graphics and
/// compute bits, so a dedicated transfer family wins when one exists. On a
/// tied score a family other than the graphics one is preferred.
fn find_queue_families(families: &[QueueFamilyInfo]) -> FamilySelection {
    let mut sel = FamilySelection::default();
    let mut min_transfer_score = u32::MAX;

    for (i, f) in families.iter().enumerate() {
        let i = i as u32;
        let mut score = 0;
        if f.flags.contains(vk::QueueFlags::GRAPHICS) {
            sel.graphics.get_or_insert(i);
            score += 1;
        }
        if f.flags.contains(vk::QueueFlags::COMPUTE) {
            sel.compute.get_or_insert(i);
            score += 1;
        }
        if f.flags.contains(vk::QueueFlags::TRANSFER) {
            let leaves_graphics = score == min_transfer_score
                && sel.transfer == sel.graphics
                && sel.graphics != Some(i);
            if score < min_transfer_score || leaves_graphics {
                min_transfer_score = score;
                sel.transfer = Some(i);
            }
        }
        if f.supports_present {
            sel.present.get_or_insert(i);
        }
    }

    if let Some(g) = sel.graphics {
        if families[g as usize].supports_present {
            sel.present = Some(g);
        }
    }
    sel
}

/// Queue families to use if `info` qualifies, `None` otherwise.
pub fn evaluate_device(
    info: &PhysicalDeviceInfo,
    reqs: &DeviceRequirements,
) -> Option<QueueFamilyIndices> {
    if reqs.discrete_gpu && info.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
        info!("{}: not a discrete GPU, skipping", info.name);
        return None;
    }

    let sel = find_queue_families(&info.queue_families);
    debug!(
        "{}: graphics={:?} present={:?} compute={:?} transfer={:?}",
        info.name, sel.graphics, sel.present, sel.compute, sel.transfer
    );
    let (Some(graphics), Some(present), Some(transfer)) = (sel.graphics, sel.present, sel.transfer)
    else {
        info!("{}: missing a required queue family, skipping", info.name);
        return None;
    };
    if reqs.compute && sel.compute.is_none() {
        info!("{}: no compute queue, skipping", info.name);
        return None;
    }

    let support = &info.swapchain_support;
    if support.formats.is_empty() || support.present_modes.is_empty() {
        info!("{}: required swapchain support not present, skipping", info.name);
        return None;
    }

    if let Some(missing) = reqs
        .extensions
        .iter()
        .find(|ext| !info.extensions.iter().any(|have| have.as_c_str() == **ext))
    {
        info!("{}: required extension {missing:?} not found, skipping", info.name);
        return None;
    }

    if reqs.sampler_anisotropy && !info.sampler_anisotropy {
        info!("{}: no samplerAnisotropy, skipping", info.name);
        return None;
    }

    Some(QueueFamilyIndices {
        graphics,
        present,
        transfer,
        compute: sel.compute,
    })
}

/// First qualifying device wins.
pub fn select_physical_device(
    infos: &[PhysicalDeviceInfo],
    reqs: &DeviceRequirements,
) -> GpuResult<(usize, QueueFamilyIndices)> {
    infos
        .iter()
        .enumerate()
        .find_map(|(i, info)| evaluate_device(info, reqs).map(|q| (i, q)))
        .ok_or(GpuError::NoSuitableDevice)
}

pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags)
    })
}

/// First candidate whose linear or optimal tiling supports depth attachments.
pub fn pick_depth_format<D: DeviceDispatch>(d: &D) -> Option<vk::Format> {
    DEPTH_CANDIDATES.iter().copied().find(|&f| {
        let props = d.format_properties(f);
        props
            .linear_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            || props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

fn device_type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "unknown",
    }
}

fn log_selected(info: &PhysicalDeviceInfo, families: &QueueFamilyIndices) {
    info!("selected GPU: {} ({})", info.name, device_type_name(info.device_type));
    info!(
        "driver {}.{}.{}, Vulkan API {}.{}.{}",
        vk::api_version_major(info.driver_version),
        vk::api_version_minor(info.driver_version),
        vk::api_version_patch(info.driver_version),
        vk::api_version_major(info.api_version),
        vk::api_version_minor(info.api_version),
        vk::api_version_patch(info.api_version),
    );
    for heap in &info.memory_heaps {
        let gib = heap.size as f64 / (1024.0 * 1024.0 * 1024.0);
        let kind = if heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            "local"
        } else {
            "shared"
        };
        info!("{kind} memory: {gib:.2} GiB");
    }
    info!(
        "queue families: graphics={} present={} transfer={} compute={:?}",
        families.graphics, families.present, families.transfer, families.compute
    );
}

/// Logical device state shared by every GPU component.
#[derive(Debug)]
pub struct Device {
    pub physical: vk::PhysicalDevice,
    pub families: QueueFamilyIndices,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub transfer_queue: vk::Queue,
    pub graphics_command_pool: vk::CommandPool,
    pub swapchain_support: SwapchainSupport,
    pub depth_format: vk::Format,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Device {
    /// Wraps an already created logical device: creates the graphics command
    /// pool and caches surface support, memory properties and depth format.
    pub fn from_parts<D: DeviceDispatch>(
        d: &D,
        physical: vk::PhysicalDevice,
        families: QueueFamilyIndices,
        [graphics_queue, present_queue, transfer_queue]: [vk::Queue; 3],
    ) -> GpuResult<Self> {
        let graphics_command_pool = d
            .create_command_pool(families.graphics)
            .map_err(GpuError::vk("vkCreateCommandPool"))?;
        let mut device = Device {
            physical,
            families,
            graphics_queue,
            present_queue,
            transfer_queue,
            graphics_command_pool,
            swapchain_support: SwapchainSupport::default(),
            depth_format: vk::Format::UNDEFINED,
            memory_properties: d.memory_properties(),
        };
        let cached = device
            .refresh_swapchain_support(d)
            .and_then(|_| device.detect_depth_format(d));
        if let Err(e) = cached {
            device.destroy(d);
            return Err(e);
        }
        Ok(device)
    }

    pub fn refresh_swapchain_support<D: DeviceDispatch>(&mut self, d: &D) -> GpuResult<()> {
        self.swapchain_support = d
            .swapchain_support()
            .map_err(GpuError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
        Ok(())
    }

    pub fn detect_depth_format<D: DeviceDispatch>(&mut self, d: &D) -> GpuResult<()> {
        self.depth_format = pick_depth_format(d).ok_or(GpuError::NoDepthFormat)?;
        Ok(())
    }

    pub fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> GpuResult<u32> {
        find_memory_type(&self.memory_properties, type_bits, flags)
            .ok_or(GpuError::NoMemoryType { type_bits, flags })
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.graphics_command_pool != vk::CommandPool::null() {
            d.destroy_command_pool(self.graphics_command_pool);
            self.graphics_command_pool = vk::CommandPool::null();
        }
    }
}

unsafe fn describe_physical_device(
    instance: &ash::Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<PhysicalDeviceInfo, vk::Result> {
    let props = unsafe { instance.get_physical_device_properties(phys) };
    let features = unsafe { instance.get_physical_device_features(phys) };
    let memory = unsafe { instance.get_physical_device_memory_properties(phys) };

    let families = unsafe { instance.get_physical_device_queue_family_properties(phys) };
    let mut queue_families = Vec::with_capacity(families.len());
    for (i, f) in families.iter().enumerate() {
        let supports_present = unsafe {
            surface_loader.get_physical_device_surface_support(phys, i as u32, surface)?
        };
        queue_families.push(QueueFamilyInfo {
            flags: f.queue_flags,
            supports_present,
        });
    }

    let swapchain_support = unsafe {
        SwapchainSupport {
            capabilities: surface_loader.get_physical_device_surface_capabilities(phys, surface)?,
            formats: surface_loader.get_physical_device_surface_formats(phys, surface)?,
            present_modes: surface_loader.get_physical_device_surface_present_modes(phys, surface)?,
        }
    };

    let extensions = unsafe { instance.enumerate_device_extension_properties(phys)? }
        .iter()
        .map(|e| unsafe { CStr::from_ptr(e.extension_name.as_ptr()) }.to_owned())
        .collect();

    let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Ok(PhysicalDeviceInfo {
        handle: phys,
        name,
        device_type: props.device_type,
        api_version: props.api_version,
        driver_version: props.driver_version,
        sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        queue_families,
        swapchain_support,
        extensions,
        memory_heaps: memory.memory_heaps[..memory.memory_heap_count as usize].to_vec(),
    })
}

/// Selects a physical device for `surface` and creates the logical device,
/// its queues and the graphics command pool.
pub fn create_device(
    instance: &ash::Instance,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    reqs: &DeviceRequirements,
) -> GpuResult<(Device, AshDispatch)> {
    let physicals = unsafe { instance.enumerate_physical_devices() }
        .map_err(GpuError::vk("vkEnumeratePhysicalDevices"))?;
    let infos = physicals
        .iter()
        .map(|&p| unsafe { describe_physical_device(instance, &surface_loader, surface, p) })
        .collect::<Result<Vec<_>, _>>()
        .map_err(GpuError::vk("physical device query"))?;

    let (index, families) = select_physical_device(&infos, reqs)?;
    let info = &infos[index];
    log_selected(info, &families);

    // STRICT: one create info per distinct family, or vkCreateDevice fails.
    let priorities = [1.0f32];
    let queue_infos: Vec<_> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures {
        sampler_anisotropy: if reqs.sampler_anisotropy && info.sampler_anisotropy {
            vk::TRUE
        } else {
            vk::FALSE
        },
        ..Default::default()
    };
    let ext_ptrs: Vec<_> = reqs.extensions.iter().map(|e| e.as_ptr()).collect();
    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&ext_ptrs)
        .enabled_features(&features);

    let raw = unsafe { instance.create_device(info.handle, &create_info, None) }
        .map_err(GpuError::vk("vkCreateDevice"))?;
    let queue = |family| unsafe { raw.get_device_queue(family, 0) };
    let queues = [
        queue(families.graphics),
        queue(families.present),
        queue(families.transfer),
    ];
    info!("logical device created");

    let dispatch = AshDispatch::new(instance, raw, info.handle, surface_loader, surface);
    match Device::from_parts(&dispatch, info.handle, families, queues) {
        Ok(device) => Ok((device, dispatch)),
        Err(e) => {
            dispatch.destroy_device();
            Err(e)
        }
    }
}
