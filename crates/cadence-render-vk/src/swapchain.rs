// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cadence_render::PresentModePreference;
use tracing::{debug, error, info};

use crate::device::Device;
use crate::dispatch::{DeviceDispatch, ImageDesc, SwapchainDesc};
use crate::error::{GpuError, GpuResult};
use crate::image::Image;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image { index: u32, suboptimal: bool },
    /// The surface changed; skip the frame and recreate.
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Presented,
    NeedsRecreate,
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> GpuResult<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_UNORM
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
        .ok_or_else(|| GpuError::Surface("no surface formats reported".into()))
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preference: PresentModePreference,
) -> vk::PresentModeKHR {
    match preference {
        PresentModePreference::Mailbox if modes.contains(&vk::PresentModeKHR::MAILBOX) => {
            vk::PresentModeKHR::MAILBOX
        }
        _ => vk::PresentModeKHR::FIFO,
    }
}

pub fn extent_from_caps(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the surface minimum, capped by the maximum (0 means none).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub fn frames_in_flight(image_count: usize) -> usize {
    image_count.saturating_sub(1).max(1)
}

/// Presentable images, their views and the matching depth attachment.
#[derive(Debug, Default)]
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: Image,
    max_frames_in_flight: usize,
}

impl Swapchain {
    /// Re-queries surface support and builds a swapchain for the given size.
    pub fn create<D: DeviceDispatch>(
        d: &D,
        device: &mut Device,
        width: u32,
        height: u32,
        preference: PresentModePreference,
    ) -> GpuResult<Self> {
        device.refresh_swapchain_support(d)?;
        let support = &device.swapchain_support;
        let surface_format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes, preference);
        let extent = extent_from_caps(&support.capabilities, width, height);

        let families = [device.families.graphics, device.families.present];
        let queue_family_indices: &[u32] = if families[0] != families[1] {
            &families
        } else {
            &[]
        };
        let desc = SwapchainDesc {
            surface_format,
            present_mode,
            extent,
            min_image_count: image_count(&support.capabilities),
            pre_transform: support.capabilities.current_transform,
            queue_family_indices,
        };
        let handle = d
            .create_swapchain(&desc)
            .map_err(GpuError::vk("vkCreateSwapchainKHR"))?;

        let mut swapchain = Swapchain {
            handle,
            surface_format,
            present_mode,
            extent,
            ..Default::default()
        };
        if let Err(e) = swapchain.create_attachments(d, device) {
            error!("swapchain attachment creation failed: {e}");
            swapchain.destroy(d);
            return Err(e);
        }

        info!(
            "swapchain ready: {}x{}, {:?}/{:?}, {:?}, {} images, {} frames in flight",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            swapchain.images.len(),
            swapchain.max_frames_in_flight,
        );
        Ok(swapchain)
    }

    fn create_attachments<D: DeviceDispatch>(&mut self, d: &D, device: &Device) -> GpuResult<()> {
        self.images = d
            .swapchain_images(self.handle)
            .map_err(GpuError::vk("vkGetSwapchainImagesKHR"))?;
        self.max_frames_in_flight = frames_in_flight(self.images.len());

        for &image in &self.images {
            let view = d
                .create_image_view(image, self.surface_format.format, vk::ImageAspectFlags::COLOR)
                .map_err(GpuError::vk("vkCreateImageView"))?;
            self.views.push(view);
        }

        self.depth = Image::create(
            d,
            device,
            &ImageDesc {
                extent: self.extent,
                format: device.depth_format,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                mip_levels: 1,
            },
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::ImageAspectFlags::DEPTH,
            true,
        )?;
        Ok(())
    }

    /// Destroy, then create. On failure the old swapchain is already gone.
    pub fn recreate<D: DeviceDispatch>(
        &mut self,
        d: &D,
        device: &mut Device,
        width: u32,
        height: u32,
        preference: PresentModePreference,
    ) -> GpuResult<()> {
        self.destroy(d);
        *self = Self::create(d, device, width, height, preference)?;
        Ok(())
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        self.depth.destroy(d);
        for view in self.views.drain(..) {
            d.destroy_image_view(view);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            d.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    pub fn acquire_next_image<D: DeviceDispatch>(
        &self,
        d: &D,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> GpuResult<Acquire> {
        match d.acquire_next_image(self.handle, timeout_ns, signal) {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("acquire: swapchain out of date");
                Ok(Acquire::OutOfDate)
            }
            Err(result) => {
                error!("failed to acquire swapchain image: {result}");
                Err(GpuError::Vulkan {
                    call: "vkAcquireNextImageKHR",
                    result,
                })
            }
        }
    }

    pub fn present<D: DeviceDispatch>(
        &self,
        d: &D,
        queue: vk::Queue,
        wait: vk::Semaphore,
        index: u32,
    ) -> GpuResult<Present> {
        match d.queue_present(queue, self.handle, index, wait) {
            Ok(false) => Ok(Present::Presented),
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("present: swapchain out of date or suboptimal");
                Ok(Present::NeedsRecreate)
            }
            Err(result) => {
                error!("failed to present swapchain image: {result}");
                Err(GpuError::Vulkan {
                    call: "vkQueuePresentKHR",
                    result,
                })
            }
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn depth(&self) -> &Image {
        &self.depth
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }
}
