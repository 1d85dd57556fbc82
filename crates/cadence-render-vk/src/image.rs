// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::buffer::Buffer;
use crate::device::Device;
use crate::dispatch::{DeviceDispatch, ImageBarrier, ImageDesc};
use crate::error::{GpuError, GpuResult};

/// Access masks and pipeline stages for a supported layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn transition_masks(
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> GpuResult<TransitionMasks> {
    use vk::ImageLayout as L;
    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => TransitionMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        _ => return Err(GpuError::UnsupportedLayoutTransition { old, new }),
    };
    Ok(masks)
}

/// Bytes per texel of an uncompressed color or depth format.
pub fn texel_size(format: vk::Format) -> Option<vk::DeviceSize> {
    use vk::Format as F;
    let size = match format {
        F::R8_UNORM | F::R8_SRGB => 1,
        F::R8G8_UNORM | F::R8G8_SRGB | F::D16_UNORM => 2,
        F::R8G8B8A8_UNORM
        | F::R8G8B8A8_SRGB
        | F::B8G8R8A8_UNORM
        | F::B8G8R8A8_SRGB
        | F::R32_SFLOAT
        | F::D32_SFLOAT => 4,
        F::R16G16B16A16_SFLOAT => 8,
        F::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

/// A 2D image with its own memory and, optionally, a view.
///
/// The layout is tracked on the CPU side and updated when a transition is
/// recorded, not when it executes.
#[derive(Debug, Default)]
pub struct Image {
    handle: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    extent: vk::Extent2D,
    format: vk::Format,
    aspect: vk::ImageAspectFlags,
    layout: vk::ImageLayout,
}

impl Image {
    pub fn create<D: DeviceDispatch>(
        d: &D,
        device: &Device,
        desc: &ImageDesc,
        memory_flags: vk::MemoryPropertyFlags,
        aspect: vk::ImageAspectFlags,
        create_view: bool,
    ) -> GpuResult<Self> {
        let handle = d
            .create_image(desc)
            .map_err(GpuError::vk("vkCreateImage"))?;
        let mut image = Image {
            handle,
            extent: desc.extent,
            format: desc.format,
            aspect,
            layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        if let Err(e) = image.allocate(d, device, memory_flags, create_view) {
            image.destroy(d);
            return Err(e);
        }
        Ok(image)
    }

    fn allocate<D: DeviceDispatch>(
        &mut self,
        d: &D,
        device: &Device,
        memory_flags: vk::MemoryPropertyFlags,
        create_view: bool,
    ) -> GpuResult<()> {
        let reqs = d.image_memory_requirements(self.handle);
        let index = device.find_memory_type(reqs.memory_type_bits, memory_flags)?;
        self.memory = d
            .allocate_memory(reqs.size, index)
            .map_err(GpuError::vk("vkAllocateMemory"))?;
        d.bind_image_memory(self.handle, self.memory)
            .map_err(GpuError::vk("vkBindImageMemory"))?;
        if create_view {
            self.view = d
                .create_image_view(self.handle, self.format, self.aspect)
                .map_err(GpuError::vk("vkCreateImageView"))?;
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::Image {
        self.handle
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Size of the tightly packed base level.
    pub fn byte_size(&self) -> GpuResult<vk::DeviceSize> {
        let texel = texel_size(self.format).ok_or(GpuError::UnsupportedFormat(self.format))?;
        Ok(self.extent.width as vk::DeviceSize * self.extent.height as vk::DeviceSize * texel)
    }

    pub fn layout(&self) -> vk::ImageLayout {
        self.layout
    }

    /// Records a barrier from the current layout to `new_layout` into `cmd`.
    pub fn transition<D: DeviceDispatch>(
        &mut self,
        d: &D,
        cmd: vk::CommandBuffer,
        new_layout: vk::ImageLayout,
    ) -> GpuResult<()> {
        let masks = transition_masks(self.layout, new_layout)?;
        d.cmd_image_barrier(
            cmd,
            &ImageBarrier {
                image: self.handle,
                aspect: self.aspect,
                old_layout: self.layout,
                new_layout,
                src_access: masks.src_access,
                dst_access: masks.dst_access,
                src_stage: masks.src_stage,
                dst_stage: masks.dst_stage,
            },
        );
        self.layout = new_layout;
        Ok(())
    }

    /// Records a full-image copy from `buffer`. The image must already be in
    /// `TRANSFER_DST_OPTIMAL`.
    pub fn copy_from_buffer<D: DeviceDispatch>(
        &self,
        d: &D,
        cmd: vk::CommandBuffer,
        buffer: &Buffer,
    ) -> GpuResult<()> {
        if self.layout != vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            return Err(GpuError::UnsupportedLayoutTransition {
                old: self.layout,
                new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            });
        }
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: self.aspect,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D::default(),
            image_extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
        };
        d.cmd_copy_buffer_to_image(cmd, buffer.handle(), self.handle, region);
        Ok(())
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.view != vk::ImageView::null() {
            d.destroy_image_view(self.view);
            self.view = vk::ImageView::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            d.free_memory(self.memory);
            self.memory = vk::DeviceMemory::null();
        }
        if self.handle != vk::Image::null() {
            d.destroy_image(self.handle);
            self.handle = vk::Image::null();
        }
    }
}
