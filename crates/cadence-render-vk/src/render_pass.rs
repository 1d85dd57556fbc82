// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::command::CommandBuffer;
use crate::dispatch::{DeviceDispatch, RenderPassBegin, RenderPassDesc};
use crate::error::{GpuError, GpuResult};

#[derive(Debug, Default)]
pub struct RenderPass {
    handle: vk::RenderPass,
    pub render_area: vk::Rect2D,
    pub clear_color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl RenderPass {
    pub fn create<D: DeviceDispatch>(
        d: &D,
        desc: &RenderPassDesc,
        render_area: vk::Rect2D,
        clear_color: [f32; 4],
        depth: f32,
        stencil: u32,
    ) -> GpuResult<Self> {
        let handle = d
            .create_render_pass(desc)
            .map_err(GpuError::vk("vkCreateRenderPass"))?;
        Ok(Self {
            handle,
            render_area,
            clear_color,
            depth,
            stencil,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn begin<D: DeviceDispatch>(
        &self,
        d: &D,
        cb: &mut CommandBuffer,
        framebuffer: vk::Framebuffer,
    ) -> GpuResult<()> {
        cb.enter_render_pass()?;
        d.cmd_begin_render_pass(
            cb.handle(),
            &RenderPassBegin {
                render_pass: self.handle,
                framebuffer,
                render_area: self.render_area,
                clear_color: self.clear_color,
                depth: self.depth,
                stencil: self.stencil,
            },
        );
        Ok(())
    }

    pub fn end<D: DeviceDispatch>(&self, d: &D, cb: &mut CommandBuffer) -> GpuResult<()> {
        cb.leave_render_pass()?;
        d.cmd_end_render_pass(cb.handle());
        Ok(())
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.handle != vk::RenderPass::null() {
            d.destroy_render_pass(self.handle);
            self.handle = vk::RenderPass::null();
        }
    }
}

#[derive(Debug)]
pub struct Framebuffer {
    handle: vk::Framebuffer,
    attachments: Vec<vk::ImageView>,
}

impl Framebuffer {
    pub fn create<D: DeviceDispatch>(
        d: &D,
        render_pass: &RenderPass,
        attachments: Vec<vk::ImageView>,
        extent: vk::Extent2D,
    ) -> GpuResult<Self> {
        let handle = d
            .create_framebuffer(render_pass.handle(), &attachments, extent)
            .map_err(GpuError::vk("vkCreateFramebuffer"))?;
        Ok(Self {
            handle,
            attachments,
        })
    }

    pub fn handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn attachments(&self) -> &[vk::ImageView] {
        &self.attachments
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.handle != vk::Framebuffer::null() {
            d.destroy_framebuffer(self.handle);
            self.handle = vk::Framebuffer::null();
        }
        self.attachments.clear();
    }
}
