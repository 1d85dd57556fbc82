// SPDX-License-Identifier: CEPL-1.0
//! Begin/end frame protocol over the swapchain, frame slots and per-image
//! command buffers.
//!
//! Resize notifications only bump `size_requested`. The next `begin_frame`
//! notices the mismatch with `size_applied`, recreates everything that depends
//! on the surface extent, and skips that tick.

use ash::vk;
use cadence_render::{PresentModePreference, RendererConfig};
use tracing::{debug, error, info, warn};

use crate::buffer::Buffer;
use crate::command::{BeginFlags, CommandBuffer, CommandBufferState};
use crate::device::Device;
use crate::dispatch::{DeviceDispatch, RenderPassDesc, SubmitDesc};
use crate::error::{CommandBufferError, GpuError, GpuResult};
use crate::geometry::{Vertex3d, MAX_INDICES, MAX_VERTICES};
use crate::render_pass::{Framebuffer, RenderPass};
use crate::swapchain::{extent_from_caps, Acquire, Present, Swapchain};
use crate::sync::FrameSync;
use crate::upload;

const FALLBACK_WIDTH: u32 = 1280;
const FALLBACK_HEIGHT: u32 = 720;

fn full_area(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

/// Y-up viewport: origin at the bottom edge, negative height.
fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub struct RenderContext<D: DeviceDispatch> {
    dispatch: D,
    device: Device,
    present_mode: PresentModePreference,
    fence_timeout_ns: u64,

    requested_width: u32,
    requested_height: u32,
    size_requested: u64,
    size_applied: u64,
    recreating: bool,

    swapchain: Swapchain,
    main_render_pass: RenderPass,
    framebuffers: Vec<Framebuffer>,
    command_buffers: Vec<CommandBuffer>,
    sync: FrameSync,
    current_frame: usize,
    image_index: u32,

    vertex_buffer: Buffer,
    index_buffer: Buffer,
    destroyed: bool,
}

impl<D: DeviceDispatch> RenderContext<D> {
    /// Takes ownership of the logical device. On failure everything created so
    /// far, the device included, is destroyed before returning.
    pub fn new(
        dispatch: D,
        device: Device,
        width: u32,
        height: u32,
        config: &RendererConfig,
    ) -> GpuResult<Self> {
        let (width, height) = if width == 0 || height == 0 {
            warn!("initial framebuffer size is {width}x{height}, using {FALLBACK_WIDTH}x{FALLBACK_HEIGHT}");
            (FALLBACK_WIDTH, FALLBACK_HEIGHT)
        } else {
            (width, height)
        };

        let mut ctx = RenderContext {
            dispatch,
            device,
            present_mode: config.present_mode,
            fence_timeout_ns: config.fence_timeout_ns(),
            requested_width: width,
            requested_height: height,
            size_requested: 0,
            size_applied: 0,
            recreating: false,
            swapchain: Swapchain::default(),
            main_render_pass: RenderPass::default(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            sync: FrameSync::default(),
            current_frame: 0,
            image_index: 0,
            vertex_buffer: Buffer::default(),
            index_buffer: Buffer::default(),
            destroyed: false,
        };
        if let Err(e) = ctx.create_resources(config.clear_color) {
            error!("render context creation failed: {e}");
            return Err(e);
        }
        info!("render context ready");
        Ok(ctx)
    }

    fn create_resources(&mut self, clear_color: [f32; 4]) -> GpuResult<()> {
        self.swapchain = Swapchain::create(
            &self.dispatch,
            &mut self.device,
            self.requested_width,
            self.requested_height,
            self.present_mode,
        )?;

        self.main_render_pass = RenderPass::create(
            &self.dispatch,
            &RenderPassDesc {
                color_format: self.swapchain.surface_format().format,
                depth_format: self.device.depth_format,
            },
            full_area(self.swapchain.extent()),
            clear_color,
            1.0,
            0,
        )?;

        self.regenerate_framebuffers()?;
        self.create_command_buffers()?;
        self.sync = FrameSync::create(
            &self.dispatch,
            self.swapchain.max_frames_in_flight(),
            self.swapchain.image_count(),
        )?;
        self.create_buffers()
    }

    fn create_buffers(&mut self) -> GpuResult<()> {
        let usage = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
        self.vertex_buffer = Buffer::create(
            &self.dispatch,
            &self.device,
            (std::mem::size_of::<Vertex3d>() * MAX_VERTICES) as vk::DeviceSize,
            usage | vk::BufferUsageFlags::VERTEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
        )?;
        self.index_buffer = Buffer::create(
            &self.dispatch,
            &self.device,
            (std::mem::size_of::<u32>() * MAX_INDICES) as vk::DeviceSize,
            usage | vk::BufferUsageFlags::INDEX_BUFFER,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            true,
        )?;
        Ok(())
    }

    fn regenerate_framebuffers(&mut self) -> GpuResult<()> {
        let d = &self.dispatch;
        for mut fb in self.framebuffers.drain(..) {
            fb.destroy(d);
        }
        let extent = self.swapchain.extent();
        let depth = self.swapchain.depth().view();
        for &view in self.swapchain.views() {
            let fb = Framebuffer::create(d, &self.main_render_pass, vec![view, depth], extent)?;
            self.framebuffers.push(fb);
        }
        Ok(())
    }

    fn create_command_buffers(&mut self) -> GpuResult<()> {
        let d = &self.dispatch;
        let pool = self.device.graphics_command_pool;
        for mut cb in self.command_buffers.drain(..) {
            cb.free(d, pool);
        }
        for _ in 0..self.swapchain.image_count() {
            let cb = CommandBuffer::allocate(d, pool, vk::CommandBufferLevel::PRIMARY)?;
            self.command_buffers.push(cb);
        }
        debug!("allocated {} graphics command buffers", self.command_buffers.len());
        Ok(())
    }

    pub fn dispatch(&self) -> &D {
        &self.dispatch
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn frames_in_flight(&self) -> usize {
        self.sync.frames_in_flight()
    }

    /// `(requested, applied)` resize generations.
    pub fn size_generations(&self) -> (u64, u64) {
        (self.size_requested, self.size_applied)
    }

    pub fn vertex_buffer(&self) -> &Buffer {
        &self.vertex_buffer
    }

    pub fn index_buffer(&self) -> &Buffer {
        &self.index_buffer
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.main_render_pass.clear_color = rgba;
    }

    pub fn on_resized(&mut self, width: u32, height: u32) {
        self.requested_width = width;
        self.requested_height = height;
        self.size_requested += 1;
        debug!(
            "resize to {width}x{height} requested (generation {})",
            self.size_requested
        );
    }

    fn minimized(&self) -> bool {
        self.requested_width == 0 || self.requested_height == 0
    }

    /// `Ok(false)` means skip this tick; nothing was recorded.
    pub fn begin_frame(&mut self, _delta_time: f32) -> GpuResult<bool> {
        if self.minimized() {
            return Ok(false);
        }

        if self.recreating {
            self.dispatch
                .device_wait_idle()
                .map_err(GpuError::vk("vkDeviceWaitIdle"))?;
            info!("swapchain recreation in progress, skipping frame");
            return Ok(false);
        }

        if self.size_requested != self.size_applied {
            self.dispatch
                .device_wait_idle()
                .map_err(GpuError::vk("vkDeviceWaitIdle"))?;
            if self.recreate_swapchain()? {
                info!("swapchain resized, skipping frame");
            }
            return Ok(false);
        }

        let slot = self.current_frame;
        let d = &self.dispatch;
        if !self.sync.wait_for_frame(d, slot, self.fence_timeout_ns) {
            warn!("in-flight fence for slot {slot} not signaled, skipping frame");
            return Ok(false);
        }

        let index = match self
            .swapchain
            .acquire_next_image(d, u64::MAX, self.sync.image_available(slot))?
        {
            Acquire::Image { index, .. } => index,
            Acquire::OutOfDate => {
                self.size_requested += 1;
                return Ok(false);
            }
        };
        let image = index as usize;

        if !self.sync.wait_for_image(d, image, u64::MAX) {
            error!("image {image} never left flight");
            return Err(GpuError::ImageWaitFailed { image });
        }

        let cb = &mut self.command_buffers[image];
        if cb.state() == CommandBufferState::Submitted {
            cb.reset()?;
        }
        cb.begin(d, BeginFlags::empty())?;

        let extent = self.swapchain.extent();
        let handle = cb.recording_handle("set dynamic state on")?;
        d.cmd_set_viewport(handle, flipped_viewport(extent));
        d.cmd_set_scissor(handle, full_area(extent));

        self.main_render_pass.render_area = full_area(extent);
        self.main_render_pass
            .begin(d, cb, self.framebuffers[image].handle())?;

        self.image_index = index;
        Ok(true)
    }

    pub fn end_frame(&mut self, _delta_time: f32) -> GpuResult<()> {
        let slot = self.current_frame;
        let image = self.image_index as usize;
        let d = &self.dispatch;
        let Some(cb) = self.command_buffers.get_mut(image) else {
            error!("end_frame without a command buffer for image {image}");
            return Err(CommandBufferError::InvalidTransition {
                op: "end a frame on",
                state: CommandBufferState::NotAllocated,
            }
            .into());
        };

        self.main_render_pass.end(d, cb)?;
        cb.end(d)?;

        if !self.sync.wait_for_image(d, image, u64::MAX) {
            error!("image {image} never left flight");
            return Err(GpuError::ImageWaitFailed { image });
        }
        self.sync.mark_image_in_flight(image, slot)?;
        self.sync.reset_frame(d, slot)?;

        let cmds = [cb.handle()];
        let wait = [self.sync.image_available(slot)];
        let stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal = [self.sync.queue_complete(slot)];
        let submit = SubmitDesc {
            command_buffers: &cmds,
            wait_semaphores: &wait,
            wait_stages: &stages,
            signal_semaphores: &signal,
        };
        if let Err(result) = d.queue_submit(self.device.graphics_queue, &submit, self.sync.fence(slot)) {
            error!("vkQueueSubmit failed: {result}");
            return Err(GpuError::Vulkan {
                call: "vkQueueSubmit",
                result,
            });
        }
        cb.mark_submitted()?;

        match self
            .swapchain
            .present(d, self.device.present_queue, signal[0], self.image_index)?
        {
            Present::Presented => {}
            Present::NeedsRecreate => {
                self.size_requested += 1;
            }
        }

        self.current_frame = (slot + 1) % self.sync.frames_in_flight();
        Ok(())
    }

    /// `Ok(false)` when recreation is not possible right now. A failed attempt
    /// leaves the generation unacknowledged so a later tick retries it.
    fn recreate_swapchain(&mut self) -> GpuResult<bool> {
        if self.recreating {
            debug!("recreate_swapchain called while already recreating");
            return Ok(false);
        }
        if self.minimized() {
            debug!("recreate_swapchain called with a zero-sized framebuffer");
            return Ok(false);
        }
        self.recreating = true;
        let rebuilt = self.rebuild_surface_resources();
        self.recreating = false;
        if let Err(e) = &rebuilt {
            error!("swapchain recreation failed: {e}");
        }
        rebuilt
    }

    fn rebuild_surface_resources(&mut self) -> GpuResult<bool> {
        self.dispatch
            .device_wait_idle()
            .map_err(GpuError::vk("vkDeviceWaitIdle"))?;

        // The surface can report 0x0 before the window system's resize event
        // arrives. Keep the old swapchain until it reports a usable extent.
        self.device.refresh_swapchain_support(&self.dispatch)?;
        let extent = extent_from_caps(
            &self.device.swapchain_support.capabilities,
            self.requested_width,
            self.requested_height,
        );
        if extent.width == 0 || extent.height == 0 {
            debug!("surface reports a zero extent, deferring recreation");
            return Ok(false);
        }

        self.device.detect_depth_format(&self.dispatch)?;
        self.swapchain.recreate(
            &self.dispatch,
            &mut self.device,
            self.requested_width,
            self.requested_height,
            self.present_mode,
        )?;
        self.main_render_pass.render_area = full_area(self.swapchain.extent());

        self.regenerate_framebuffers()?;
        self.create_command_buffers()?;

        let frames = self.swapchain.max_frames_in_flight();
        let images = self.swapchain.image_count();
        if self.sync.frames_in_flight() != frames {
            self.sync.destroy(&self.dispatch);
            self.sync = FrameSync::create(&self.dispatch, frames, images)?;
        } else {
            self.sync.reset_images(images);
        }
        self.current_frame = 0;

        self.size_applied = self.size_requested;
        let extent = self.swapchain.extent();
        info!(
            "swapchain recreated at {}x{} (generation {})",
            extent.width, extent.height, self.size_applied
        );
        Ok(true)
    }

    /// Writes the object geometry into the device-local vertex and index
    /// buffers.
    pub fn upload_geometry(&self, vertices: &[Vertex3d], indices: &[u32]) -> GpuResult<()> {
        self.upload_data_range(&self.vertex_buffer, 0, bytemuck::cast_slice(vertices))?;
        self.upload_data_range(&self.index_buffer, 0, bytemuck::cast_slice(indices))
    }

    pub fn upload_data_range(
        &self,
        dst: &Buffer,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> GpuResult<()> {
        upload::upload_data_range(&self.dispatch, &self.device, dst, offset, data)
    }

    pub fn download_data_range(
        &self,
        src: &Buffer,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> GpuResult<()> {
        upload::download_data_range(&self.dispatch, &self.device, src, offset, out)
    }

    /// Waits for the device, then tears down in reverse creation order,
    /// finishing with the logical device. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        let d = &self.dispatch;
        if let Err(e) = d.device_wait_idle() {
            error!("vkDeviceWaitIdle failed during shutdown: {e}");
        }

        self.sync.destroy(d);
        let pool = self.device.graphics_command_pool;
        for mut cb in self.command_buffers.drain(..) {
            cb.free(d, pool);
        }
        for mut fb in self.framebuffers.drain(..) {
            fb.destroy(d);
        }
        self.main_render_pass.destroy(d);
        self.swapchain.destroy(d);
        self.vertex_buffer.destroy(d);
        self.index_buffer.destroy(d);
        self.device.destroy(d);
        d.destroy_device();
        info!("render context destroyed");
    }
}

impl<D: DeviceDispatch> Drop for RenderContext<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
