// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use cadence_render::{RenderSize, RendererBackend, RendererConfig};

mod ash_dispatch;
pub mod buffer;
pub mod command;
pub mod device;
pub mod dispatch;
mod error;
#[cfg(test)]
mod fake;
pub mod frame;
pub mod geometry;
pub mod image;
mod instance;
pub mod render_pass;
pub mod swapchain;
pub mod sync;
pub mod upload;

pub use ash_dispatch::AshDispatch;
pub use command::{BeginFlags, CommandBuffer, CommandBufferState, SingleUseCommandBuffer};
pub use device::{Device, DeviceRequirements, QueueFamilyIndices};
pub use dispatch::DeviceDispatch;
pub use error::{CommandBufferError, GpuError, GpuResult};
pub use frame::RenderContext;
pub use geometry::Vertex3d;
pub use instance::VALIDATION_LAYER;

use device::create_device;
use geometry::{QUAD_INDICES, QUAD_VERTICES};
use instance::{create_instance, DebugMessenger};

/// Vulkan implementation of [`RendererBackend`]. Owns the instance-level
/// objects; everything below the logical device lives in [`RenderContext`].
pub struct VulkanBackend {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    context: Option<RenderContext<AshDispatch>>,
}

impl VulkanBackend {
    pub fn context(&self) -> Option<&RenderContext<AshDispatch>> {
        self.context.as_ref()
    }

    fn teardown(&mut self) {
        if let Some(mut ctx) = self.context.take() {
            ctx.destroy();
        }
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.surface_loader.destroy_surface(self.surface, None) };
            self.surface = vk::SurfaceKHR::null();
        }
        if let Some(mut debug) = self.debug.take() {
            debug.destroy();
        }
    }
}

impl RendererBackend for VulkanBackend {
    fn initialize(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
    ) -> Result<Self> {
        let entry = Entry::linked();
        let display_raw = display.display_handle().context("display_handle")?.as_raw();
        let window_raw = window.window_handle().context("window_handle")?.as_raw();

        let instance = create_instance(
            &entry,
            display_raw,
            &config.application_name,
            config.validation,
        )
        .context("create_instance")?;

        // From here on Drop cleans up whatever has been created.
        let mut backend = VulkanBackend {
            surface_loader: surface::Instance::new(&entry, &instance),
            _entry: entry,
            instance,
            debug: None,
            surface: vk::SurfaceKHR::null(),
            context: None,
        };

        if config.validation {
            backend.debug = Some(
                DebugMessenger::create(&backend._entry, &backend.instance)
                    .context("create debug messenger")?,
            );
        }

        backend.surface = unsafe {
            ash_window::create_surface(
                &backend._entry,
                &backend.instance,
                display_raw,
                window_raw,
                None,
            )
        }
        .context("create_surface")?;

        let (device, dispatch) = create_device(
            &backend.instance,
            backend.surface_loader.clone(),
            backend.surface,
            &DeviceRequirements::from_config(config),
        )
        .context("create_device")?;

        let ctx = RenderContext::new(dispatch, device, size.width, size.height, config)
            .context("create render context")?;
        ctx.upload_geometry(&QUAD_VERTICES, &QUAD_INDICES)
            .context("upload quad geometry")?;
        backend.context = Some(ctx);

        info!("Vulkan backend ready");
        Ok(backend)
    }

    fn resized(&mut self, size: RenderSize) {
        match &mut self.context {
            Some(ctx) => ctx.on_resized(size.width, size.height),
            None => warn!("resize to {}x{} after shutdown", size.width, size.height),
        }
    }

    fn begin_frame(&mut self, delta_time: f32) -> Result<bool> {
        match &mut self.context {
            Some(ctx) => Ok(ctx.begin_frame(delta_time)?),
            None => Ok(false),
        }
    }

    fn end_frame(&mut self, delta_time: f32) -> Result<()> {
        match &mut self.context {
            Some(ctx) => Ok(ctx.end_frame(delta_time)?),
            None => Ok(()),
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(ctx) = &mut self.context {
            ctx.set_clear_color(rgba);
        }
    }

    fn shutdown(&mut self) {
        info!("shutting down Vulkan backend");
        self.teardown();
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        self.teardown();
        unsafe { self.instance.destroy_instance(None) };
    }
}
