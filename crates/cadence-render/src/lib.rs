// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod config;
mod frontend;
mod slots;

pub use config::{PresentModePreference, RendererConfig};
pub use frontend::RendererFrontend;
pub use slots::{ObjectId, SlotAllocator, SlotError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Per-frame input handed from the application loop to the frontend.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPacket {
    pub delta_time: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RendererBackendType {
    #[default]
    Vulkan,
}

/// A GPU backend driven by [`RendererFrontend`].
///
/// `begin_frame` returns `Ok(false)` when the frame must be skipped (resize in
/// flight, minimized window, out-of-date swapchain). Any `Err` is fatal for
/// the run.
pub trait RendererBackend {
    fn initialize(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RendererConfig,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resized(&mut self, size: RenderSize);
    fn begin_frame(&mut self, delta_time: f32) -> Result<bool>;
    fn end_frame(&mut self, delta_time: f32) -> Result<()>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn shutdown(&mut self);
}
