// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

use crate::command::CommandBufferState;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferError {
    #[error("cannot {op} a command buffer in state {state:?}")]
    InvalidTransition {
        op: &'static str,
        state: CommandBufferState,
    },
}

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("{call} failed: {result}")]
    Vulkan {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no physical device meets the renderer requirements")]
    NoSuitableDevice,

    #[error("validation layer {0} requested but not installed")]
    MissingValidationLayer(String),

    #[error("no supported depth attachment format")]
    NoDepthFormat,

    #[error("no memory type matches bits {type_bits:#b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error(transparent)]
    CommandBuffer(#[from] CommandBufferError),

    #[error("unsupported layout transition {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    #[error("format {0:?} has no known texel size")]
    UnsupportedFormat(vk::Format),

    #[error("range {offset}+{size} exceeds buffer of {capacity} bytes")]
    OutOfBounds {
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        capacity: vk::DeviceSize,
    },

    #[error("image {image} is still in flight under frame slot {slot}")]
    ImageInFlight { image: usize, slot: usize },

    #[error("wait for swapchain image {image} to leave flight failed")]
    ImageWaitFailed { image: usize },

    #[error("surface error: {0}")]
    Surface(String),
}

impl GpuError {
    pub(crate) fn vk(call: &'static str) -> impl FnOnce(vk::Result) -> GpuError {
        move |result| GpuError::Vulkan { call, result }
    }
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;
