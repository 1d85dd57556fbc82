// SPDX-License-Identifier: CEPL-1.0
//! Staged transfers between host memory and device-local resources.
//!
//! Every call creates a host-visible staging buffer sized to the payload,
//! runs one single-use command buffer on the graphics queue, waits for the
//! queue to drain and destroys the staging buffer before returning.

use ash::vk;
use tracing::{debug, error};

use crate::buffer::Buffer;
use crate::command::SingleUseCommandBuffer;
use crate::device::Device;
use crate::dispatch::DeviceDispatch;
use crate::error::{GpuError, GpuResult};
use crate::image::Image;

fn staging_buffer<D: DeviceDispatch>(
    d: &D,
    device: &Device,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
) -> GpuResult<Buffer> {
    Buffer::create(
        d,
        device,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        true,
    )
}

/// Runs `f` with a staging buffer and destroys it afterwards, success or not.
fn with_staging<D, T>(
    d: &D,
    device: &Device,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    f: impl FnOnce(&Buffer) -> GpuResult<T>,
) -> GpuResult<T>
where
    D: DeviceDispatch,
{
    let mut staging = staging_buffer(d, device, size, usage)?;
    let result = f(&staging);
    staging.destroy(d);
    result
}

/// Writes `data` into `dst` at `offset`. An empty slice makes no device calls.
pub fn upload_data_range<D: DeviceDispatch>(
    d: &D,
    device: &Device,
    dst: &Buffer,
    offset: vk::DeviceSize,
    data: &[u8],
) -> GpuResult<()> {
    if data.is_empty() {
        return Ok(());
    }
    let size = data.len() as vk::DeviceSize;
    debug!("uploading {size} bytes at offset {offset}");
    with_staging(d, device, size, vk::BufferUsageFlags::TRANSFER_SRC, |staging| {
        staging.load_data(d, 0, data)?;
        staging.copy_to(d, device, 0, dst, offset, size)
    })
}

/// Reads `out.len()` bytes of `src` starting at `offset`.
pub fn download_data_range<D: DeviceDispatch>(
    d: &D,
    device: &Device,
    src: &Buffer,
    offset: vk::DeviceSize,
    out: &mut [u8],
) -> GpuResult<()> {
    if out.is_empty() {
        return Ok(());
    }
    let size = out.len() as vk::DeviceSize;
    with_staging(d, device, size, vk::BufferUsageFlags::TRANSFER_DST, |staging| {
        src.copy_to(d, device, offset, staging, 0, size)?;
        staging.read_data(d, 0, out)
    })
}

/// Copies tightly packed texels into `image` and leaves it ready for sampling.
/// `pixels` must cover the whole base level. An empty slice makes no device
/// calls.
pub fn upload_image<D: DeviceDispatch>(
    d: &D,
    device: &Device,
    image: &mut Image,
    pixels: &[u8],
) -> GpuResult<()> {
    if pixels.is_empty() {
        return Ok(());
    }
    let expected = image.byte_size()?;
    let size = pixels.len() as vk::DeviceSize;
    if size != expected {
        error!("image upload of {size} bytes, image holds {expected}");
        return Err(if size < expected {
            GpuError::OutOfBounds {
                offset: 0,
                size: expected,
                capacity: size,
            }
        } else {
            GpuError::OutOfBounds {
                offset: 0,
                size,
                capacity: expected,
            }
        });
    }
    with_staging(d, device, size, vk::BufferUsageFlags::TRANSFER_SRC, |staging| {
        staging.load_data(d, 0, pixels)?;

        let once = SingleUseCommandBuffer::allocate_and_begin(d, device.graphics_command_pool)?;
        let cmd = once.recording_handle("upload an image with")?;
        image.transition(d, cmd, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
        image.copy_from_buffer(d, cmd, staging)?;
        image.transition(d, cmd, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)?;
        once.end_single_use(device.graphics_queue)
    })
}
