// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use tracing::{debug, error};

use crate::command::SingleUseCommandBuffer;
use crate::device::Device;
use crate::dispatch::DeviceDispatch;
use crate::error::{GpuError, GpuResult};

/// A buffer handle plus the device memory backing it.
#[derive(Debug, Default)]
pub struct Buffer {
    handle: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_flags: vk::MemoryPropertyFlags,
    memory_index: u32,
    bound: bool,
}

impl Buffer {
    pub fn create<D: DeviceDispatch>(
        d: &D,
        device: &Device,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
        bind_on_create: bool,
    ) -> GpuResult<Self> {
        let handle = d
            .create_buffer(size, usage)
            .map_err(GpuError::vk("vkCreateBuffer"))?;
        let mut buffer = Buffer {
            handle,
            size,
            usage,
            memory_flags,
            ..Default::default()
        };
        if let Err(e) = buffer.allocate(d, device, bind_on_create) {
            buffer.destroy(d);
            return Err(e);
        }
        Ok(buffer)
    }

    fn allocate<D: DeviceDispatch>(
        &mut self,
        d: &D,
        device: &Device,
        bind_on_create: bool,
    ) -> GpuResult<()> {
        let reqs = d.buffer_memory_requirements(self.handle);
        self.memory_index = device.find_memory_type(reqs.memory_type_bits, self.memory_flags)?;
        self.memory = d
            .allocate_memory(reqs.size, self.memory_index)
            .map_err(GpuError::vk("vkAllocateMemory"))?;
        if bind_on_create {
            self.bind(d, 0)?;
        }
        Ok(())
    }

    pub fn bind<D: DeviceDispatch>(&mut self, d: &D, offset: vk::DeviceSize) -> GpuResult<()> {
        d.bind_buffer_memory(self.handle, self.memory, offset)
            .map_err(GpuError::vk("vkBindBufferMemory"))?;
        self.bound = true;
        Ok(())
    }

    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    fn check_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> GpuResult<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(GpuError::OutOfBounds {
                offset,
                size,
                capacity: self.size,
            }),
        }
    }

    /// Direct write. The buffer must be host visible.
    pub fn load_data<D: DeviceDispatch>(
        &self,
        d: &D,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> GpuResult<()> {
        self.check_range(offset, data.len() as vk::DeviceSize)?;
        d.write_memory(self.memory, offset, data)
            .map_err(GpuError::vk("vkMapMemory"))
    }

    /// Direct read. The buffer must be host visible.
    pub fn read_data<D: DeviceDispatch>(
        &self,
        d: &D,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> GpuResult<()> {
        self.check_range(offset, out.len() as vk::DeviceSize)?;
        d.read_memory(self.memory, offset, out)
            .map_err(GpuError::vk("vkMapMemory"))
    }

    /// Device-side copy through a single-use command buffer on the graphics
    /// queue. Blocks until the queue is idle.
    pub fn copy_to<D: DeviceDispatch>(
        &self,
        d: &D,
        device: &Device,
        src_offset: vk::DeviceSize,
        dst: &Buffer,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> GpuResult<()> {
        self.check_range(src_offset, size)?;
        dst.check_range(dst_offset, size)?;

        let once = SingleUseCommandBuffer::allocate_and_begin(d, device.graphics_command_pool)?;
        let region = vk::BufferCopy {
            src_offset,
            dst_offset,
            size,
        };
        d.cmd_copy_buffer(
            once.recording_handle("copy a buffer with")?,
            self.handle,
            dst.handle,
            region,
        );
        once.end_single_use(device.graphics_queue)
    }

    /// Replaces the buffer with one of `new_size` bytes, keeping as much of the
    /// old contents as fits.
    pub fn resize<D: DeviceDispatch>(
        &mut self,
        d: &D,
        device: &Device,
        new_size: vk::DeviceSize,
    ) -> GpuResult<()> {
        let mut replacement = Buffer::create(
            d,
            device,
            new_size,
            self.usage,
            self.memory_flags,
            true,
        )?;
        let keep = self.size.min(new_size);
        if keep > 0 {
            if let Err(e) = self.copy_to(d, device, 0, &replacement, 0, keep) {
                error!("buffer resize copy failed: {e}");
                replacement.destroy(d);
                return Err(e);
            }
        }
        if let Err(result) = d.device_wait_idle() {
            error!("vkDeviceWaitIdle failed during buffer resize: {result}");
            replacement.destroy(d);
            return Err(GpuError::Vulkan {
                call: "vkDeviceWaitIdle",
                result,
            });
        }

        debug!("buffer resized {} -> {} bytes", self.size, new_size);
        let mut old = std::mem::replace(self, replacement);
        old.destroy(d);
        Ok(())
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.memory != vk::DeviceMemory::null() {
            d.free_memory(self.memory);
            self.memory = vk::DeviceMemory::null();
        }
        if self.handle != vk::Buffer::null() {
            d.destroy_buffer(self.handle);
            self.handle = vk::Buffer::null();
        }
        self.bound = false;
    }
}
