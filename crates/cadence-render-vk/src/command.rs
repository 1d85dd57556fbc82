// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use bitflags::bitflags;
use tracing::error;

use crate::dispatch::{DeviceDispatch, SubmitDesc};
use crate::error::{CommandBufferError, GpuError, GpuResult};

bitflags! {
    /// Usage flags forwarded verbatim to `vkBeginCommandBuffer`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BeginFlags: u8 {
        const SINGLE_USE = 1 << 0;
        const RENDER_PASS_CONTINUE = 1 << 1;
        const SIMULTANEOUS_USE = 1 << 2;
    }
}

impl BeginFlags {
    pub fn to_vk(self) -> vk::CommandBufferUsageFlags {
        let mut out = vk::CommandBufferUsageFlags::empty();
        if self.contains(Self::SINGLE_USE) {
            out |= vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT;
        }
        if self.contains(Self::RENDER_PASS_CONTINUE) {
            out |= vk::CommandBufferUsageFlags::RENDER_PASS_CONTINUE;
        }
        if self.contains(Self::SIMULTANEOUS_USE) {
            out |= vk::CommandBufferUsageFlags::SIMULTANEOUS_USE;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandBufferState {
    NotAllocated,
    Ready,
    Recording,
    InRenderPass,
    RecordingEnded,
    Submitted,
}

/// A command buffer plus the state it is known to be in.
///
/// Every transition is checked before the native call is issued; an illegal
/// one returns [`CommandBufferError::InvalidTransition`] and touches nothing.
#[derive(Debug)]
pub struct CommandBuffer {
    handle: vk::CommandBuffer,
    state: CommandBufferState,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self {
            handle: vk::CommandBuffer::null(),
            state: CommandBufferState::NotAllocated,
        }
    }
}

impl CommandBuffer {
    pub fn allocate<D: DeviceDispatch>(
        d: &D,
        pool: vk::CommandPool,
        level: vk::CommandBufferLevel,
    ) -> GpuResult<Self> {
        let handle = d
            .allocate_command_buffer(pool, level)
            .map_err(GpuError::vk("vkAllocateCommandBuffers"))?;
        Ok(Self {
            handle,
            state: CommandBufferState::Ready,
        })
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn state(&self) -> CommandBufferState {
        self.state
    }

    /// Legal from any state. Freeing an unallocated buffer does nothing.
    pub fn free<D: DeviceDispatch>(&mut self, d: &D, pool: vk::CommandPool) {
        if self.state != CommandBufferState::NotAllocated {
            d.free_command_buffer(pool, self.handle);
        }
        self.handle = vk::CommandBuffer::null();
        self.state = CommandBufferState::NotAllocated;
    }

    pub fn begin<D: DeviceDispatch>(&mut self, d: &D, flags: BeginFlags) -> GpuResult<()> {
        self.require_state("begin", &[CommandBufferState::Ready])?;
        d.begin_command_buffer(self.handle, flags.to_vk())
            .map_err(GpuError::vk("vkBeginCommandBuffer"))?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    pub fn end<D: DeviceDispatch>(&mut self, d: &D) -> GpuResult<()> {
        self.require_state("end", &[CommandBufferState::Recording])?;
        d.end_command_buffer(self.handle)
            .map_err(GpuError::vk("vkEndCommandBuffer"))?;
        self.state = CommandBufferState::RecordingEnded;
        Ok(())
    }

    pub fn mark_submitted(&mut self) -> Result<(), CommandBufferError> {
        self.require_state("submit", &[CommandBufferState::RecordingEnded])?;
        self.state = CommandBufferState::Submitted;
        Ok(())
    }

    /// State-only. The pool is created with `RESET_COMMAND_BUFFER`, so the
    /// next begin resets the native buffer implicitly.
    pub fn reset(&mut self) -> Result<(), CommandBufferError> {
        self.require_state("reset", &[CommandBufferState::Submitted])?;
        self.state = CommandBufferState::Ready;
        Ok(())
    }

    pub fn enter_render_pass(&mut self) -> Result<(), CommandBufferError> {
        self.require_state("begin a render pass in", &[CommandBufferState::Recording])?;
        self.state = CommandBufferState::InRenderPass;
        Ok(())
    }

    pub fn leave_render_pass(&mut self) -> Result<(), CommandBufferError> {
        self.require_state("end a render pass in", &[CommandBufferState::InRenderPass])?;
        self.state = CommandBufferState::Recording;
        Ok(())
    }

    /// Handle for `vkCmd*` calls; only available while recording.
    pub fn recording_handle(&self, op: &'static str) -> Result<vk::CommandBuffer, CommandBufferError> {
        self.require_state(
            op,
            &[
                CommandBufferState::Recording,
                CommandBufferState::InRenderPass,
            ],
        )?;
        Ok(self.handle)
    }

    fn require_state(
        &self,
        op: &'static str,
        allowed: &[CommandBufferState],
    ) -> Result<(), CommandBufferError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        error!("illegal command buffer transition: {op} from {:?}", self.state);
        Err(CommandBufferError::InvalidTransition {
            op,
            state: self.state,
        })
    }
}

/// A primary buffer that lives for exactly one submission.
///
/// Ending consumes it; dropping it without ending still frees it back to the
/// pool.
pub struct SingleUseCommandBuffer<'a, D: DeviceDispatch> {
    dispatch: &'a D,
    pool: vk::CommandPool,
    buffer: CommandBuffer,
}

impl<'a, D: DeviceDispatch> SingleUseCommandBuffer<'a, D> {
    pub fn allocate_and_begin(dispatch: &'a D, pool: vk::CommandPool) -> GpuResult<Self> {
        let buffer = CommandBuffer::allocate(dispatch, pool, vk::CommandBufferLevel::PRIMARY)?;
        let mut this = Self {
            dispatch,
            pool,
            buffer,
        };
        this.buffer.begin(dispatch, BeginFlags::SINGLE_USE)?;
        Ok(this)
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer.handle()
    }

    pub fn recording_handle(&self, op: &'static str) -> GpuResult<vk::CommandBuffer> {
        Ok(self.buffer.recording_handle(op)?)
    }

    /// End, submit, wait for `queue` to go idle, free.
    pub fn end_single_use(mut self, queue: vk::Queue) -> GpuResult<()> {
        let d = self.dispatch;
        self.buffer.end(d)?;
        let cmds = [self.buffer.handle()];
        let submit = SubmitDesc {
            command_buffers: &cmds,
            ..Default::default()
        };
        d.queue_submit(queue, &submit, vk::Fence::null())
            .map_err(GpuError::vk("vkQueueSubmit"))?;
        self.buffer.mark_submitted()?;
        d.queue_wait_idle(queue)
            .map_err(GpuError::vk("vkQueueWaitIdle"))?;
        Ok(())
    }
}

impl<D: DeviceDispatch> Drop for SingleUseCommandBuffer<'_, D> {
    fn drop(&mut self) {
        self.buffer.free(self.dispatch, self.pool);
    }
}
