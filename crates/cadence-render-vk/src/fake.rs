// SPDX-License-Identifier: CEPL-1.0
//! Simulated device for unit tests.
//!
//! GPU work completes on a virtual clock that only advances when the CPU
//! blocks (fence waits, queue/device idle). Any reuse of a resource whose
//! submission has not completed on that clock is recorded as a violation.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{HashMap, HashSet, VecDeque};

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::device::{Device, QueueFamilyIndices};
use crate::dispatch::{
    DeviceDispatch, ImageBarrier, ImageDesc, RenderPassBegin, RenderPassDesc, SubmitDesc,
    SwapchainDesc, SwapchainSupport,
};

pub(crate) const DEVICE_LOCAL_TYPE: u32 = 0;
pub(crate) const HOST_VISIBLE_TYPE: u32 = 1;
const BYTES_PER_TEXEL: usize = 4;

#[derive(Clone, Debug)]
enum Op {
    CopyBuffer {
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    },
    CopyBufferToImage {
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    },
    Barrier(ImageBarrier),
    Draw,
}

#[derive(Debug, Default)]
struct FakeFence {
    signaled: bool,
    pending: Option<u64>,
}

#[derive(Debug, Default)]
struct FakeCommandBuffer {
    recording: bool,
    ops: Vec<Op>,
    busy_until: Option<u64>,
}

#[derive(Debug)]
struct FakeMemory {
    type_index: u32,
    data: Vec<u8>,
}

#[derive(Debug)]
struct FakeBuffer {
    size: vk::DeviceSize,
    binding: Option<(vk::DeviceMemory, vk::DeviceSize)>,
}

#[derive(Debug)]
struct FakeImage {
    extent: vk::Extent2D,
    layout: vk::ImageLayout,
    data: Vec<u8>,
}

#[derive(Debug)]
pub(crate) struct FakeSwapchain {
    pub images: Vec<vk::Image>,
    pub extent: vk::Extent2D,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub sharing_families: usize,
    acquired: Vec<bool>,
    cursor: usize,
}

#[derive(Debug)]
pub(crate) struct FakeState {
    pub support: SwapchainSupport,
    pub depth_formats: Vec<vk::Format>,
    pub acquire_results: VecDeque<vk::Result>,
    pub present_results: VecDeque<vk::Result>,
    pub submit_results: VecDeque<vk::Result>,
    pub wait_idle_results: VecDeque<vk::Result>,
    pub fixed_delay: u64,
    pub begin_flags: Vec<vk::CommandBufferUsageFlags>,
    pub calls: Vec<&'static str>,
    pub violations: Vec<String>,
    pub clock: u64,

    rng: Option<(StdRng, u64)>,
    random_acquire: bool,
    next_handle: u64,
    horizon: u64,

    fences: HashMap<u64, FakeFence>,
    semaphores: HashSet<u64>,
    pools: HashSet<u64>,
    command_buffers: HashMap<u64, FakeCommandBuffer>,
    memories: HashMap<u64, FakeMemory>,
    buffers: HashMap<u64, FakeBuffer>,
    images: HashMap<u64, FakeImage>,
    views: HashSet<u64>,
    render_passes: HashSet<u64>,
    framebuffers: HashSet<u64>,
    pub swapchains: HashMap<u64, FakeSwapchain>,
}

impl FakeState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn violation(&mut self, msg: String) {
        self.violations.push(msg);
    }

    fn settle(&mut self) {
        let clock = self.clock;
        for f in self.fences.values_mut() {
            if matches!(f.pending, Some(t) if t <= clock) {
                f.pending = None;
                f.signaled = true;
            }
        }
    }

    fn delay(&mut self) -> u64 {
        match &mut self.rng {
            Some((rng, max)) => rng.gen_range(0..=*max),
            None => self.fixed_delay,
        }
    }

    fn gpu_busy(&self) -> bool {
        self.horizon > self.clock
    }

    fn check_idle_destroy(&mut self, what: &str) {
        if self.gpu_busy() {
            self.violation(format!("{what} destroyed while GPU work is pending"));
        }
    }

    fn record(&mut self, cmd: vk::CommandBuffer, op: Op) {
        let recording = self
            .command_buffers
            .get(&cmd.as_raw())
            .is_some_and(|cb| cb.recording);
        if !recording {
            self.violation(format!("{op:?} recorded outside of recording state"));
            return;
        }
        if let Some(cb) = self.command_buffers.get_mut(&cmd.as_raw()) {
            cb.ops.push(op);
        }
    }

    fn buffer_span(&self, buffer: vk::Buffer, offset: u64, size: u64) -> Option<(u64, usize)> {
        let b = self.buffers.get(&buffer.as_raw())?;
        let (mem, base) = b.binding?;
        if offset + size > b.size {
            return None;
        }
        Some((mem.as_raw(), (base + offset) as usize))
    }

    fn execute(&mut self, op: Op) {
        match op {
            Op::CopyBuffer { src, dst, region } => {
                let (Some((sm, so)), Some((dm, doff))) = (
                    self.buffer_span(src, region.src_offset, region.size),
                    self.buffer_span(dst, region.dst_offset, region.size),
                ) else {
                    self.violation("copy between unbound or undersized buffers".into());
                    return;
                };
                let len = region.size as usize;
                let bytes = self.memories[&sm].data[so..so + len].to_vec();
                if let Some(m) = self.memories.get_mut(&dm) {
                    m.data[doff..doff + len].copy_from_slice(&bytes);
                }
            }
            Op::CopyBufferToImage { src, dst, region } => {
                let len = region.image_extent.width as usize
                    * region.image_extent.height as usize
                    * BYTES_PER_TEXEL;
                let Some((sm, so)) = self.buffer_span(src, region.buffer_offset, len as u64)
                else {
                    self.violation("buffer-to-image copy from undersized buffer".into());
                    return;
                };
                let bytes = self.memories[&sm].data[so..so + len].to_vec();
                let layout = self.images.get(&dst.as_raw()).map(|i| i.layout);
                if layout != Some(vk::ImageLayout::TRANSFER_DST_OPTIMAL) {
                    self.violation(format!("buffer-to-image copy with image in {layout:?}"));
                    return;
                }
                if let Some(img) = self.images.get_mut(&dst.as_raw()) {
                    img.data[..len].copy_from_slice(&bytes);
                }
            }
            Op::Barrier(b) => {
                let current = self.images.get(&b.image.as_raw()).map(|i| i.layout);
                match current {
                    Some(layout) => {
                        if b.old_layout != vk::ImageLayout::UNDEFINED && b.old_layout != layout {
                            self.violation(format!(
                                "barrier expects {:?} but image is {:?}",
                                b.old_layout, layout
                            ));
                        }
                        if let Some(img) = self.images.get_mut(&b.image.as_raw()) {
                            img.layout = b.new_layout;
                        }
                    }
                    None => self.violation("barrier on unknown image".into()),
                }
            }
            Op::Draw => {}
        }
    }

    fn mappable(&self, memory: vk::DeviceMemory, end: usize) -> bool {
        self.memories
            .get(&memory.as_raw())
            .map(|m| m.type_index == HOST_VISIBLE_TYPE && end <= m.data.len())
            .unwrap_or(false)
    }

    fn live_objects(&self) -> usize {
        self.fences.len()
            + self.semaphores.len()
            + self.pools.len()
            + self.command_buffers.len()
            + self.memories.len()
            + self.buffers.len()
            + self.images.len()
            + self.views.len()
            + self.render_passes.len()
            + self.framebuffers.len()
            + self.swapchains.len()
    }
}

pub(crate) struct FakeGpu {
    state: RefCell<FakeState>,
}

impl FakeGpu {
    pub fn new() -> Self {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 8192,
                height: 8192,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        };
        let support = SwapchainSupport {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };
        Self {
            state: RefCell::new(FakeState {
                support,
                depth_formats: vec![vk::Format::D32_SFLOAT],
                acquire_results: VecDeque::new(),
                present_results: VecDeque::new(),
                submit_results: VecDeque::new(),
                wait_idle_results: VecDeque::new(),
                fixed_delay: 1,
                begin_flags: Vec::new(),
                calls: Vec::new(),
                violations: Vec::new(),
                clock: 0,
                rng: None,
                random_acquire: false,
                next_handle: 0,
                horizon: 0,
                fences: HashMap::new(),
                semaphores: HashSet::new(),
                pools: HashSet::new(),
                command_buffers: HashMap::new(),
                memories: HashMap::new(),
                buffers: HashMap::new(),
                images: HashMap::new(),
                views: HashSet::new(),
                render_passes: HashSet::new(),
                framebuffers: HashSet::new(),
                swapchains: HashMap::new(),
            }),
        }
    }

    /// Random completion delays in `0..=max_delay` ticks and random image
    /// order on acquire.
    pub fn with_random_timing(seed: u64, max_delay: u64) -> Self {
        let gpu = Self::new();
        {
            let mut s = gpu.state_mut();
            s.rng = Some((StdRng::seed_from_u64(seed), max_delay));
            s.random_acquire = true;
        }
        gpu
    }

    /// A `Device` with every queue on family 0.
    pub fn device(&self) -> Device {
        let families = QueueFamilyIndices {
            graphics: 0,
            present: 0,
            transfer: 0,
            compute: Some(0),
        };
        Device::from_parts(
            self,
            vk::PhysicalDevice::from_raw(1),
            families,
            [vk::Queue::null(); 3],
        )
        .expect("fake device")
    }

    pub fn state(&self) -> Ref<'_, FakeState> {
        self.state.borrow()
    }

    pub fn state_mut(&self) -> RefMut<'_, FakeState> {
        self.state.borrow_mut()
    }

    pub fn call_count(&self) -> usize {
        self.state().calls.len()
    }

    pub fn count(&self, name: &str) -> usize {
        self.state().calls.iter().filter(|c| **c == name).count()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state().violations.clone()
    }

    pub fn live_objects(&self) -> usize {
        self.state().live_objects()
    }

    pub fn image_layout(&self, image: vk::Image) -> Option<vk::ImageLayout> {
        self.state().images.get(&image.as_raw()).map(|i| i.layout)
    }

    pub fn image_bytes(&self, image: vk::Image) -> Vec<u8> {
        self.state()
            .images
            .get(&image.as_raw())
            .map(|i| i.data.clone())
            .unwrap_or_default()
    }

    pub fn swapchain_extent(&self) -> Option<vk::Extent2D> {
        self.state().swapchains.values().next().map(|s| s.extent)
    }

    fn call(&self, name: &'static str) -> RefMut<'_, FakeState> {
        let mut s = self.state.borrow_mut();
        s.calls.push(name);
        s
    }
}

impl DeviceDispatch for FakeGpu {
    fn device_wait_idle(&self) -> VkResult<()> {
        let mut s = self.call("device_wait_idle");
        if let Some(err) = s.wait_idle_results.pop_front() {
            return Err(err);
        }
        s.clock = s.clock.max(s.horizon);
        s.settle();
        Ok(())
    }

    fn destroy_device(&self) {
        let mut s = self.call("destroy_device");
        s.check_idle_destroy("device");
        let live = s.live_objects();
        if live > 0 {
            s.violation(format!("device destroyed with {live} live objects"));
        }
    }

    fn queue_wait_idle(&self, _queue: vk::Queue) -> VkResult<()> {
        let mut s = self.call("queue_wait_idle");
        s.clock = s.clock.max(s.horizon);
        s.settle();
        Ok(())
    }

    fn queue_submit(
        &self,
        _queue: vk::Queue,
        submit: &SubmitDesc<'_>,
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut s = self.call("queue_submit");
        if let Some(r) = s.submit_results.pop_front() {
            if r != vk::Result::SUCCESS {
                return Err(r);
            }
        }
        s.settle();
        let clock = s.clock;
        let done = clock + s.delay();

        for &cmd in submit.command_buffers {
            let status = s
                .command_buffers
                .get(&cmd.as_raw())
                .map(|cb| (cb.recording, matches!(cb.busy_until, Some(t) if t > clock)));
            match status {
                None => {
                    s.violation(format!("submit of unknown command buffer {cmd:?}"));
                    continue;
                }
                Some((true, _)) => {
                    s.violation("submit of a command buffer still recording".into());
                    continue;
                }
                Some((_, true)) => {
                    s.violation("resubmit of a command buffer still executing".into());
                    continue;
                }
                Some(_) => {}
            }
            let ops = match s.command_buffers.get_mut(&cmd.as_raw()) {
                Some(cb) => {
                    cb.busy_until = Some(done);
                    cb.ops.clone()
                }
                None => continue,
            };
            for op in ops {
                s.execute(op);
            }
        }

        if fence != vk::Fence::null() {
            let still_pending = match s.fences.get(&fence.as_raw()) {
                Some(f) => f.pending.is_some() || f.signaled,
                None => true,
            };
            if still_pending {
                s.violation("submit with a fence that is signaled or in use".into());
            }
            if let Some(f) = s.fences.get_mut(&fence.as_raw()) {
                f.signaled = false;
                f.pending = Some(done);
            }
        }
        s.horizon = s.horizon.max(done);
        Ok(())
    }

    fn swapchain_support(&self) -> VkResult<SwapchainSupport> {
        Ok(self.call("swapchain_support").support.clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let s = self.call("format_properties");
        let mut props = vk::FormatProperties::default();
        if s.depth_formats.contains(&format) {
            props.optimal_tiling_features = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        props
    }

    fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        let _s = self.call("memory_properties");
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 2,
            memory_heap_count: 2,
            ..Default::default()
        };
        props.memory_types[DEVICE_LOCAL_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            heap_index: 0,
        };
        props.memory_types[HOST_VISIBLE_TYPE as usize] = vk::MemoryType {
            property_flags: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            heap_index: 1,
        };
        props
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut s = self.call("create_fence");
        let h = s.handle();
        s.fences.insert(
            h,
            FakeFence {
                signaled,
                pending: None,
            },
        );
        Ok(vk::Fence::from_raw(h))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut s = self.call("destroy_fence");
        s.settle();
        if matches!(s.fences.get(&fence.as_raw()), Some(f) if f.pending.is_some()) {
            s.violation("fence destroyed while pending".into());
        }
        s.fences.remove(&fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> VkResult<()> {
        let mut s = self.call("wait_for_fence");
        s.settle();
        let (signaled, pending) = match s.fences.get(&fence.as_raw()) {
            Some(f) => (f.signaled, f.pending),
            None => return Err(vk::Result::ERROR_DEVICE_LOST),
        };
        if signaled {
            return Ok(());
        }
        match pending {
            Some(t) if t <= s.clock.saturating_add(timeout_ns) => {
                s.clock = s.clock.max(t);
                s.settle();
                Ok(())
            }
            Some(_) => {
                s.clock = s.clock.saturating_add(timeout_ns);
                s.settle();
                Err(vk::Result::TIMEOUT)
            }
            None => {
                if timeout_ns == u64::MAX {
                    s.violation("infinite wait on a fence nothing will signal".into());
                }
                s.clock = s.clock.saturating_add(timeout_ns);
                Err(vk::Result::TIMEOUT)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut s = self.call("reset_fence");
        s.settle();
        let pending = s
            .fences
            .get(&fence.as_raw())
            .map(|f| f.pending.is_some())
            .unwrap_or(false);
        if pending {
            s.violation("fence reset while its submission is pending".into());
        }
        if let Some(f) = s.fences.get_mut(&fence.as_raw()) {
            f.signaled = false;
        }
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut s = self.call("create_semaphore");
        let h = s.handle();
        s.semaphores.insert(h);
        Ok(vk::Semaphore::from_raw(h))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut s = self.call("destroy_semaphore");
        s.check_idle_destroy("semaphore");
        s.semaphores.remove(&semaphore.as_raw());
    }

    fn create_command_pool(&self, _queue_family: u32) -> VkResult<vk::CommandPool> {
        let mut s = self.call("create_command_pool");
        let h = s.handle();
        s.pools.insert(h);
        Ok(vk::CommandPool::from_raw(h))
    }

    fn destroy_command_pool(&self, pool: vk::CommandPool) {
        let mut s = self.call("destroy_command_pool");
        s.check_idle_destroy("command pool");
        s.pools.remove(&pool.as_raw());
    }

    fn allocate_command_buffer(
        &self,
        pool: vk::CommandPool,
        _level: vk::CommandBufferLevel,
    ) -> VkResult<vk::CommandBuffer> {
        let mut s = self.call("allocate_command_buffer");
        if !s.pools.contains(&pool.as_raw()) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        let h = s.handle();
        s.command_buffers.insert(h, FakeCommandBuffer::default());
        Ok(vk::CommandBuffer::from_raw(h))
    }

    fn free_command_buffer(&self, _pool: vk::CommandPool, cmd: vk::CommandBuffer) {
        let mut s = self.call("free_command_buffer");
        let clock = s.clock;
        let busy = s
            .command_buffers
            .get(&cmd.as_raw())
            .is_some_and(|cb| matches!(cb.busy_until, Some(t) if t > clock));
        if busy {
            s.violation("command buffer freed while executing".into());
        }
        s.command_buffers.remove(&cmd.as_raw());
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        let mut s = self.call("begin_command_buffer");
        s.begin_flags.push(flags);
        let clock = s.clock;
        let (busy, recording) = match s.command_buffers.get(&cmd.as_raw()) {
            Some(cb) => (
                matches!(cb.busy_until, Some(t) if t > clock),
                cb.recording,
            ),
            None => return Err(vk::Result::ERROR_DEVICE_LOST),
        };
        if busy {
            s.violation("command buffer re-recorded while still executing".into());
        }
        if recording {
            s.violation("begin on a command buffer already recording".into());
        }
        if let Some(cb) = s.command_buffers.get_mut(&cmd.as_raw()) {
            cb.recording = true;
            cb.ops.clear();
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        let mut s = self.call("end_command_buffer");
        let recording = s
            .command_buffers
            .get(&cmd.as_raw())
            .map(|cb| cb.recording)
            .unwrap_or(false);
        if !recording {
            s.violation("end on a command buffer that is not recording".into());
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }
        if let Some(cb) = s.command_buffers.get_mut(&cmd.as_raw()) {
            cb.recording = false;
        }
        Ok(())
    }

    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, _viewport: vk::Viewport) {
        self.call("cmd_set_viewport").record(cmd, Op::Draw);
    }

    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {
        self.call("cmd_set_scissor").record(cmd, Op::Draw);
    }

    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, _begin: &RenderPassBegin) {
        self.call("cmd_begin_render_pass").record(cmd, Op::Draw);
    }

    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer) {
        self.call("cmd_end_render_pass").record(cmd, Op::Draw);
    }

    fn cmd_copy_buffer(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) {
        self.call("cmd_copy_buffer")
            .record(cmd, Op::CopyBuffer { src, dst, region });
    }

    fn cmd_copy_buffer_to_image(
        &self,
        cmd: vk::CommandBuffer,
        src: vk::Buffer,
        dst: vk::Image,
        region: vk::BufferImageCopy,
    ) {
        self.call("cmd_copy_buffer_to_image")
            .record(cmd, Op::CopyBufferToImage { src, dst, region });
    }

    fn cmd_image_barrier(&self, cmd: vk::CommandBuffer, barrier: &ImageBarrier) {
        self.call("cmd_image_barrier")
            .record(cmd, Op::Barrier(*barrier));
    }

    fn allocate_memory(
        &self,
        size: vk::DeviceSize,
        type_index: u32,
    ) -> VkResult<vk::DeviceMemory> {
        let mut s = self.call("allocate_memory");
        let h = s.handle();
        s.memories.insert(
            h,
            FakeMemory {
                type_index,
                data: vec![0; size as usize],
            },
        );
        Ok(vk::DeviceMemory::from_raw(h))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.call("free_memory");
        s.check_idle_destroy("memory");
        s.memories.remove(&memory.as_raw());
    }

    fn write_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> VkResult<()> {
        let mut s = self.call("write_memory");
        let start = offset as usize;
        if !s.mappable(memory, start + data.len()) {
            s.violation("write to unmappable or undersized memory".into());
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        if let Some(m) = s.memories.get_mut(&memory.as_raw()) {
            m.data[start..start + data.len()].copy_from_slice(data);
        }
        Ok(())
    }

    fn read_memory(
        &self,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> VkResult<()> {
        let mut s = self.call("read_memory");
        let start = offset as usize;
        if !s.mappable(memory, start + out.len()) {
            s.violation("read from unmappable or undersized memory".into());
            return Err(vk::Result::ERROR_MEMORY_MAP_FAILED);
        }
        if let Some(m) = s.memories.get(&memory.as_raw()) {
            out.copy_from_slice(&m.data[start..start + out.len()]);
        }
        Ok(())
    }

    fn create_buffer(
        &self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
    ) -> VkResult<vk::Buffer> {
        let mut s = self.call("create_buffer");
        if size == 0 {
            s.violation("zero-sized buffer".into());
        }
        let h = s.handle();
        s.buffers.insert(
            h,
            FakeBuffer {
                size,
                binding: None,
            },
        );
        Ok(vk::Buffer::from_raw(h))
    }

    fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut s = self.call("destroy_buffer");
        s.check_idle_destroy("buffer");
        s.buffers.remove(&buffer.as_raw());
    }

    fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let s = self.call("buffer_memory_requirements");
        vk::MemoryRequirements {
            size: s.buffers.get(&buffer.as_raw()).map(|b| b.size).unwrap_or(0),
            alignment: 16,
            memory_type_bits: (1 << DEVICE_LOCAL_TYPE) | (1 << HOST_VISIBLE_TYPE),
        }
    }

    fn bind_buffer_memory(
        &self,
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
    ) -> VkResult<()> {
        let mut s = self.call("bind_buffer_memory");
        if !s.memories.contains_key(&memory.as_raw()) {
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        match s.buffers.get_mut(&buffer.as_raw()) {
            Some(b) => {
                b.binding = Some((memory, offset));
                Ok(())
            }
            None => Err(vk::Result::ERROR_DEVICE_LOST),
        }
    }

    fn create_image(&self, desc: &ImageDesc) -> VkResult<vk::Image> {
        let mut s = self.call("create_image");
        let h = s.handle();
        let len = desc.extent.width as usize * desc.extent.height as usize * BYTES_PER_TEXEL;
        s.images.insert(
            h,
            FakeImage {
                extent: desc.extent,
                layout: vk::ImageLayout::UNDEFINED,
                data: vec![0; len],
            },
        );
        Ok(vk::Image::from_raw(h))
    }

    fn destroy_image(&self, image: vk::Image) {
        let mut s = self.call("destroy_image");
        s.check_idle_destroy("image");
        s.images.remove(&image.as_raw());
    }

    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements {
        let s = self.call("image_memory_requirements");
        let size = s
            .images
            .get(&image.as_raw())
            .map(|i| i.extent.width as u64 * i.extent.height as u64 * BYTES_PER_TEXEL as u64)
            .unwrap_or(0);
        vk::MemoryRequirements {
            size,
            alignment: 256,
            memory_type_bits: 1 << DEVICE_LOCAL_TYPE,
        }
    }

    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()> {
        let s = self.call("bind_image_memory");
        if s.images.contains_key(&image.as_raw()) && s.memories.contains_key(&memory.as_raw()) {
            Ok(())
        } else {
            Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)
        }
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
        _aspect: vk::ImageAspectFlags,
    ) -> VkResult<vk::ImageView> {
        let mut s = self.call("create_image_view");
        let h = s.handle();
        s.views.insert(h);
        Ok(vk::ImageView::from_raw(h))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.call("destroy_image_view");
        s.check_idle_destroy("image view");
        s.views.remove(&view.as_raw());
    }

    fn create_render_pass(&self, _desc: &RenderPassDesc) -> VkResult<vk::RenderPass> {
        let mut s = self.call("create_render_pass");
        let h = s.handle();
        s.render_passes.insert(h);
        Ok(vk::RenderPass::from_raw(h))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        let mut s = self.call("destroy_render_pass");
        s.check_idle_destroy("render pass");
        s.render_passes.remove(&render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        _extent: vk::Extent2D,
    ) -> VkResult<vk::Framebuffer> {
        let mut s = self.call("create_framebuffer");
        if !s.render_passes.contains(&render_pass.as_raw())
            || attachments.iter().any(|v| !s.views.contains(&v.as_raw()))
        {
            s.violation("framebuffer over destroyed render pass or view".into());
        }
        let h = s.handle();
        s.framebuffers.insert(h);
        Ok(vk::Framebuffer::from_raw(h))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.call("destroy_framebuffer");
        s.check_idle_destroy("framebuffer");
        s.framebuffers.remove(&framebuffer.as_raw());
    }

    fn create_swapchain(&self, desc: &SwapchainDesc<'_>) -> VkResult<vk::SwapchainKHR> {
        let mut s = self.call("create_swapchain");
        let h = s.handle();
        let images = (0..desc.min_image_count)
            .map(|_| vk::Image::from_raw(s.handle()))
            .collect::<Vec<_>>();
        let count = images.len();
        s.swapchains.insert(
            h,
            FakeSwapchain {
                images,
                extent: desc.extent,
                format: desc.surface_format,
                present_mode: desc.present_mode,
                sharing_families: desc.queue_family_indices.len(),
                acquired: vec![false; count],
                cursor: 0,
            },
        );
        Ok(vk::SwapchainKHR::from_raw(h))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let s = self.call("swapchain_images");
        s.swapchains
            .get(&swapchain.as_raw())
            .map(|sc| sc.images.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.call("destroy_swapchain");
        s.check_idle_destroy("swapchain");
        s.swapchains.remove(&swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        _semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let mut s = self.call("acquire_next_image");
        let scripted = s.acquire_results.pop_front().unwrap_or(vk::Result::SUCCESS);
        let suboptimal = match scripted {
            vk::Result::SUCCESS => false,
            vk::Result::SUBOPTIMAL_KHR => true,
            err => return Err(err),
        };

        let random = s.random_acquire;
        let pick = {
            let Some(sc) = s.swapchains.get(&swapchain.as_raw()) else {
                return Err(vk::Result::ERROR_SURFACE_LOST_KHR);
            };
            let free: Vec<usize> = (0..sc.images.len())
                .map(|i| (sc.cursor + i) % sc.images.len())
                .filter(|&i| !sc.acquired[i])
                .collect();
            (free, sc.images.len())
        };
        let (free, _count) = pick;
        if free.is_empty() {
            s.violation("acquire with every image already acquired".into());
            return Err(vk::Result::NOT_READY);
        }
        let index = if random {
            let n = free.len();
            let k = match &mut s.rng {
                Some((rng, _)) => rng.gen_range(0..n),
                None => 0,
            };
            free[k]
        } else {
            free[0]
        };
        if let Some(sc) = s.swapchains.get_mut(&swapchain.as_raw()) {
            sc.acquired[index] = true;
            sc.cursor = (index + 1) % sc.images.len();
        }
        Ok((index as u32, suboptimal))
    }

    fn queue_present(
        &self,
        _queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        _wait: vk::Semaphore,
    ) -> VkResult<bool> {
        let mut s = self.call("queue_present");
        let was_acquired = match s.swapchains.get_mut(&swapchain.as_raw()) {
            Some(sc) => match sc.acquired.get_mut(image_index as usize) {
                Some(flag) => std::mem::replace(flag, false),
                None => false,
            },
            None => return Err(vk::Result::ERROR_SURFACE_LOST_KHR),
        };
        if !was_acquired {
            s.violation(format!("present of image {image_index} that was not acquired"));
        }
        match s.present_results.pop_front().unwrap_or(vk::Result::SUCCESS) {
            vk::Result::SUCCESS => Ok(false),
            vk::Result::SUBOPTIMAL_KHR => Ok(true),
            err => Err(err),
        }
    }
}
