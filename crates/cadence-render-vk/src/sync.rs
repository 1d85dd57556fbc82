// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot fences and semaphores plus the image-in-flight table.
//!
//! Slot `s` owns one in-flight fence and two semaphores. Each swapchain image
//! remembers which slot last submitted work against it; that reference is
//! cleared as soon as the slot's fence is observed signaled, so a non-null
//! entry always means "still possibly executing".

use ash::vk;
use tracing::{error, warn};

use crate::dispatch::DeviceDispatch;
use crate::error::{GpuError, GpuResult};

/// Fence wrapper that remembers whether it is known to be signaled.
#[derive(Debug)]
pub struct Fence {
    handle: vk::Fence,
    signaled: bool,
}

impl Fence {
    pub fn create<D: DeviceDispatch>(d: &D, signaled: bool) -> GpuResult<Self> {
        let handle = d
            .create_fence(signaled)
            .map_err(GpuError::vk("vkCreateFence"))?;
        Ok(Self { handle, signaled })
    }

    pub fn handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn is_signaled(&self) -> bool {
        self.signaled
    }

    /// `true` once the fence is signaled. Timeouts and device errors are
    /// logged and reported as `false`.
    pub fn wait<D: DeviceDispatch>(&mut self, d: &D, timeout_ns: u64) -> bool {
        if self.signaled {
            return true;
        }
        match d.wait_for_fence(self.handle, timeout_ns) {
            Ok(()) => {
                self.signaled = true;
                true
            }
            Err(vk::Result::TIMEOUT) => {
                warn!("fence wait timed out after {timeout_ns} ns");
                false
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                error!("fence wait failed: device lost");
                false
            }
            Err(r @ (vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)) => {
                error!("fence wait failed: out of memory ({r})");
                false
            }
            Err(r) => {
                error!("fence wait failed: {r}");
                false
            }
        }
    }

    pub fn reset<D: DeviceDispatch>(&mut self, d: &D) -> GpuResult<()> {
        if self.signaled {
            d.reset_fence(self.handle)
                .map_err(GpuError::vk("vkResetFences"))?;
            self.signaled = false;
        }
        Ok(())
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        if self.handle != vk::Fence::null() {
            d.destroy_fence(self.handle);
            self.handle = vk::Fence::null();
        }
    }
}

#[derive(Debug, Default)]
pub struct FrameSync {
    image_available: Vec<vk::Semaphore>,
    queue_complete: Vec<vk::Semaphore>,
    in_flight: Vec<Fence>,
    images_in_flight: Vec<Option<usize>>,
}

impl FrameSync {
    /// Fences start signaled so the first wait on each slot returns at once.
    pub fn create<D: DeviceDispatch>(
        d: &D,
        frames_in_flight: usize,
        image_count: usize,
    ) -> GpuResult<Self> {
        let mut sync = FrameSync {
            images_in_flight: vec![None; image_count],
            ..Default::default()
        };
        if let Err(e) = sync.populate(d, frames_in_flight) {
            sync.destroy(d);
            return Err(e);
        }
        Ok(sync)
    }

    fn populate<D: DeviceDispatch>(&mut self, d: &D, frames_in_flight: usize) -> GpuResult<()> {
        for _ in 0..frames_in_flight {
            self.image_available.push(
                d.create_semaphore()
                    .map_err(GpuError::vk("vkCreateSemaphore"))?,
            );
            self.queue_complete.push(
                d.create_semaphore()
                    .map_err(GpuError::vk("vkCreateSemaphore"))?,
            );
            self.in_flight.push(Fence::create(d, true)?);
        }
        Ok(())
    }

    pub fn frames_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn image_count(&self) -> usize {
        self.images_in_flight.len()
    }

    pub fn image_available(&self, slot: usize) -> vk::Semaphore {
        self.image_available[slot]
    }

    pub fn queue_complete(&self, slot: usize) -> vk::Semaphore {
        self.queue_complete[slot]
    }

    pub fn fence(&self, slot: usize) -> vk::Fence {
        self.in_flight[slot].handle()
    }

    pub fn image_in_flight(&self, image: usize) -> Option<usize> {
        self.images_in_flight[image]
    }

    pub fn wait_for_frame<D: DeviceDispatch>(
        &mut self,
        d: &D,
        slot: usize,
        timeout_ns: u64,
    ) -> bool {
        let done = self.in_flight[slot].wait(d, timeout_ns);
        if done {
            for entry in &mut self.images_in_flight {
                if *entry == Some(slot) {
                    *entry = None;
                }
            }
        }
        done
    }

    /// Waits for whichever slot last submitted work against `image`.
    pub fn wait_for_image<D: DeviceDispatch>(
        &mut self,
        d: &D,
        image: usize,
        timeout_ns: u64,
    ) -> bool {
        match self.images_in_flight[image] {
            Some(slot) => self.wait_for_frame(d, slot, timeout_ns),
            None => true,
        }
    }

    /// Rejects overwriting a reference that has not been resolved yet.
    pub fn mark_image_in_flight(&mut self, image: usize, slot: usize) -> GpuResult<()> {
        if let Some(prev) = self.images_in_flight[image] {
            error!("image {image} is still in flight under slot {prev}");
            return Err(GpuError::ImageInFlight { image, slot: prev });
        }
        self.images_in_flight[image] = Some(slot);
        Ok(())
    }

    pub fn reset_frame<D: DeviceDispatch>(&mut self, d: &D, slot: usize) -> GpuResult<()> {
        self.in_flight[slot].reset(d)
    }

    /// Forgets every image reference after a swapchain rebuild. The caller has
    /// already waited for the device to go idle.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight.clear();
        self.images_in_flight.resize(image_count, None);
    }

    pub fn destroy<D: DeviceDispatch>(&mut self, d: &D) {
        for s in self.image_available.drain(..) {
            d.destroy_semaphore(s);
        }
        for s in self.queue_complete.drain(..) {
            d.destroy_semaphore(s);
        }
        for mut f in self.in_flight.drain(..) {
            f.destroy(d);
        }
        self.images_in_flight.clear();
    }
}
