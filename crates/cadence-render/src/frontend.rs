// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use tracing::{debug, error, warn};

use crate::{ObjectId, RenderPacket, RenderSize, RendererBackend, SlotAllocator, SlotError};

/// Backend-agnostic entry point the application loop talks to.
pub struct RendererFrontend {
    backend: Box<dyn RendererBackend>,
    frame_number: u64,
    objects: SlotAllocator,
}

impl RendererFrontend {
    pub fn new(backend: Box<dyn RendererBackend>) -> Self {
        Self {
            backend,
            frame_number: 0,
            objects: SlotAllocator::new(),
        }
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn on_resized(&mut self, width: u32, height: u32) {
        let size = RenderSize { width, height };
        if size.is_zero() {
            debug!("frontend resize → {width}x{height}, window minimized");
        } else {
            debug!("frontend resize → {width}x{height}");
        }
        self.backend.resized(size);
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.backend.set_clear_color(rgba);
    }

    /// Runs one begin/end pair. A skipped frame is not an error; an `Err` means
    /// the renderer cannot continue and the caller must shut down.
    pub fn draw_frame(&mut self, packet: &RenderPacket) -> Result<()> {
        if !self.backend.begin_frame(packet.delta_time).context("begin_frame")? {
            return Ok(());
        }

        let ended = self.backend.end_frame(packet.delta_time);
        self.frame_number += 1;
        if let Err(e) = ended {
            error!("end_frame failed, shutting down: {e:#}");
            return Err(e.context("end_frame"));
        }
        Ok(())
    }

    pub fn acquire_object_id(&mut self) -> ObjectId {
        self.objects.acquire()
    }

    pub fn release_object_id(&mut self, id: ObjectId) -> Result<(), SlotError> {
        self.objects.release(id)
    }

    pub fn live_object_count(&self) -> usize {
        self.objects.live_count()
    }

    pub fn shutdown(&mut self) {
        let live = self.objects.live_count();
        if live > 0 {
            warn!("{live} object ids still held at shutdown");
        }
        self.backend.shutdown();
    }
}
