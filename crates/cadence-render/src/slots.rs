// SPDX-License-Identifier: CEPL-1.0
use thiserror::Error;

/// Handle into per-object renderer state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    #[error("object id {0} is not live")]
    NotLive(u32),
}

/// Arena of object slots. Released indices go on a free stack and are handed
/// out again before the arena grows.
#[derive(Debug, Default)]
pub struct SlotAllocator {
    live: Vec<bool>,
    free: Vec<u32>,
}

impl SlotAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self) -> ObjectId {
        if let Some(index) = self.free.pop() {
            self.live[index as usize] = true;
            return ObjectId(index);
        }
        let index = self.live.len() as u32;
        self.live.push(true);
        ObjectId(index)
    }

    pub fn release(&mut self, id: ObjectId) -> Result<(), SlotError> {
        match self.live.get_mut(id.index()) {
            Some(slot) if *slot => {
                *slot = false;
                self.free.push(id.0);
                Ok(())
            }
            _ => Err(SlotError::NotLive(id.0)),
        }
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.live.get(id.index()).copied().unwrap_or(false)
    }

    pub fn live_count(&self) -> usize {
        self.live.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.live.len()
    }
}
