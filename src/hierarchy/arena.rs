//! Generational storage for instances.
//!
//! Freed slots are reused with a bumped generation, so an [`InstanceId`] held
//! past its instance's destruction never aliases a newer instance.

use super::{Instance, InstanceId};
use crate::error::HierarchyError;

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    instance: Option<Instance>,
}

#[derive(Debug, Default)]
pub struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    roots: Vec<InstanceId>,
    next_order: u64,
    live: usize,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next creation-order identifier. Never reused.
    pub fn next_order(&mut self) -> u64 {
        self.next_order += 1;
        self.next_order
    }

    pub fn insert(&mut self, instance: Instance) -> Result<InstanceId, HierarchyError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.instance = Some(instance);
            self.live += 1;
            return Ok(InstanceId {
                index,
                generation: slot.generation,
            });
        }
        let index = slot_index(self.slots.len(), self.live)?;
        self.slots.push(Slot {
            generation: 0,
            instance: Some(instance),
        });
        self.live += 1;
        Ok(InstanceId {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_ref())
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.instance.as_mut())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    /// Free the slot of `id`, returning the instance it held.
    pub fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let instance = slot.instance.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.roots.retain(|r| *r != id);
        self.live -= 1;
        Some(instance)
    }

    pub fn roots(&self) -> &[InstanceId] {
        &self.roots
    }

    pub fn add_root(&mut self, id: InstanceId) {
        self.roots.push(id);
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

/// Index of the slot appended after `len` existing ones.
fn slot_index(len: usize, live: usize) -> Result<u32, HierarchyError> {
    u32::try_from(len).map_err(|_| HierarchyError::ArenaFull { live })
}
