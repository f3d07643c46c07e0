//! Decoded instruction records, one per fetched address.

use crate::instruction::{DecodeError, Instruction};
use generational_arena::{Arena, Index};
use log::debug;
use std::collections::HashMap;

/// Stable reference to an [`InstructionHandle`] inside a [`HandleCache`].
///
/// Ids outlive the handle they point to: after a [`HandleCache::flush`] every old id is stale and
/// lookups with it return `None`, even if the arena slot has been reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct HandleId(Index);

/// Per-address state that an instruction handler derives on one execution and needs again on a
/// later one.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Scratch {
    #[default]
    Empty,
    /// State of an event load. `interrupted` is set when its wait was cancelled by an interrupt,
    /// in which case `next_pc` is the successor that was chosen before the wait began.
    EventLoad { interrupted: bool, next_pc: u32 },
}

/// A fetched and decoded instruction.
#[derive(Debug, Clone)]
pub struct InstructionHandle {
    address: u32,
    raw: u32,
    decoded: Result<Instruction, DecodeError>,
    pub scratch: Scratch,
    stalled: bool,
    executions: u64,
}

impl InstructionHandle {
    fn new(address: u32, raw: u32) -> Self {
        Self {
            address,
            raw,
            decoded: Instruction::decode(raw),
            scratch: Scratch::Empty,
            stalled: false,
            executions: 0,
        }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }

    pub fn decoded(&self) -> &Result<Instruction, DecodeError> {
        &self.decoded
    }

    /// Returns `true` if an execution of this instruction has ever been suspended.
    pub fn has_stalled(&self) -> bool {
        self.stalled
    }

    pub(super) fn mark_stalled(&mut self) {
        self.stalled = true;
    }

    /// Number of times a handler has been invoked for this instruction, replays included.
    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub(super) fn count_execution(&mut self) {
        self.executions += 1;
    }
}

/// Arena of instruction handles with an address index.
///
/// Instruction memory is only fetched the first time an address is dispatched. Modifications of
/// instruction memory become visible after [`flush`](Self::flush), which the hart issues on
/// `fence.i`.
#[derive(Debug, Default)]
pub struct HandleCache {
    arena: Arena<InstructionHandle>,
    by_address: HashMap<u32, Index>,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `address`, fetching and decoding the raw instruction with `fetch` if
    /// it isn't cached yet. Returns `None` if `fetch` fails; failed fetches are not cached.
    pub fn lookup<F>(&mut self, address: u32, fetch: F) -> Option<HandleId>
    where
        F: FnOnce(u32) -> Option<u32>,
    {
        self.get_or_fetch(address, fetch).map(|(id, _)| id)
    }

    /// Like [`lookup`](Self::lookup), but also returns the handle itself.
    pub fn get_or_fetch<F>(
        &mut self,
        address: u32,
        fetch: F,
    ) -> Option<(HandleId, &mut InstructionHandle)>
    where
        F: FnOnce(u32) -> Option<u32>,
    {
        let index = match self.by_address.get(&address) {
            Some(&index) => index,
            None => {
                let raw = fetch(address)?;
                let index = self.arena.insert(InstructionHandle::new(address, raw));
                self.by_address.insert(address, index);
                index
            }
        };
        self.arena
            .get_mut(index)
            .map(|handle| (HandleId(index), handle))
    }

    pub fn get(&self, id: HandleId) -> Option<&InstructionHandle> {
        self.arena.get(id.0)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut InstructionHandle> {
        self.arena.get_mut(id.0)
    }

    /// Returns the id of the cached handle for `address`, without fetching.
    pub fn id_of(&self, address: u32) -> Option<HandleId> {
        self.by_address.get(&address).copied().map(HandleId)
    }

    /// Drop every handle, together with its scratch state.
    pub fn flush(&mut self) {
        debug!("Flushing {} instruction handles", self.arena.len());
        // Removal bumps the arena generation, so slots reused later never revive an old id.
        for (_, index) in self.by_address.drain() {
            self.arena.remove(index);
        }
    }

    /// Iterate over the cached handles, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &InstructionHandle> {
        self.arena.iter().map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm;

    #[test]
    fn lookup_caches_decoded_instruction() {
        let mut cache = HandleCache::new();
        let mut fetches = 0;
        let mut fetch = |_: u32| {
            fetches += 1;
            Some(asm::NOP)
        };
        let id = cache.lookup(0x100, &mut fetch).unwrap();
        assert_eq!(Some(id), cache.lookup(0x100, &mut fetch));
        assert_eq!(1, fetches);
        let handle = cache.get(id).unwrap();
        assert_eq!(0x100, handle.address());
        assert_eq!(asm::NOP, handle.raw());
        assert!(handle.decoded().is_ok());
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let mut cache = HandleCache::new();
        assert_eq!(None, cache.lookup(0x100, |_| None));
        assert!(cache.is_empty());
        assert!(cache.lookup(0x100, |_| Some(0xFFFF_FFFF)).is_some());
        let id = cache.id_of(0x100).unwrap();
        assert!(cache.get(id).unwrap().decoded().is_err());
    }

    #[test]
    fn flush_invalidates_ids_and_scratch() {
        let mut cache = HandleCache::new();
        let old = cache.lookup(0x100, |_| Some(asm::NOP)).unwrap();
        cache.get_mut(old).unwrap().scratch = Scratch::EventLoad {
            interrupted: true,
            next_pc: 0x200,
        };
        cache.flush();
        assert!(cache.get(old).is_none());
        let new = cache.lookup(0x100, |_| Some(asm::WFI)).unwrap();
        assert_ne!(old, new);
        assert!(cache.get(old).is_none());
        let handle = cache.get(new).unwrap();
        assert_eq!(Scratch::Empty, handle.scratch);
        assert_eq!(asm::WFI, handle.raw());
    }
}
