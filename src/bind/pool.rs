//! Bind-record arena (C7).
//!
//! Grounded on `original_source/main/zb_binds.hpp`'s
//! `ObjectPool<BindInfo, kMaxBinds * 2>`: up to 6 active binds plus 6 more
//! slots held open for records that have moved to `NonFunctional` and are
//! waiting for the next cleanup pass (§4.8 step a). Callers address records
//! by opaque index — a `BindHandle` — so a record that is freed and reused
//! cannot be silently mistaken for the one a stale caller still references.

use super::context::BindRecord;
use super::states::BindStateId;
use crate::error::{BindError, Error};

pub const MAX_ACTIVE_BINDS: usize = 6;
pub const POOL_SIZE: usize = MAX_ACTIVE_BINDS * 2;

/// Opaque handle into the arena. `generation` guards against use-after-free:
/// a handle minted before a slot was recycled compares unequal to the
/// handle minted after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindHandle {
    index: u8,
    generation: u16,
}

impl BindHandle {
    /// The arena slot this handle addresses — also the
    /// [`crate::command_engine::CommandEngine`] slot used for commands sent
    /// to this bind, since only one outgoing command per bind may be in
    /// flight at a time regardless of whether C5 or C7 issued it.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

struct Slot {
    record: BindRecord,
    state: BindStateId,
    generation: u16,
    /// Set once the record has reached `NonFunctional` and is waiting for
    /// the next service-loop cleanup pass to reap it.
    cleanup_pending: bool,
}

pub struct BindPool {
    slots: [Option<Slot>; POOL_SIZE],
    generation_counter: u16,
}

impl BindPool {
    pub fn new() -> Self {
        Self { slots: [const { None }; POOL_SIZE], generation_counter: 0 }
    }

    /// Allocates a new record for `ieee_addr`/`short_addr`, starting in
    /// `BindStateId::New`. Fails with `PoolExhausted` once all 12 slots are
    /// occupied — a 7th simultaneous bind plus six pending cleanups.
    pub fn insert(&mut self, ieee_addr: u64, short_addr: u16, endpoint: u8) -> Result<BindHandle, Error> {
        let index = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::Bind(BindError::PoolExhausted))?;
        self.generation_counter = self.generation_counter.wrapping_add(1);
        let generation = self.generation_counter;
        self.slots[index] = Some(Slot {
            record: BindRecord::new(ieee_addr, short_addr, endpoint),
            state: BindStateId::New,
            generation,
            cleanup_pending: false,
        });
        Ok(BindHandle { index: index as u8, generation })
    }

    pub fn get(&self, handle: BindHandle) -> Option<(&BindRecord, BindStateId)> {
        self.slot(handle).map(|s| (&s.record, s.state))
    }

    pub fn get_mut(&mut self, handle: BindHandle) -> Option<(&mut BindRecord, &mut BindStateId)> {
        self.slot_mut(handle).map(|s| (&mut s.record, &mut s.state))
    }

    pub fn mark_cleanup_pending(&mut self, handle: BindHandle) {
        if let Some(s) = self.slot_mut(handle) {
            s.cleanup_pending = true;
        }
    }

    /// Frees every slot flagged `cleanup_pending` whose state is
    /// `NonFunctional`. Returns how many were reaped — spec §4.8 step (a).
    pub fn reap_cleanup_pending(&mut self) -> usize {
        let mut reaped = 0;
        for slot in self.slots.iter_mut() {
            let should_free = slot
                .as_ref()
                .is_some_and(|s| s.cleanup_pending && s.state == BindStateId::NonFunctional);
            if should_free {
                *slot = None;
                reaped += 1;
            }
        }
        reaped
    }

    /// Iterates every live (handle, record, state) triple, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (BindHandle, &BindRecord, BindStateId)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.as_ref().map(|s| (BindHandle { index: i as u8, generation: s.generation }, &s.record, s.state))
        })
    }

    pub fn find_by_ieee(&self, ieee_addr: u64) -> Option<BindHandle> {
        self.iter().find(|(_, r, _)| r.ieee_addr == ieee_addr).map(|(h, _, _)| h)
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|s| s.as_ref().is_some_and(|s| !s.cleanup_pending)).count()
    }

    fn slot(&self, handle: BindHandle) -> Option<&Slot> {
        self.slots[handle.index as usize]
            .as_ref()
            .filter(|s| s.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: BindHandle) -> Option<&mut Slot> {
        self.slots[handle.index as usize]
            .as_mut()
            .filter(|s| s.generation == handle.generation)
    }
}

impl Default for BindPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_roundtrip() {
        let mut pool = BindPool::new();
        let h = pool.insert(0x1122, 0xBEEF, 1).unwrap();
        let (record, state) = pool.get(h).unwrap();
        assert_eq!(record.ieee_addr, 0x1122);
        assert_eq!(state, BindStateId::New);
    }

    #[test]
    fn pool_exhaustion() {
        let mut pool = BindPool::new();
        for i in 0..POOL_SIZE as u64 {
            pool.insert(i, i as u16, 1).unwrap();
        }
        assert_eq!(pool.insert(999, 1, 1).unwrap_err(), Error::Bind(BindError::PoolExhausted));
    }

    #[test]
    fn stale_handle_after_reap_is_rejected() {
        let mut pool = BindPool::new();
        let h = pool.insert(1, 1, 1).unwrap();
        let (_, state) = pool.get_mut(h).unwrap();
        *state = BindStateId::NonFunctional;
        pool.mark_cleanup_pending(h);
        assert_eq!(pool.reap_cleanup_pending(), 1);
        assert!(pool.get(h).is_none());

        let h2 = pool.insert(2, 2, 1).unwrap();
        assert_eq!(h2.index, h.index, "freed slot is reused");
        assert_ne!(h2.generation, h.generation, "stale handle must not alias the new record");
    }

    #[test]
    fn find_by_ieee() {
        let mut pool = BindPool::new();
        pool.insert(10, 1, 1).unwrap();
        let h = pool.insert(20, 2, 1).unwrap();
        assert_eq!(pool.find_by_ieee(20), Some(h));
        assert_eq!(pool.find_by_ieee(30), None);
    }
}
