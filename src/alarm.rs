//! Fixed-capacity alarm-handle pool (C1).
//!
//! A free-list over 32 slots, layered on top of whatever scheduler the
//! Zigbee stack provides (abstracted behind [`crate::zigbee::ports::SchedulerPort`]
//! so this module stays host-testable). Grounded on
//! `original_source/main/zb_alarm.hpp`'s `TimerList`: same slot count, same
//! `kLowOnHandlesThreshold`/`kCounterOfDeathValue` constants, same
//! quiet-tick restart guard.
//!
//! The restart guard exists because some Zigbee SDK versions leak a
//! scheduler handle on cancel; rather than let the pool run dry and panic,
//! once the allocator is running low the pool starts a countdown that
//! forces a clean restart the next time the node has been quiet (no
//! presence, no running local timer) for long enough.

use crate::error::{CommandError, Error};
use crate::zigbee::ports::SchedulerPort;
use critical_section::Mutex;
use core::cell::RefCell;

/// Total number of alarm slots.
pub const POOL_SIZE: usize = 32;
/// Once the allocated index reaches this, `running_out_of_handles` latches.
pub const LOW_ON_HANDLES_THRESHOLD: u8 = 28;
/// Quiet-tick countdown length once the restart guard is armed.
pub const COUNTER_OF_DEATH_VALUE: u8 = 6;
/// Sentinel meaning "counter not armed".
pub const COUNTER_OF_DEATH_INACTIVE: u8 = 0xff;

/// Callback invoked when an alarm fires. The single byte argument mirrors
/// the Zigbee scheduler's own `fn(uint8_t)` alarm signature.
pub type AlarmCallback = fn(u8);

#[derive(Clone, Copy)]
struct AlarmSlot {
    callback: AlarmCallback,
    arg: u8,
}

struct FreeList {
    /// `next[i]` is the next free slot after `i`, or `POOL_SIZE` for "none".
    next: [u8; POOL_SIZE],
    head: u8,
}

impl FreeList {
    fn new() -> Self {
        let mut next = [0u8; POOL_SIZE];
        for (i, slot) in next.iter_mut().enumerate() {
            *slot = if i + 1 < POOL_SIZE { (i + 1) as u8 } else { POOL_SIZE as u8 };
        }
        Self { next, head: 0 }
    }

    fn acquire(&mut self) -> Option<u8> {
        if self.head as usize == POOL_SIZE {
            return None;
        }
        let idx = self.head;
        self.head = self.next[idx as usize];
        Some(idx)
    }

    fn free(&mut self, idx: u8) {
        self.next[idx as usize] = self.head;
        self.head = idx;
    }
}

/// The alarm-handle pool, one per node.
pub struct AlarmPool {
    slots: [Option<AlarmSlot>; POOL_SIZE],
    free: Mutex<RefCell<FreeList>>,
    running_out_of_handles: bool,
    counter_of_death: u8,
}

impl AlarmPool {
    pub fn new() -> Self {
        Self {
            slots: [None; POOL_SIZE],
            free: Mutex::new(RefCell::new(FreeList::new())),
            running_out_of_handles: false,
            counter_of_death: COUNTER_OF_DEATH_INACTIVE,
        }
    }

    /// Cancel any previous registration on `handle`, then allocate a fresh
    /// slot, register it with the scheduler, and return the new handle
    /// (the slot index). Sets `running_out_of_handles` once the pool has
    /// dipped into its last few slots.
    pub fn setup(
        &mut self,
        scheduler: &mut impl SchedulerPort,
        handle: Option<u8>,
        callback: AlarmCallback,
        arg: u8,
        delay_ms: u32,
    ) -> Result<u8, Error> {
        if let Some(h) = handle {
            self.cancel(scheduler, h);
        }

        let idx = critical_section::with(|cs| self.free.borrow(cs).borrow_mut().acquire())
            .ok_or(Error::Command(CommandError::NoAlarmSlot))?;

        self.slots[idx as usize] = Some(AlarmSlot { callback, arg });
        scheduler.register_alarm(idx, delay_ms);

        if idx >= LOW_ON_HANDLES_THRESHOLD {
            self.running_out_of_handles = true;
        }
        Ok(idx)
    }

    /// Idempotent cancel: racing against an already-fired callback is safe
    /// because `fire()` clears the slot before invoking the callback.
    pub fn cancel(&mut self, scheduler: &mut impl SchedulerPort, handle: u8) {
        if self.slots[handle as usize].take().is_some() {
            scheduler.cancel_alarm(handle);
            critical_section::with(|cs| self.free.borrow(cs).borrow_mut().free(handle));
        }
    }

    /// Invoked by the scheduler adapter when slot `handle`'s alarm fires.
    /// Frees the slot first, then runs the user callback — matching the
    /// "free before invoke" ordering in `zb_alarm.hpp` so a callback that
    /// re-arms the same logical timer can acquire a fresh slot.
    pub fn fire(&mut self, handle: u8) {
        if let Some(slot) = self.slots[handle as usize].take() {
            critical_section::with(|cs| self.free.borrow(cs).borrow_mut().free(handle));
            (slot.callback)(slot.arg);
        }
    }

    pub fn is_running_out_of_handles(&self) -> bool {
        self.running_out_of_handles
    }

    /// Arm (or keep armed) the quiet-tick countdown. Call on every service
    /// tick where the node is quiet (no presence, no running local timer)
    /// while `running_out_of_handles` is set.
    ///
    /// Returns `true` once the countdown has reached zero — the caller
    /// must restart the device.
    pub fn check_counter_of_death(&mut self) -> bool {
        if !self.running_out_of_handles {
            return false;
        }
        if self.counter_of_death == COUNTER_OF_DEATH_INACTIVE {
            self.counter_of_death = COUNTER_OF_DEATH_VALUE;
            return false;
        }
        if self.counter_of_death == 0 {
            return true;
        }
        self.counter_of_death -= 1;
        self.counter_of_death == 0
    }

    /// Pause the countdown — called whenever presence is active or a local
    /// timer is running, since a restart would be disruptive mid-session.
    pub fn deactivate_counter_of_death(&mut self) {
        self.counter_of_death = COUNTER_OF_DEATH_INACTIVE;
    }
}

impl Default for AlarmPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FakeScheduler {
        registered: Vec<(u8, u32)>,
        cancelled: Vec<u8>,
    }
    impl FakeScheduler {
        fn new() -> Self {
            Self { registered: Vec::new(), cancelled: Vec::new() }
        }
    }
    impl SchedulerPort for FakeScheduler {
        fn register_alarm(&mut self, handle: u8, delay_ms: u32) {
            self.registered.push((handle, delay_ms));
        }
        fn cancel_alarm(&mut self, handle: u8) {
            self.cancelled.push(handle);
        }
        fn restart_device(&mut self) -> ! {
            panic!("restart_device called in test");
        }
    }

    thread_local! {
        static LAST_ARG: Cell<u8> = Cell::new(0);
    }
    fn record_arg(arg: u8) {
        LAST_ARG.with(|c| c.set(arg));
    }

    #[test]
    fn acquire_and_fire_roundtrip() {
        let mut pool = AlarmPool::new();
        let mut sched = FakeScheduler::new();
        let handle = pool.setup(&mut sched, None, record_arg, 42, 100).unwrap();
        assert_eq!(sched.registered, vec![(handle, 100)]);
        pool.fire(handle);
        LAST_ARG.with(|c| assert_eq!(c.get(), 42));
    }

    #[test]
    fn setup_cancels_previous_handle() {
        let mut pool = AlarmPool::new();
        let mut sched = FakeScheduler::new();
        let first = pool.setup(&mut sched, None, record_arg, 1, 100).unwrap();
        let second = pool.setup(&mut sched, Some(first), record_arg, 2, 200).unwrap();
        assert_eq!(sched.cancelled, vec![first]);
        assert_eq!(second, first, "freed slot is reused immediately");
    }

    #[test]
    fn running_out_of_handles_latches_past_threshold() {
        let mut pool = AlarmPool::new();
        let mut sched = FakeScheduler::new();
        let mut handles = Vec::new();
        for i in 0..(LOW_ON_HANDLES_THRESHOLD as usize + 1) {
            handles.push(pool.setup(&mut sched, None, record_arg, i as u8, 0).unwrap());
        }
        assert!(pool.is_running_out_of_handles());
    }

    #[test]
    fn pool_exhaustion_returns_no_alarm_slot() {
        let mut pool = AlarmPool::new();
        let mut sched = FakeScheduler::new();
        for i in 0..POOL_SIZE {
            pool.setup(&mut sched, None, record_arg, i as u8, 0).unwrap();
        }
        assert_eq!(
            pool.setup(&mut sched, None, record_arg, 0, 0),
            Err(Error::Command(CommandError::NoAlarmSlot))
        );
    }

    #[test]
    fn counter_of_death_fires_after_six_quiet_ticks() {
        let mut pool = AlarmPool::new();
        pool.running_out_of_handles = true;
        for _ in 0..COUNTER_OF_DEATH_VALUE {
            assert!(!pool.check_counter_of_death());
        }
        assert!(pool.check_counter_of_death());
    }

    #[test]
    fn deactivate_resets_countdown() {
        let mut pool = AlarmPool::new();
        pool.running_out_of_handles = true;
        pool.check_counter_of_death();
        pool.deactivate_counter_of_death();
        for _ in 0..COUNTER_OF_DEATH_VALUE {
            assert!(!pool.check_counter_of_death());
        }
    }
}
