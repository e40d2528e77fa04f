//! Generic fixed-capacity FIFO queue, guarded by a `critical-section` spin
//! lock. Used everywhere a producer running in one context (an ISR, a
//! scheduler-alarm callback, the Zigbee stack thread) needs to hand a
//! message to a consumer that drains it later from ordinary code — the
//! manager/fast queues of the LD2412 component (C4), the Zigbee inbound
//! event channel, and the outgoing command engine's deadline notifications
//! all reuse this one type instead of duplicating a bespoke ring buffer.
//!
//! A lock-free ring buffer in spirit (FIFO, drop-when-full,
//! drain-in-a-loop) but generic over the element type and capacity, since
//! several of this firmware's queues carry more than one byte of payload.

use critical_section::Mutex;
use core::cell::RefCell;
use heapless::Deque;

pub struct StaticQueue<T, const N: usize> {
    inner: Mutex<RefCell<Deque<T, N>>>,
}

impl<T, const N: usize> StaticQueue<T, N> {
    pub const fn new() -> Self {
        Self { inner: Mutex::new(RefCell::new(Deque::new())) }
    }

    /// Push one message. Returns `false` (message dropped) if the queue is
    /// full — producers log-and-drop per spec §7, they never block.
    pub fn push(&self, value: T) -> bool {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().push_back(value).is_ok())
    }

    pub fn pop(&self) -> Option<T> {
        critical_section::with(|cs| self.inner.borrow(cs).borrow_mut().pop_front())
    }

    pub fn drain(&self, mut handler: impl FnMut(T)) {
        while let Some(item) = self.pop() {
            handler(item);
        }
    }

    pub fn is_empty(&self) -> bool {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().is_empty())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow(cs).borrow().len())
    }
}

impl<T, const N: usize> Default for StaticQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_ordering() {
        let q: StaticQueue<u32, 4> = StaticQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn drop_when_full() {
        let q: StaticQueue<u8, 2> = StaticQueue::new();
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(!q.push(3));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn drain_collects_all_in_order() {
        let q: StaticQueue<u8, 8> = StaticQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        let mut out = Vec::new();
        q.drain(|v| out.push(v));
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
        assert!(q.is_empty());
    }
}
