//! ISR-debounced reset-button driver.
//!
//! ## Hardware
//!
//! Active-low momentary switch with external pull-up, any-edge interrupt.
//! The ISR records the raw timestamp into an atomic; `tick()` (called from
//! the main loop at service-tick rate) runs the debounce + hold-length
//! state machine.
//!
//! ## Outcomes (spec §6)
//!
//! | Condition                          | Outcome        |
//! |-------------------------------------|----------------|
//! | Held < 100 ms                       | filtered as noise |
//! | Released before ~4 s                | soft restart   |
//! | Held >= 4 s                         | factory reset (erase config, reset radar to defaults, restart Zigbee) |

use core::sync::atomic::{AtomicU32, Ordering};

const DEBOUNCE_MS: u32 = 100;
const FACTORY_RESET_HOLD_MS: u32 = 4000;

/// Raw ISR timestamp (milliseconds since boot, truncated to u32) of the
/// last edge. Written by the ISR, read by the main loop.
static BUTTON_ISR_TIMESTAMP: AtomicU32 = AtomicU32::new(0);
/// Level read by the ISR at the time of the edge: `true` = high (released).
static BUTTON_ISR_RELEASED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(true);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetButtonEvent {
    SoftRestart,
    FactoryReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Pressed { since_ms: u32 },
}

pub struct ResetButtonDriver {
    state: State,
    last_isr_ms: u32,
}

impl Default for ResetButtonDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResetButtonDriver {
    pub fn new() -> Self {
        Self { state: State::Idle, last_isr_ms: 0 }
    }

    /// Call from the main loop at each service tick. `now_ms` is the
    /// current monotonic time in milliseconds.
    pub fn tick(&mut self, now_ms: u32) -> Option<ResetButtonEvent> {
        let isr_ms = BUTTON_ISR_TIMESTAMP.load(Ordering::Acquire);
        let edge_seen = isr_ms != self.last_isr_ms && isr_ms != 0;
        let released = BUTTON_ISR_RELEASED.load(Ordering::Acquire);

        match self.state {
            State::Idle => {
                if edge_seen && !released {
                    self.last_isr_ms = isr_ms;
                    self.state = State::Pressed { since_ms: now_ms };
                }
                None
            }
            State::Pressed { since_ms } => {
                let held_ms = now_ms.wrapping_sub(since_ms);

                if edge_seen && released {
                    self.last_isr_ms = isr_ms;
                    self.state = State::Idle;
                    if held_ms < DEBOUNCE_MS {
                        return None;
                    }
                    return Some(ResetButtonEvent::SoftRestart);
                }

                if held_ms >= FACTORY_RESET_HOLD_MS {
                    self.state = State::Idle;
                    return Some(ResetButtonEvent::FactoryReset);
                }

                None
            }
        }
    }
}

/// ISR handler — register this on the reset-button GPIO any-edge
/// interrupt. Safe to call from interrupt context (lock-free atomic store).
#[allow(unused)]
pub fn reset_button_isr_handler(now_ms: u32, released: bool) {
    BUTTON_ISR_RELEASED.store(released, Ordering::Release);
    BUTTON_ISR_TIMESTAMP.store(now_ms, Ordering::Release);
}
