//! Status LED driver.
//!
//! Single GPIO, binary on/off — the indicator itself is an out-of-scope
//! external collaborator (spec §1); this driver only needs to turn it on,
//! off, or blink it at a pattern-specific rate so [`LedIndicatorPort`] has
//! somewhere to land. `tick()` toggles the GPIO when a blinking pattern's
//! half-period has elapsed; call it once per service tick.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives the GPIO via `hw_init::gpio_write`.
//! On host/test: tracks state in-memory only.

use crate::drivers::hw_init;
use crate::pins;
use crate::zigbee::ports::LedPattern;

/// Half-period, in service ticks (1 Hz), for each blinking pattern. `None`
/// means solid (on) or solid-off, never toggled by `tick()`.
fn half_period_ticks(pattern: LedPattern) -> Option<u32> {
    match pattern {
        LedPattern::Idle => None,
        LedPattern::Off => None,
        LedPattern::StackStartupFailure => Some(1),
        LedPattern::NetworkSteeringFailure => Some(2),
        LedPattern::CommandFailure => Some(3),
    }
}

pub struct StatusLed {
    pattern: LedPattern,
    on: bool,
    ticks_since_toggle: u32,
}

impl Default for StatusLed {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusLed {
    pub fn new() -> Self {
        Self { pattern: LedPattern::Off, on: false, ticks_since_toggle: 0 }
    }

    pub fn set_pattern(&mut self, pattern: LedPattern) {
        self.pattern = pattern;
        self.ticks_since_toggle = 0;
        self.on = matches!(pattern, LedPattern::Idle);
        hw_init::gpio_write(pins::STATUS_LED_GPIO, self.on);
    }

    /// Advance the blink state machine by one service tick (1 Hz).
    pub fn tick(&mut self) {
        let Some(half_period) = half_period_ticks(self.pattern) else { return };
        self.ticks_since_toggle += 1;
        if self.ticks_since_toggle >= half_period {
            self.ticks_since_toggle = 0;
            self.on = !self.on;
            hw_init::gpio_write(pins::STATUS_LED_GPIO, self.on);
        }
    }

    pub fn current_pattern(&self) -> LedPattern {
        self.pattern
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_pattern_is_solid_on() {
        let mut led = StatusLed::new();
        led.set_pattern(LedPattern::Idle);
        assert!(led.is_on());
        led.tick();
        led.tick();
        assert!(led.is_on());
    }

    #[test]
    fn off_pattern_is_solid_off() {
        let mut led = StatusLed::new();
        led.set_pattern(LedPattern::Off);
        assert!(!led.is_on());
        led.tick();
        assert!(!led.is_on());
    }

    #[test]
    fn command_failure_blinks_every_third_tick() {
        let mut led = StatusLed::new();
        led.set_pattern(LedPattern::CommandFailure);
        assert!(!led.is_on());
        led.tick();
        led.tick();
        assert!(!led.is_on());
        led.tick();
        assert!(led.is_on());
    }
}
