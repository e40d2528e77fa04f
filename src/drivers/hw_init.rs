//! One-shot hardware peripheral initialization.
//!
//! Configures the radar/PIR presence GPIOs, the status LED GPIO, and the
//! reset-button GPIO (with its any-edge interrupt) using raw ESP-IDF sys
//! calls. Called once from `main()` before the service loop starts. UART2
//! for the LD2412 radar is configured separately, by
//! `adapters::radar_uart::RadarUart::new` (esp-idf-hal owns that peripheral
//! end to end).

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

use crate::pins;

/// Errors during one-shot peripheral initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    IsrInstallFailed(i32),
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
        }
    }
}

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once from main() before the service loop; single-threaded.
    unsafe {
        init_gpio_inputs()?;
        init_gpio_outputs()?;
    }
    info!("hw_init: all peripherals configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── GPIO Inputs ───────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_inputs() -> Result<(), HwInitError> {
    // Radar and PIR presence outputs: any-edge interrupt, ISR posts the
    // level straight into the presence-signal queue.
    for &pin in &[pins::RADAR_PRESENCE_GPIO, pins::PIR_PRESENCE_GPIO] {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_ANYEDGE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 {
            return Err(HwInitError::GpioConfigFailed(ret));
        }
    }

    // Reset button: active-low, external pull-up, any-edge.
    let btn_cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::RESET_BUTTON_GPIO,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_ANYEDGE,
    };
    let ret = unsafe { gpio_config(&btn_cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }

    info!("hw_init: GPIO inputs configured (radar, pir, reset button)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin; safe to call from main context.
    (unsafe { gpio_get_level(pin) }) != 0
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(_pin: i32) -> bool {
    true
}

// ── GPIO Outputs ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::STATUS_LED_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 {
        return Err(HwInitError::GpioConfigFailed(ret));
    }
    unsafe { gpio_set_level(pins::STATUS_LED_GPIO, 0) };

    info!("hw_init: GPIO outputs configured (status LED)");
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: gpio_set_level writes to an already-configured output pin;
    // pin was validated during init_gpio_outputs(). Main-loop only.
    unsafe {
        gpio_set_level(pin, if high { 1 } else { 0 });
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── GPIO ISR Service ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn radar_presence_gpio_isr(_arg: *mut core::ffi::c_void) {
    // SAFETY: gpio_get_level is a register read; safe in ISR context.
    let level = unsafe { gpio_get_level(pins::RADAR_PRESENCE_GPIO) } != 0;
    crate::events::push_presence_signal(crate::events::PresenceSignal::RadarPresenceIntr(level));
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn pir_presence_gpio_isr(_arg: *mut core::ffi::c_void) {
    let level = unsafe { gpio_get_level(pins::PIR_PRESENCE_GPIO) } != 0;
    crate::events::push_presence_signal(crate::events::PresenceSignal::PirPresenceIntr(level));
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn reset_button_gpio_isr(_arg: *mut core::ffi::c_void) {
    // SAFETY: esp_timer_get_time is a RTC counter read; safe in ISR context.
    let now_ms = (unsafe { esp_idf_svc::sys::esp_timer_get_time() } / 1_000) as u32;
    let released = unsafe { gpio_get_level(pins::RESET_BUTTON_GPIO) } != 0;
    crate::drivers::reset_button::reset_button_isr_handler(now_ms, released);
}

/// Install per-pin GPIO ISR service and register interrupt handlers.
/// Call after `init_peripherals()` and before the service loop.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), HwInitError> {
    // SAFETY: gpio_install_isr_service is idempotent; ESP_ERR_INVALID_STATE
    // means it was already installed (acceptable). ISR handlers registered
    // below only touch an atomic or push to a lock-free queue.
    unsafe {
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
            return Err(HwInitError::IsrInstallFailed(ret));
        }

        gpio_isr_handler_add(pins::RADAR_PRESENCE_GPIO, Some(radar_presence_gpio_isr), core::ptr::null_mut());
        gpio_intr_enable(pins::RADAR_PRESENCE_GPIO);

        gpio_isr_handler_add(pins::PIR_PRESENCE_GPIO, Some(pir_presence_gpio_isr), core::ptr::null_mut());
        gpio_intr_enable(pins::PIR_PRESENCE_GPIO);

        gpio_isr_handler_add(pins::RESET_BUTTON_GPIO, Some(reset_button_gpio_isr), core::ptr::null_mut());
        gpio_intr_enable(pins::RESET_BUTTON_GPIO);

        info!("hw_init: ISR service installed (radar, pir, reset button)");
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}
