//! GPIO / peripheral pin assignments for the presence-sensor node.
//!
//! Single source of truth — every driver references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// LD2412 radar — UART2
// ---------------------------------------------------------------------------

/// UART2 TX (ESP32 → LD2412 RX).
pub const RADAR_UART_TX_GPIO: i32 = 17;
/// UART2 RX (LD2412 TX → ESP32).
pub const RADAR_UART_RX_GPIO: i32 = 18;
/// Radar wire baud rate — fixed by the module, 8-N-1, no flow control.
pub const RADAR_UART_BAUD: u32 = 115_200;

/// Radar presence digital output (active high).
pub const RADAR_PRESENCE_GPIO: i32 = 4;

// ---------------------------------------------------------------------------
// PIR sensor
// ---------------------------------------------------------------------------

/// PIR digital output (active high).
pub const PIR_PRESENCE_GPIO: i32 = 5;

// ---------------------------------------------------------------------------
// Reset button (active low, external pull-up, any-edge interrupt)
// ---------------------------------------------------------------------------

pub const RESET_BUTTON_GPIO: i32 = 9;

// ---------------------------------------------------------------------------
// Status LED indicator (external collaborator — driven through LedIndicatorPort)
// ---------------------------------------------------------------------------

pub const STATUS_LED_GPIO: i32 = 8;
