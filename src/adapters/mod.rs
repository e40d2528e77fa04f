//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements                       | Connects to            |
//! |-------------|-----------------------------------|-------------------------|
//! | `hardware`  | GpioPort, LedIndicatorPort        | radar/PIR GPIO, status LED |
//! | `log_sink`  | EventSink                         | serial log output        |
//! | `nvs`       | ConfigPort, StoragePort           | NVS / in-memory store    |
//! | `radar_uart`| UartPort                          | UART2 / LD2412 module    |
//! | `time`      | (no port trait; plain time helper)| ESP32 system timer       |
//! | `zigbee_stack` | ZigbeeCommandPort, ZigbeeAttributePort, SchedulerPort | esp-zigbee-sdk |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod radar_uart;
pub mod time;
pub mod zigbee_stack;
