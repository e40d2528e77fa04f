//! UART adapter for the LD2412 radar module.
//!
//! Wraps `esp-idf-hal`'s UART driver on UART2, configured 8-N-1 at the
//! module's fixed baud rate. This is the only file that touches the real
//! UART peripheral; everything above [`crate::zigbee::ports::UartPort`]
//! (the channel, the manager task) is transport-agnostic.

use crate::error::{Error, UartError};
use crate::pins;
use crate::zigbee::ports::UartPort;

#[cfg(target_os = "espidf")]
pub struct RadarUart {
    driver: esp_idf_hal::uart::UartDriver<'static>,
    peeked: Option<u8>,
}

#[cfg(target_os = "espidf")]
impl RadarUart {
    pub fn new(
        uart: impl esp_idf_hal::peripheral::Peripheral<P = impl esp_idf_hal::uart::Uart> + 'static,
        tx: impl esp_idf_hal::peripheral::Peripheral<P = impl esp_idf_hal::gpio::OutputPin> + 'static,
        rx: impl esp_idf_hal::peripheral::Peripheral<P = impl esp_idf_hal::gpio::InputPin> + 'static,
    ) -> Result<Self, Error> {
        let config = esp_idf_hal::uart::config::Config::new()
            .baudrate(esp_idf_hal::units::Hertz(pins::RADAR_UART_BAUD))
            .data_bits(esp_idf_hal::uart::config::DataBits::DataBits8)
            .parity_none()
            .stop_bits(esp_idf_hal::uart::config::StopBits::STOP1);

        let driver = esp_idf_hal::uart::UartDriver::new(
            uart,
            tx,
            rx,
            Option::<esp_idf_hal::gpio::AnyIOPin>::None,
            Option::<esp_idf_hal::gpio::AnyIOPin>::None,
            &config,
        )
        .map_err(|_| Error::Init("radar UART driver init failed"))?;

        Ok(Self { driver, peeked: None })
    }
}

#[cfg(target_os = "espidf")]
impl UartPort for RadarUart {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.driver.write(bytes).map_err(|_| Error::Uart(UartError::DriverFault))?;
        Ok(())
    }

    fn send_with_break(&mut self, bytes: &[u8], break_len_us: u32) -> Result<(), Error> {
        self.send(bytes)?;
        self.driver.wait_tx_done(break_len_us / 1000).map_err(|_| Error::Uart(UartError::DriverFault))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], wait_ms: u32) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        if let Some(b) = self.peeked.take() {
            buf[0] = b;
            written = 1;
        }
        if written < buf.len() {
            let n = self
                .driver
                .read(&mut buf[written..], wait_ms)
                .map_err(|_| Error::Uart(UartError::DriverFault))?;
            written += n;
        }
        Ok(written)
    }

    fn peek_byte(&mut self, wait_ms: u32) -> Result<Option<u8>, Error> {
        if self.peeked.is_none() {
            let mut b = [0u8; 1];
            let n = self.driver.read(&mut b, wait_ms).map_err(|_| Error::Uart(UartError::DriverFault))?;
            if n == 1 {
                self.peeked = Some(b[0]);
            }
        }
        Ok(self.peeked)
    }

    fn flush(&mut self) {
        self.peeked = None;
        let _ = self.driver.clear_rx();
    }

    fn wait_all_sent(&mut self) {
        let _ = self.driver.wait_tx_done(1_000);
    }

    fn ready_to_read_len(&self) -> usize {
        self.driver.remaining_read().unwrap_or(0) + usize::from(self.peeked.is_some())
    }
}

// ---------------------------------------------------------------------------
// Host/test backend — an in-memory byte pipe, no real UART.
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "espidf"))]
pub struct RadarUart {
    inbox: std::collections::VecDeque<u8>,
}

#[cfg(not(target_os = "espidf"))]
impl RadarUart {
    pub fn new() -> Result<Self, Error> {
        log::info!("RadarUart(sim): no backing hardware");
        Ok(Self { inbox: std::collections::VecDeque::new() })
    }
}

#[cfg(not(target_os = "espidf"))]
impl Default for RadarUart {
    fn default() -> Self {
        Self::new().expect("sim backend never fails")
    }
}

#[cfg(not(target_os = "espidf"))]
impl UartPort for RadarUart {
    fn send(&mut self, _bytes: &[u8]) -> Result<(), Error> {
        Ok(())
    }

    fn send_with_break(&mut self, bytes: &[u8], _break_len_us: u32) -> Result<(), Error> {
        self.send(bytes)
    }

    fn read(&mut self, buf: &mut [u8], _wait_ms: u32) -> Result<usize, Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.inbox.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn peek_byte(&mut self, _wait_ms: u32) -> Result<Option<u8>, Error> {
        Ok(self.inbox.front().copied())
    }

    fn flush(&mut self) {
        self.inbox.clear();
    }

    fn wait_all_sent(&mut self) {}

    fn ready_to_read_len(&self) -> usize {
        self.inbox.len()
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn sim_backend_reads_back_nothing_by_default() {
        let mut uart = RadarUart::new().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(uart.read(&mut buf, 10).unwrap(), 0);
    }

    #[test]
    fn sim_backend_send_never_fails() {
        let mut uart = RadarUart::new().unwrap();
        assert!(uart.send(&[0xFD, 0xFC, 0xFB, 0xFA]).is_ok());
    }
}
