//! RS-485 half-duplex port
//!
//! UART plus a driver-enable pin on a MAX485-style transceiver. The pin is
//! held low (receive) except while a frame is on the wire.

use esp_idf_svc::hal::delay::BLOCK;
use esp_idf_svc::hal::gpio::{AnyOutputPin, Output, PinDriver};
use esp_idf_svc::hal::uart::UartDriver;
use jumpstart_link::hal::{ByteSource, PacketSink};
use jumpstart_link::{BusError, WallStatusPacket};
use log::{trace, warn};
use std::thread;
use std::time::Duration;

pub struct Rs485Port<'d> {
    uart: UartDriver<'d>,
    de: PinDriver<'d, AnyOutputPin, Output>,
    line_settle: Duration,
}

impl<'d> Rs485Port<'d> {
    pub fn new(
        uart: UartDriver<'d>,
        mut de: PinDriver<'d, AnyOutputPin, Output>,
        line_settle: Duration,
    ) -> anyhow::Result<Self> {
        de.set_low()?;
        Ok(Self {
            uart,
            de,
            line_settle,
        })
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), BusError> {
        self.de.set_high().map_err(esp_err)?;
        thread::sleep(self.line_settle);

        let result = self
            .uart
            .write(frame)
            .and_then(|_| self.uart.wait_tx_done(BLOCK))
            .map_err(esp_err);

        thread::sleep(self.line_settle);
        // Always hand the line back, even after a failed write
        if let Err(e) = self.de.set_low() {
            warn!("RS-485: failed to release driver enable: {}", e);
        }
        result
    }
}

impl PacketSink for Rs485Port<'_> {
    fn transmit(&mut self, packet: &WallStatusPacket) -> Result<(), BusError> {
        let frame = packet.encode();
        trace!("RS-485 TX {:02X?}", frame);
        self.write_frame(&frame)
    }
}

impl ByteSource for Rs485Port<'_> {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        // Non-blocking read (timeout 0)
        match self.uart.read(buf, 0) {
            Ok(n) => {
                if n > 0 {
                    trace!("RS-485 RX {} bytes: {:02X?}", n, &buf[..n.min(32)]);
                }
                n
            }
            Err(e) => {
                warn!("RS-485 read error: {}", e);
                0
            }
        }
    }
}

fn esp_err(e: esp_idf_svc::sys::EspError) -> BusError {
    BusError::Device(e.to_string())
}
