//! Wall node I2C bus: one reader address shared behind per-battery muxes

use embedded_hal::i2c::I2c;
use jumpstart_link::hal::{ChannelSelector, TagScanner};
use jumpstart_link::tag::TagSighting;
use jumpstart_link::BusError;
use log::trace;
use std::thread;
use std::time::Duration;

use crate::tca9548a;
use crate::ws1850s::Ws1850s;

pub struct WallBus<I> {
    i2c: I,
    reader: Ws1850s,
    channel_settle: Duration,
    reader_settle: Duration,
}

impl<I: I2c> WallBus<I> {
    pub fn new(i2c: I, reader_addr: u8, channel_settle: Duration, reader_settle: Duration) -> Self {
        Self {
            i2c,
            reader: Ws1850s::new(reader_addr),
            channel_settle,
            reader_settle,
        }
    }
}

impl<I: I2c> ChannelSelector for WallBus<I> {
    fn probe(&mut self, bus_addr: u8) -> Result<(), BusError> {
        let ctrl = tca9548a::probe(&mut self.i2c, bus_addr)?;
        trace!("Mux 0x{:02X} control 0x{:02X}", bus_addr, ctrl);
        Ok(())
    }

    fn select_channel(&mut self, bus_addr: u8, channel: u8) -> Result<(), BusError> {
        // Break before make: all three muxes share the reader address
        tca9548a::disable(&mut self.i2c, bus_addr)?;
        thread::sleep(self.channel_settle);
        tca9548a::select(&mut self.i2c, bus_addr, channel)?;
        thread::sleep(self.channel_settle);
        Ok(())
    }

    fn disable_channel(&mut self, bus_addr: u8) -> Result<(), BusError> {
        tca9548a::disable(&mut self.i2c, bus_addr)?;
        thread::sleep(self.channel_settle);
        Ok(())
    }

    fn settle_time(&self) -> Duration {
        self.channel_settle
    }
}

impl<I: I2c> TagScanner for WallBus<I> {
    fn init_reader(&mut self, _channel: u8) -> Result<(), BusError> {
        self.reader.init(&mut self.i2c)?;
        thread::sleep(self.reader_settle);
        Ok(())
    }

    fn scan(&mut self, channel: u8) -> Result<Option<TagSighting>, BusError> {
        Ok(self.reader.scan(&mut self.i2c)?.map(|(uid, payload)| {
            let sighting = TagSighting::new(&uid, &payload);
            trace!("Channel {}: tag {}", channel, sighting.uid_hex());
            sighting
        }))
    }
}
