//! TCA9548A 8-channel I2C switch
//!
//! The control register is a single byte, one bit per downstream channel.

use embedded_hal::i2c::I2c;
use jumpstart_link::BusError;

use crate::ws1850s::bus_err;

pub const CHANNEL_COUNT: u8 = 8;

/// Read back the control register; any ACK means the switch is there
pub fn probe<I: I2c>(i2c: &mut I, addr: u8) -> Result<u8, BusError> {
    let mut ctrl = [0u8];
    i2c.read(addr, &mut ctrl).map_err(|e| bus_err(addr, e))?;
    Ok(ctrl[0])
}

/// Connect exactly one downstream channel
pub fn select<I: I2c>(i2c: &mut I, addr: u8, channel: u8) -> Result<(), BusError> {
    if channel >= CHANNEL_COUNT {
        return Err(BusError::Device(format!("mux channel {} out of range", channel)));
    }
    i2c.write(addr, &[1 << channel]).map_err(|e| bus_err(addr, e))
}

/// Disconnect every downstream channel
pub fn disable<I: I2c>(i2c: &mut I, addr: u8) -> Result<(), BusError> {
    i2c.write(addr, &[0x00]).map_err(|e| bus_err(addr, e))
}
