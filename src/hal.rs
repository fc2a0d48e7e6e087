//! Collaborator interfaces between the control logic and the hardware
//!
//! Implementations live in the firmware crate. All calls are synchronous and
//! must return promptly; the only blocking allowed is the fixed bus settle
//! delay inside channel switching and reader re-init.

use std::time::Duration;

use crate::error::BusError;
use crate::packet::WallStatusPacket;
use crate::tag::TagSighting;

/// I2C multiplexer in front of the terminal readers
pub trait ChannelSelector {
    /// Check that the mux at `bus_addr` acknowledges
    fn probe(&mut self, bus_addr: u8) -> Result<(), BusError>;

    /// Route the shared bus to `channel`; returns after the settle time
    fn select_channel(&mut self, bus_addr: u8, channel: u8) -> Result<(), BusError>;

    /// Disconnect every downstream channel of the mux
    fn disable_channel(&mut self, bus_addr: u8) -> Result<(), BusError>;

    /// Settle delay applied after every switch; checked against the poll
    /// interval when a wall node is built
    fn settle_time(&self) -> Duration;
}

/// RFID reader on the currently selected mux channel
pub trait TagScanner {
    /// Bring up the reader behind `channel`
    fn init_reader(&mut self, channel: u8) -> Result<(), BusError>;

    /// Look for a tag; on a hit also returns the raw payload read
    fn scan(&mut self, channel: u8) -> Result<Option<TagSighting>, BusError>;
}

/// Outgoing half of the serial link
pub trait PacketSink {
    /// Write one frame; best effort, no acknowledgement
    fn transmit(&mut self, packet: &WallStatusPacket) -> Result<(), BusError>;
}

/// Incoming half of the serial link
pub trait ByteSource {
    /// Copy whatever is currently buffered into `buf` without blocking.
    /// Returns the number of bytes written, 0 when drained.
    fn read_available(&mut self, buf: &mut [u8]) -> usize;
}

/// Wall node status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IndicatorState {
    Off,
    Green,
    Red,
}

/// Red/green indicator on the wall
pub trait IndicatorOutput {
    fn set_indicator(&mut self, state: IndicatorState);
}

/// Audio clip triggered on the toy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Cue {
    /// 6V battery: engine sputters
    Sputter,
    /// 12V battery: engine starts
    EngineStart,
    /// 16V battery: too much, sparks
    Zap,
    /// Wrong connection
    Fail,
}

/// Animation selected on the toy's LED controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Animation {
    Battery6V,
    Battery12V,
    Battery16V,
    Default,
    Wrong,
}

impl Animation {
    /// Command byte understood by the LED controller
    pub fn command_code(&self) -> u8 {
        match self {
            Animation::Battery6V => 0x01,
            Animation::Battery12V => 0x02,
            Animation::Battery16V => 0x03,
            Animation::Default => 0x04,
            Animation::Wrong => 0x05,
        }
    }
}

/// Fire-and-forget audio/visual outputs on the toy
pub trait CueOutput {
    fn play_cue(&mut self, cue: Cue);
    fn set_animation(&mut self, mode: Animation);
}
