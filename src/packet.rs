//! Wall status frame codec
//!
//! Every frame on the RS-485 link is exactly eight bytes:
//!
//! ```text
//! +------+------+--------+-------+-------+-------+-------+-----+
//! | 0xAA | 0x55 | bat_id | neg_p | neg_ok| pos_p | pos_ok| chk |
//! +------+------+--------+-------+-------+-------+-------+-----+
//! ```
//!
//! `chk` is the XOR of the identifier byte and the four flag bytes; the sync
//! bytes are not covered. Flags are strictly 0 or 1 so a decoded frame always
//! re-encodes to the same bytes.

use crate::error::PacketError;

/// First sync byte
pub const SYNC1: u8 = 0xAA;
/// Second sync byte
pub const SYNC2: u8 = 0x55;
/// Total frame length in bytes
pub const PACKET_LEN: usize = 8;

const OFFSET_BAT_ID: usize = 2;
const OFFSET_NEG_PRESENT: usize = 3;
const OFFSET_NEG_POLARITY: usize = 4;
const OFFSET_POS_PRESENT: usize = 5;
const OFFSET_POS_POLARITY: usize = 6;
const OFFSET_CHECKSUM: usize = 7;

/// XOR of all bytes in `data`
///
/// Shared by the link frames and the on-tag payload.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Presence/polarity flags of one battery's terminal pair
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryState {
    pub pos_present: bool,
    pub neg_present: bool,
    pub pos_polarity_ok: bool,
    pub neg_polarity_ok: bool,
}

impl BatteryState {
    /// Both terminals occupied
    pub fn both_present(&self) -> bool {
        self.pos_present && self.neg_present
    }

    /// Both terminals occupied with correctly oriented tags
    pub fn fully_connected(&self) -> bool {
        self.both_present() && self.pos_polarity_ok && self.neg_polarity_ok
    }
}

/// One decoded status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WallStatusPacket {
    pub battery_id: u8,
    pub state: BatteryState,
}

impl WallStatusPacket {
    pub fn new(battery_id: u8, state: BatteryState) -> Self {
        Self { battery_id, state }
    }

    /// Checksum over identifier and flag bytes
    pub fn checksum(&self) -> u8 {
        let bytes = self.encode();
        xor_checksum(&bytes[OFFSET_BAT_ID..OFFSET_CHECKSUM])
    }

    /// Serialize into wire layout, checksum included
    pub fn encode(&self) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = SYNC1;
        buf[1] = SYNC2;
        buf[OFFSET_BAT_ID] = self.battery_id;
        buf[OFFSET_NEG_PRESENT] = self.state.neg_present as u8;
        buf[OFFSET_NEG_POLARITY] = self.state.neg_polarity_ok as u8;
        buf[OFFSET_POS_PRESENT] = self.state.pos_present as u8;
        buf[OFFSET_POS_POLARITY] = self.state.pos_polarity_ok as u8;
        buf[OFFSET_CHECKSUM] = xor_checksum(&buf[OFFSET_BAT_ID..OFFSET_CHECKSUM]);
        buf
    }

    /// Parse and validate one frame
    ///
    /// Validation order: sync bytes, checksum, then flag values.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() != PACKET_LEN {
            return Err(PacketError::BadLength(buf.len()));
        }
        if buf[0] != SYNC1 || buf[1] != SYNC2 {
            return Err(PacketError::SyncMismatch(buf[0], buf[1]));
        }

        let expected = xor_checksum(&buf[OFFSET_BAT_ID..OFFSET_CHECKSUM]);
        let found = buf[OFFSET_CHECKSUM];
        if expected != found {
            return Err(PacketError::ChecksumMismatch { expected, found });
        }

        let flag = |offset: usize| -> Result<bool, PacketError> {
            match buf[offset] {
                0 => Ok(false),
                1 => Ok(true),
                value => Err(PacketError::InvalidFlag { offset, value }),
            }
        };

        Ok(Self {
            battery_id: buf[OFFSET_BAT_ID],
            state: BatteryState {
                neg_present: flag(OFFSET_NEG_PRESENT)?,
                neg_polarity_ok: flag(OFFSET_NEG_POLARITY)?,
                pos_present: flag(OFFSET_POS_PRESENT)?,
                pos_polarity_ok: flag(OFFSET_POS_POLARITY)?,
            },
        })
    }
}
