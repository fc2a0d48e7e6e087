//! Jumper cable tag payload
//!
//! Each cable end carries an NTAG/Ultralight sticker. User memory starting at
//! page 4 holds:
//!
//! ```text
//! [ 'P' | 'O' | 'S' | 0 ] [ id ] [ chk ]
//! ```
//!
//! `chk` is the XOR of the five preceding bytes.
//!
//! Reader commands and multi-byte replies on the air interface are protected
//! by CRC_A, computed with [`crc_a`].

use heapless::Vec;

use crate::error::TagError;
use crate::packet::xor_checksum;

/// First user memory page holding the payload
pub const TAG_START_READ_PAGE: u8 = 4;
/// Payload length in bytes
pub const TAG_PAYLOAD_LEN: usize = 6;
/// Longest ISO 14443-A UID (triple size)
pub const MAX_UID_LEN: usize = 10;

/// Tag UID as reported by the reader
pub type TagUid = Vec<u8, MAX_UID_LEN>;

/// Which end of a jumper cable the tag declares itself to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TagKind {
    Positive,
    Negative,
}

impl TagKind {
    pub fn marker(&self) -> &'static [u8; 3] {
        match self {
            TagKind::Positive => b"POS",
            TagKind::Negative => b"NEG",
        }
    }
}

/// Decoded tag payload. Only exists for payloads whose checksum verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TagRecord {
    pub kind: TagKind,
    /// Cable end number, 1..=4
    pub cable_id: u8,
}

impl TagRecord {
    /// Decode the first [`TAG_PAYLOAD_LEN`] bytes of a page read.
    ///
    /// Longer buffers are accepted since a page read returns 16 bytes.
    pub fn decode(raw: &[u8]) -> Result<Self, TagError> {
        if raw.len() < TAG_PAYLOAD_LEN {
            return Err(TagError::Truncated(raw.len()));
        }
        let payload = &raw[..TAG_PAYLOAD_LEN];

        let expected = xor_checksum(&payload[..TAG_PAYLOAD_LEN - 1]);
        let found = payload[TAG_PAYLOAD_LEN - 1];
        if expected != found {
            return Err(TagError::ChecksumMismatch { expected, found });
        }

        let marker = [payload[0], payload[1], payload[2]];
        let kind = match &marker {
            b"POS" => TagKind::Positive,
            b"NEG" => TagKind::Negative,
            _ => return Err(TagError::UnknownKind(marker)),
        };

        let cable_id = payload[4];
        if !(1..=4).contains(&cable_id) {
            return Err(TagError::CableIdOutOfRange(cable_id));
        }

        Ok(Self { kind, cable_id })
    }

    /// Payload bytes as written to a tag
    pub fn encode(&self) -> [u8; TAG_PAYLOAD_LEN] {
        let marker = self.kind.marker();
        let mut buf = [marker[0], marker[1], marker[2], 0, self.cable_id, 0];
        buf[TAG_PAYLOAD_LEN - 1] = xor_checksum(&buf[..TAG_PAYLOAD_LEN - 1]);
        buf
    }

    /// Whether this tag sits on the terminal it was made for
    pub fn polarity_matches(&self, terminal_is_positive: bool) -> bool {
        (self.kind == TagKind::Positive) == terminal_is_positive
    }
}

/// One positive sighting returned by a reader scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSighting {
    pub uid: TagUid,
    /// Raw bytes from [`TAG_START_READ_PAGE`] onward; empty if the read failed
    pub payload: Vec<u8, 16>,
}

impl TagSighting {
    pub fn new(uid: &[u8], payload: &[u8]) -> Self {
        let mut u = TagUid::new();
        let _ = u.extend_from_slice(&uid[..uid.len().min(MAX_UID_LEN)]);
        let mut p = Vec::new();
        let _ = p.extend_from_slice(&payload[..payload.len().min(16)]);
        Self { uid: u, payload: p }
    }

    pub fn uid_hex(&self) -> String {
        hex::encode_upper(&self.uid)
    }
}

/// ISO 14443-A CRC (CRC_A), little endian
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut b = byte ^ (crc & 0x00FF) as u8;
        b ^= b << 4;
        crc = (crc >> 8) ^ ((b as u16) << 8) ^ ((b as u16) << 3) ^ ((b as u16) >> 4);
    }
    crc.to_le_bytes()
}
