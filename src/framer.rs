//! Status frame receiver
//!
//! Byte-level state machine that pulls 8-byte frames out of the RS-485
//! stream:
//!
//! ```text
//!   WaitSync1 --0xAA--> WaitSync2 --0x55--> Accumulate --8 bytes--> validate
//!       ^                  |  (0xAA: stay)                             |
//!       +------other-------+                                           |
//!       +-------------------- always, pass or fail --------------------+
//! ```
//!
//! A stalled link must never leave a half frame behind: if more than the
//! inter-byte timeout passes since the last consumed byte, any partial frame
//! is dropped before the next byte is looked at.

use log::{debug, info, trace, warn};
use std::time::{Duration, Instant};

use crate::error::PacketError;
use crate::hal::ByteSource;
use crate::packet::{WallStatusPacket, PACKET_LEN, SYNC1, SYNC2};

/// Receiver states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    WaitSync1,
    WaitSync2,
    Accumulate,
}

/// Receiver counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReceiverStats {
    pub rx_bytes: u64,
    pub frames_ok: u64,
    pub checksum_errors: u64,
    pub framing_errors: u64, // bad sync after full read, bad flag bytes
    pub timeouts: u64,       // partial frames dropped on stall
    pub discarded_bytes: u64,
}

/// Frame receiver for [`WallStatusPacket`]s
#[derive(Debug)]
pub struct FrameReceiver {
    state: RxState,
    buffer: [u8; PACKET_LEN],
    index: usize,
    last_byte_at: Option<Instant>,
    inter_byte_timeout: Duration,
    last_error: Option<PacketError>,
    stats: ReceiverStats,
}

impl FrameReceiver {
    pub fn new(inter_byte_timeout: Duration) -> Self {
        Self {
            state: RxState::WaitSync1,
            buffer: [0u8; PACKET_LEN],
            index: 0,
            last_byte_at: None,
            inter_byte_timeout,
            last_error: None,
            stats: ReceiverStats::default(),
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = ReceiverStats::default();
    }

    /// Most recent validation failure, if any, cleared on read
    pub fn take_last_error(&mut self) -> Option<PacketError> {
        self.last_error.take()
    }

    fn reset(&mut self) {
        self.state = RxState::WaitSync1;
        self.index = 0;
    }

    /// Drop a stale partial frame if the link has been quiet too long
    pub fn check_timeout(&mut self, now: Instant) {
        if self.state == RxState::WaitSync1 {
            return;
        }
        let Some(last) = self.last_byte_at else {
            return;
        };
        if now.saturating_duration_since(last) > self.inter_byte_timeout {
            self.stats.timeouts += 1;
            self.stats.discarded_bytes += self.index as u64;
            debug!(
                "RX timeout in {:?} after {}ms, dropping {} buffered bytes",
                self.state,
                now.saturating_duration_since(last).as_millis(),
                self.index
            );
            self.reset();
        }
    }

    /// Consume one byte received at `now`.
    ///
    /// Returns a packet when this byte completed a valid frame.
    pub fn push_byte(&mut self, byte: u8, now: Instant) -> Option<WallStatusPacket> {
        self.check_timeout(now);
        self.last_byte_at = Some(now);
        self.stats.rx_bytes += 1;
        trace!("RX byte 0x{:02X} in {:?}", byte, self.state);

        match self.state {
            RxState::WaitSync1 => {
                if byte == SYNC1 {
                    self.buffer[0] = byte;
                    self.index = 1;
                    self.state = RxState::WaitSync2;
                } else {
                    self.stats.discarded_bytes += 1;
                }
                None
            }
            RxState::WaitSync2 => {
                if byte == SYNC2 {
                    self.buffer[1] = byte;
                    self.index = 2;
                    self.state = RxState::Accumulate;
                } else if byte == SYNC1 {
                    // Previous 0xAA was noise; this one may start the frame
                    self.stats.discarded_bytes += 1;
                } else {
                    self.stats.discarded_bytes += 2;
                    self.reset();
                }
                None
            }
            RxState::Accumulate => {
                self.buffer[self.index] = byte;
                self.index += 1;
                if self.index < PACKET_LEN {
                    return None;
                }

                let frame = self.buffer;
                self.reset();
                self.validate(&frame)
            }
        }
    }

    fn validate(&mut self, frame: &[u8; PACKET_LEN]) -> Option<WallStatusPacket> {
        match WallStatusPacket::decode(frame) {
            Ok(pkt) => {
                self.stats.frames_ok += 1;
                debug!(
                    "RX frame OK: bat={} neg={}/{} pos={}/{}",
                    pkt.battery_id,
                    pkt.state.neg_present as u8,
                    pkt.state.neg_polarity_ok as u8,
                    pkt.state.pos_present as u8,
                    pkt.state.pos_polarity_ok as u8
                );
                Some(pkt)
            }
            Err(e) => {
                match e {
                    PacketError::ChecksumMismatch { .. } => self.stats.checksum_errors += 1,
                    _ => self.stats.framing_errors += 1,
                }
                self.stats.discarded_bytes += PACKET_LEN as u64;
                warn!("RX frame rejected: {} raw={:02X?}", e, frame);
                self.last_error = Some(e);
                None
            }
        }
    }

    /// Drain everything the source has buffered, invoking `on_packet` once
    /// per valid frame. Returns the number of frames delivered.
    pub fn poll<S, F>(&mut self, source: &mut S, now: Instant, mut on_packet: F) -> usize
    where
        S: ByteSource + ?Sized,
        F: FnMut(WallStatusPacket),
    {
        self.check_timeout(now);

        let mut buf = [0u8; 64];
        let mut delivered = 0;
        loop {
            let n = source.read_available(&mut buf);
            if n == 0 {
                break;
            }
            for &b in &buf[..n.min(buf.len())] {
                if let Some(pkt) = self.push_byte(b, now) {
                    delivered += 1;
                    on_packet(pkt);
                }
            }
        }
        if delivered > 1 {
            info!("RX drained {} frames in one poll", delivered);
        }
        delivered
    }
}
