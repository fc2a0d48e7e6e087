//! Timing and layout configuration for both nodes
//!
//! One struct replaces the per-board constant headers. Defaults are the wall
//! node's tuned values; the toy node only reads `inter_byte_timeout`.

use log::{info, warn};
use std::time::Duration;

use crate::error::ConfigError;

/// Consecutive misses that drop a DETECTED terminal back to ABSENT.
pub const DEFAULT_DETECTED_DROP_MISSES: u8 = 2;

/// Timing knobs for tag tracking, scheduling and the serial link
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimingConfig {
    /// Sustained visibility required before DETECTED becomes PRESENT
    pub debounce_window: Duration,
    /// Time since last sighting after which a PRESENT tag counts as removed
    pub absence_timeout: Duration,
    /// Consecutive missed scans that also mark a PRESENT tag removed
    pub presence_threshold: u8,
    /// Consecutive missed scans that abandon a DETECTED tag
    pub detected_drop_misses: u8,

    /// Round-robin tick, one battery group per tick
    pub poll_interval: Duration,
    /// Mux channel switch settle time
    pub channel_settle: Duration,
    /// Reader re-init settle time after a channel switch
    pub reader_settle: Duration,

    /// Receiver inter-byte timeout before a partial frame is dropped
    pub inter_byte_timeout: Duration,
    /// Pause after each transmitted frame before the next one
    pub line_settle: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(150), // 3 * poll interval
            absence_timeout: Duration::from_millis(450), // 3 * debounce
            presence_threshold: 3,
            detected_drop_misses: DEFAULT_DETECTED_DROP_MISSES,

            poll_interval: Duration::from_millis(50),
            channel_settle: Duration::from_millis(5),
            reader_settle: Duration::from_millis(10),

            inter_byte_timeout: Duration::from_millis(100),
            line_settle: Duration::from_millis(5),
        }
    }
}

impl TimingConfig {
    /// Time a single group update holds the bus: two channel switches, each
    /// followed by a reader re-init.
    pub fn group_settle_budget(&self) -> Duration {
        (self.channel_settle + self.reader_settle) * 2
    }

    /// Check the poll budget against the settle time a bus actually applies.
    ///
    /// The configured `channel_settle` is a floor; a bus that settles longer
    /// takes the budget with it.
    pub fn validate_bus_settle(&self, bus_settle: Duration) -> Result<(), ConfigError> {
        let settle = (self.channel_settle.max(bus_settle) + self.reader_settle) * 2;
        if self.poll_interval <= settle {
            return Err(ConfigError::PollBelowSettle {
                poll_ms: self.poll_interval.as_millis() as u64,
                settle_ms: settle.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Removal confirmation window. REMOVED turns ABSENT once exceeded.
    pub fn removal_confirm(&self) -> Duration {
        self.absence_timeout * 2
    }

    /// Check orderings the tracker and scheduler depend on.
    ///
    /// `group_count` is only used for the debounce-vs-sweep warning.
    pub fn validate(&self, group_count: usize) -> Result<(), ConfigError> {
        if self.presence_threshold == 0 {
            return Err(ConfigError::Zero("presence_threshold"));
        }
        if self.detected_drop_misses == 0 {
            return Err(ConfigError::Zero("detected_drop_misses"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll_interval"));
        }
        if self.inter_byte_timeout.is_zero() {
            return Err(ConfigError::Zero("inter_byte_timeout"));
        }
        if self.absence_timeout.is_zero() {
            return Err(ConfigError::Zero("absence_timeout"));
        }
        if self.debounce_window >= self.absence_timeout {
            return Err(ConfigError::DebounceNotBelowAbsence {
                debounce_ms: self.debounce_window.as_millis() as u64,
                absence_ms: self.absence_timeout.as_millis() as u64,
            });
        }

        let settle = self.group_settle_budget();
        if self.poll_interval <= settle {
            return Err(ConfigError::PollBelowSettle {
                poll_ms: self.poll_interval.as_millis() as u64,
                settle_ms: settle.as_millis() as u64,
            });
        }

        // Each terminal is only revisited once per full sweep
        let sweep = self.poll_interval * group_count.max(1) as u32;
        if self.debounce_window < sweep {
            warn!(
                "Debounce window {}ms is shorter than one sweep ({}ms); a single late scan may read as removal",
                self.debounce_window.as_millis(),
                sweep.as_millis()
            );
        }

        Ok(())
    }
}

/// Static description of one battery group on the wall
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatterySpec {
    /// Source id carried in every status frame
    pub id: u8,
    pub name: String,
    /// TCA9548A address for this battery
    pub mux_addr: u8,
    pub positive_channel: u8,
    pub negative_channel: u8,
}

/// Default battery layout: 6V, 12V and 16V batteries on muxes 0x70..0x72
pub fn default_batteries() -> Vec<BatterySpec> {
    const NEGATIVE_TERMINAL_CHANNEL: u8 = 1;
    const POSITIVE_TERMINAL_CHANNEL: u8 = 2;

    [(0u8, "6V", 0x70u8), (1, "12V", 0x71), (2, "16V", 0x72)]
        .into_iter()
        .map(|(id, name, mux_addr)| BatterySpec {
            id,
            name: name.to_string(),
            mux_addr,
            positive_channel: POSITIVE_TERMINAL_CHANNEL,
            negative_channel: NEGATIVE_TERMINAL_CHANNEL,
        })
        .collect()
}

/// Validate a battery layout before building a wall node from it
pub fn validate_layout(batteries: &[BatterySpec]) -> Result<(), ConfigError> {
    if batteries.is_empty() {
        return Err(ConfigError::NoBatteries);
    }
    for spec in batteries {
        for ch in [spec.positive_channel, spec.negative_channel] {
            if ch > 7 {
                return Err(ConfigError::ChannelOutOfRange(ch));
            }
        }
        info!(
            "Battery {} ({}): mux=0x{:02X} pos_ch={} neg_ch={}",
            spec.id, spec.name, spec.mux_addr, spec.positive_channel, spec.negative_channel
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_valid() {
        let cfg = TimingConfig::default();
        assert_eq!(cfg.validate(3), Ok(()));
        assert!(cfg.debounce_window < cfg.absence_timeout);
        assert!(cfg.absence_timeout < cfg.removal_confirm());
    }

    #[test]
    fn test_debounce_must_be_below_absence() {
        let cfg = TimingConfig {
            debounce_window: Duration::from_millis(500),
            absence_timeout: Duration::from_millis(500),
            ..TimingConfig::default()
        };
        assert!(matches!(
            cfg.validate(3),
            Err(ConfigError::DebounceNotBelowAbsence { .. })
        ));
    }

    #[test]
    fn test_poll_interval_must_cover_settle_budget() {
        let cfg = TimingConfig {
            poll_interval: Duration::from_millis(30),
            ..TimingConfig::default()
        };
        assert_eq!(
            cfg.validate(3),
            Err(ConfigError::PollBelowSettle { poll_ms: 30, settle_ms: 30 })
        );
    }

    #[test]
    fn test_slow_bus_settle_eats_poll_budget() {
        let cfg = TimingConfig::default();
        assert_eq!(cfg.validate_bus_settle(Duration::from_millis(5)), Ok(()));
        // Faster than configured: the configured floor still applies
        assert_eq!(cfg.validate_bus_settle(Duration::ZERO), Ok(()));
        assert_eq!(
            cfg.validate_bus_settle(Duration::from_millis(15)),
            Err(ConfigError::PollBelowSettle { poll_ms: 50, settle_ms: 50 })
        );
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let cfg = TimingConfig {
            presence_threshold: 0,
            ..TimingConfig::default()
        };
        assert_eq!(cfg.validate(1), Err(ConfigError::Zero("presence_threshold")));
    }

    #[test]
    fn test_default_layout() {
        let layout = default_batteries();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout[1].name, "12V");
        assert_eq!(layout[2].mux_addr, 0x72);
        assert_eq!(validate_layout(&layout), Ok(()));
        assert_eq!(validate_layout(&[]), Err(ConfigError::NoBatteries));
    }

    #[test]
    fn test_layout_rejects_bad_channel() {
        let mut layout = default_batteries();
        layout[0].positive_channel = 8;
        assert_eq!(validate_layout(&layout), Err(ConfigError::ChannelOutOfRange(8)));
    }
}
