//! Battery groups on the wall node
//!
//! A battery owns its positive and negative terminal trackers and the mux
//! that routes the shared reader to them.

use log::{debug, info, warn};
use std::time::Instant;

use crate::config::{BatterySpec, TimingConfig};
use crate::hal::{ChannelSelector, TagScanner};
use crate::packet::BatteryState;
use crate::pair::{is_valid_pair, pair_state};
use crate::tracker::{TerminalRole, TerminalTracker};

/// Health of one battery group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupHealth {
    pub mux_ok: bool,
    pub positive_reader_ok: bool,
    pub negative_reader_ok: bool,
}

impl GroupHealth {
    pub fn fully_functional(&self) -> bool {
        self.mux_ok && self.positive_reader_ok && self.negative_reader_ok
    }
}

#[derive(Debug, Clone)]
pub struct BatteryGroup {
    spec: BatterySpec,
    positive: TerminalTracker,
    negative: TerminalTracker,
    mux_ok: bool,
    bus_errors: u32,
}

impl BatteryGroup {
    pub fn new(spec: BatterySpec, timing: &TimingConfig) -> Self {
        let positive = TerminalTracker::new(TerminalRole::Positive, spec.positive_channel, timing.clone());
        let negative = TerminalTracker::new(TerminalRole::Negative, spec.negative_channel, timing.clone());
        Self {
            spec,
            positive,
            negative,
            mux_ok: false,
            bus_errors: 0,
        }
    }

    pub fn id(&self) -> u8 {
        self.spec.id
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn mux_addr(&self) -> u8 {
        self.spec.mux_addr
    }

    pub fn positive(&self) -> &TerminalTracker {
        &self.positive
    }

    pub fn negative(&self) -> &TerminalTracker {
        &self.negative
    }

    pub fn bus_errors(&self) -> u32 {
        self.bus_errors
    }

    pub fn health(&self) -> GroupHealth {
        GroupHealth {
            mux_ok: self.mux_ok,
            positive_reader_ok: self.positive.reader_ok(),
            negative_reader_ok: self.negative.reader_ok(),
        }
    }

    /// Probe the mux and bring up both readers. Returns true when the whole
    /// group is functional; a partial failure is logged, not fatal.
    pub fn initialize<B>(&mut self, bus: &mut B) -> bool
    where
        B: ChannelSelector + TagScanner + ?Sized,
    {
        let addr = self.spec.mux_addr;
        self.mux_ok = match bus.probe(addr) {
            Ok(()) => true,
            Err(e) => {
                warn!("{} battery: mux 0x{:02X} not responding: {}", self.spec.name, addr, e);
                false
            }
        };

        if self.mux_ok {
            for terminal in [&mut self.positive, &mut self.negative] {
                let channel = terminal.channel();
                let ok = bus
                    .select_channel(addr, channel)
                    .and_then(|_| bus.init_reader(channel));
                if let Err(e) = &ok {
                    warn!(
                        "{} battery: {} reader init failed: {}",
                        self.spec.name,
                        terminal.role().name(),
                        e
                    );
                }
                terminal.set_reader_ok(ok.is_ok());
            }
            if let Err(e) = bus.disable_channel(addr) {
                warn!("{} battery: failed to release mux: {}", self.spec.name, e);
            }
        } else {
            self.positive.set_reader_ok(false);
            self.negative.set_reader_ok(false);
        }

        let health = self.health();
        info!(
            "{} Wall Battery: MUX={}, Positive={}, Negative={}",
            self.spec.name,
            ok_str(health.mux_ok),
            ok_str(health.positive_reader_ok),
            ok_str(health.negative_reader_ok)
        );
        health.fully_functional()
    }

    /// Scan both terminals once: positive then negative, then release the mux.
    ///
    /// Bus failures count as a missed scan and clear the matching health flag.
    pub fn update<B>(&mut self, bus: &mut B, now: Instant)
    where
        B: ChannelSelector + TagScanner + ?Sized,
    {
        let addr = self.spec.mux_addr;
        let name = &self.spec.name;
        let mut mux_ok = true;

        for terminal in [&mut self.positive, &mut self.negative] {
            let channel = terminal.channel();
            let result = bus
                .select_channel(addr, channel)
                .map_err(|e| {
                    mux_ok = false;
                    e
                })
                .and_then(|_| bus.init_reader(channel))
                .and_then(|_| bus.scan(channel));

            match result {
                Ok(sighting) => {
                    terminal.set_reader_ok(true);
                    terminal.update(sighting.as_ref(), now);
                }
                Err(e) => {
                    self.bus_errors += 1;
                    debug!("{} battery: {} scan failed: {}", name, terminal.role().name(), e);
                    if mux_ok {
                        terminal.set_reader_ok(false);
                    }
                    terminal.update(None, now);
                }
            }
        }

        if let Err(e) = bus.disable_channel(addr) {
            mux_ok = false;
            debug!("{} battery: disable mux failed: {}", name, e);
        }

        if self.mux_ok != mux_ok {
            if mux_ok {
                info!("{} battery: mux 0x{:02X} recovered", name, addr);
            } else {
                warn!("{} battery: mux 0x{:02X} communication failed", name, addr);
            }
        }
        self.mux_ok = mux_ok;
    }

    /// Flags sent on the link for this battery
    pub fn state(&self) -> BatteryState {
        pair_state(self.positive.state(), self.negative.state())
    }

    pub fn both_present(&self) -> bool {
        self.positive.state().is_present() && self.negative.state().is_present()
    }

    /// Both terminals PRESENT, correctly oriented, with an accepted cable pair
    pub fn has_valid_configuration(&self) -> bool {
        is_valid_pair(self.positive.state(), self.negative.state())
    }
}

fn ok_str(ok: bool) -> &'static str {
    if ok {
        "OK"
    } else {
        "FAILED"
    }
}
