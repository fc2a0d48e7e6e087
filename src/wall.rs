//! Wall node context
//!
//! Owns the battery groups, the poll scheduler, the change dispatcher and the
//! peripherals. The firmware builds one of these at boot and calls
//! [`WallNode::on_poll_tick`] from its main loop.

use log::{error, info, warn};
use std::time::{Duration, Instant};

use crate::battery::{BatteryGroup, GroupHealth};
use crate::config::{validate_layout, BatterySpec, TimingConfig};
use crate::dispatch::{IndicatorDriver, WallDispatcher};
use crate::error::ConfigError;
use crate::hal::{ChannelSelector, IndicatorOutput, IndicatorState, PacketSink, TagScanner};
use crate::packet::BatteryState;
use crate::scheduler::PollScheduler;
use crate::tracker::PresenceState;

/// Per-battery line of a [`WallStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BatteryStatus {
    pub id: u8,
    pub name: String,
    pub state: BatteryState,
    pub positive: PresenceState,
    pub negative: PresenceState,
    pub valid: bool,
    pub health: GroupHealth,
}

/// Snapshot of the wall node for status display
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WallStatus {
    pub batteries: Vec<BatteryStatus>,
    pub indicator: IndicatorState,
    pub system_healthy: bool,
    pub tx_packets: u64,
    pub tx_errors: u64,
}

pub struct WallNode<B, L, I> {
    batteries: Vec<BatteryGroup>,
    scheduler: PollScheduler,
    dispatcher: WallDispatcher,
    indicator: IndicatorDriver,
    bus: B,
    link: L,
    led: I,
    system_healthy: bool,
}

impl<B, L, I> WallNode<B, L, I>
where
    B: ChannelSelector + TagScanner,
    L: PacketSink,
    I: IndicatorOutput,
{
    /// Validate the configuration against the layout and the bus, then build
    /// the node. No bus traffic yet.
    pub fn new(
        timing: TimingConfig,
        layout: Vec<BatterySpec>,
        bus: B,
        link: L,
        led: I,
    ) -> Result<Self, ConfigError> {
        validate_layout(&layout)?;
        timing.validate(layout.len())?;
        timing.validate_bus_settle(bus.settle_time())?;

        let scheduler = PollScheduler::new(timing.poll_interval, layout.len());
        let dispatcher = WallDispatcher::new(layout.len());
        let batteries = layout
            .into_iter()
            .map(|spec| BatteryGroup::new(spec, &timing))
            .collect();

        Ok(Self {
            batteries,
            scheduler,
            dispatcher,
            indicator: IndicatorDriver::default(),
            bus,
            link,
            led,
            system_healthy: false,
        })
    }

    /// Bring up every battery group and drive the indicator to its baseline.
    ///
    /// Returns true when at least one group is fully functional. A false
    /// return is not fatal; the loop keeps running with whatever works.
    pub fn initialize(&mut self) -> bool {
        info!("Initializing {} wall batteries", self.batteries.len());
        let mut working = 0;
        for battery in &mut self.batteries {
            if battery.initialize(&mut self.bus) {
                working += 1;
            }
        }
        self.system_healthy = working > 0;
        if self.system_healthy {
            info!("Wall node ready: {}/{} batteries functional", working, self.batteries.len());
        } else {
            error!("No functional battery group, running degraded");
        }

        self.led.set_indicator(IndicatorState::Off);
        self.system_healthy
    }

    /// Drive one scheduling step.
    ///
    /// Scans at most one battery group if the tick is due, then sends a
    /// packet for each battery whose flags changed and refreshes the
    /// indicator. Returns the scanned group index.
    pub fn on_poll_tick(&mut self, now: Instant) -> Option<usize> {
        let group = self.scheduler.due(now)?;
        if let Some(battery) = self.batteries.get_mut(group) {
            battery.update(&mut self.bus, now);
        }
        self.refresh_health();

        let snapshot: Vec<(u8, BatteryState)> =
            self.batteries.iter().map(|b| (b.id(), b.state())).collect();
        self.dispatcher.dispatch(&snapshot, &mut self.link);

        let wanted = self.indicator_state();
        self.indicator.apply(wanted, &mut self.led);
        Some(group)
    }

    fn refresh_health(&mut self) {
        let healthy = self.batteries.iter().any(|b| b.health().fully_functional());
        if healthy != self.system_healthy {
            if healthy {
                info!("Wall node recovered: at least one battery functional");
            } else {
                warn!("No functional battery group left");
            }
            self.system_healthy = healthy;
        }
    }

    /// First battery with both terminals present decides the colour
    pub fn indicator_state(&self) -> IndicatorState {
        match self.batteries.iter().find(|b| b.both_present()) {
            Some(b) if b.has_valid_configuration() => IndicatorState::Green,
            Some(_) => IndicatorState::Red,
            None => IndicatorState::Off,
        }
    }

    pub fn time_until_due(&self, now: Instant) -> Duration {
        self.scheduler.time_until_due(now)
    }

    pub fn aggregate_status(&self) -> WallStatus {
        WallStatus {
            batteries: self
                .batteries
                .iter()
                .map(|b| BatteryStatus {
                    id: b.id(),
                    name: b.name().to_string(),
                    state: b.state(),
                    positive: b.positive().presence(),
                    negative: b.negative().presence(),
                    valid: b.has_valid_configuration(),
                    health: b.health(),
                })
                .collect(),
            indicator: self.indicator.current(),
            system_healthy: self.system_healthy,
            tx_packets: self.dispatcher.tx_packets(),
            tx_errors: self.dispatcher.tx_errors(),
        }
    }

    pub fn batteries(&self) -> &[BatteryGroup] {
        &self.batteries
    }

    pub fn system_healthy(&self) -> bool {
        self.system_healthy
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn indicator_output(&self) -> &I {
        &self.led
    }
}
