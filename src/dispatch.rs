//! State-change dispatch
//!
//! Both nodes only act on change. The wall compares each battery's flags with
//! the last transmitted snapshot and sends one frame per changed battery. The
//! toy keeps the last state heard for each battery, runs them through an
//! ordered policy table and issues one device command per new aggregate
//! outcome.

use log::{debug, info, warn};
use std::collections::BTreeMap;

use crate::hal::{Animation, Cue, CueOutput, IndicatorOutput, IndicatorState, PacketSink};
use crate::packet::{BatteryState, WallStatusPacket};

// ---------------------------------------------------------------------------
// Wall side
// ---------------------------------------------------------------------------

/// Remembers the last flags sent per battery and transmits changes
#[derive(Debug, Clone)]
pub struct WallDispatcher {
    last_sent: Vec<BatteryState>,
    tx_packets: u64,
    tx_errors: u64,
}

impl WallDispatcher {
    /// All batteries start from the all-false baseline
    pub fn new(battery_count: usize) -> Self {
        Self {
            last_sent: vec![BatteryState::default(); battery_count],
            tx_packets: 0,
            tx_errors: 0,
        }
    }

    pub fn tx_packets(&self) -> u64 {
        self.tx_packets
    }

    pub fn tx_errors(&self) -> u64 {
        self.tx_errors
    }

    /// Compare `current` (battery id, flags) against the snapshot and send
    /// one frame for each battery that changed. Returns frames sent.
    ///
    /// The snapshot is updated even when a write fails; the link has no
    /// retransmission.
    pub fn dispatch<L>(&mut self, current: &[(u8, BatteryState)], link: &mut L) -> usize
    where
        L: PacketSink + ?Sized,
    {
        let mut sent = 0;
        for (index, &(battery_id, state)) in current.iter().enumerate() {
            let Some(last) = self.last_sent.get_mut(index) else {
                continue;
            };
            if *last == state {
                continue;
            }
            *last = state;

            let packet = WallStatusPacket::new(battery_id, state);
            match link.transmit(&packet) {
                Ok(()) => {
                    self.tx_packets += 1;
                    sent += 1;
                    info!(
                        "Packet sent -> BAT:{} NEG_PRESENT:{} NEG_STATE:{} POS_PRESENT:{} POS_STATE:{}",
                        battery_id,
                        state.neg_present as u8,
                        state.neg_polarity_ok as u8,
                        state.pos_present as u8,
                        state.pos_polarity_ok as u8
                    );
                }
                Err(e) => {
                    self.tx_errors += 1;
                    warn!("Failed to send packet for battery {}: {}", battery_id, e);
                }
            }
        }
        sent
    }
}

/// Drives the wall indicator, writing only on change
#[derive(Debug, Clone)]
pub struct IndicatorDriver {
    current: IndicatorState,
}

impl Default for IndicatorDriver {
    fn default() -> Self {
        Self {
            current: IndicatorState::Off,
        }
    }
}

impl IndicatorDriver {
    pub fn current(&self) -> IndicatorState {
        self.current
    }

    /// Returns true if the output was written
    pub fn apply<O>(&mut self, state: IndicatorState, out: &mut O) -> bool
    where
        O: IndicatorOutput + ?Sized,
    {
        if state == self.current {
            return false;
        }
        debug!("Indicator {:?} -> {:?}", self.current, state);
        out.set_indicator(state);
        self.current = state;
        true
    }
}

// ---------------------------------------------------------------------------
// Toy side
// ---------------------------------------------------------------------------

/// One battery's flags as last received from the wall
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RemoteBatteryState {
    pub battery_id: u8,
    pub state: BatteryState,
}

impl From<WallStatusPacket> for RemoteBatteryState {
    fn from(pkt: WallStatusPacket) -> Self {
        Self {
            battery_id: pkt.battery_id,
            state: pkt.state,
        }
    }
}

/// Aggregate status the toy is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ToyOutcome {
    /// Battery correctly jumped
    Success { battery_id: u8 },
    /// Cables on, but the wrong way round
    WrongConnection { battery_id: u8 },
    Idle,
}

/// One device command: optional audio cue plus an animation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCommand {
    pub cue: Option<Cue>,
    pub animation: Animation,
}

impl ToyOutcome {
    /// Command that represents this outcome on the toy
    pub fn command(&self) -> DeviceCommand {
        match *self {
            ToyOutcome::Success { battery_id } => match battery_id {
                0 => DeviceCommand { cue: Some(Cue::Sputter), animation: Animation::Battery6V },
                1 => DeviceCommand { cue: Some(Cue::EngineStart), animation: Animation::Battery12V },
                2 => DeviceCommand { cue: Some(Cue::Zap), animation: Animation::Battery16V },
                _ => DeviceCommand { cue: None, animation: Animation::Default },
            },
            ToyOutcome::WrongConnection { .. } => DeviceCommand {
                cue: Some(Cue::Fail),
                animation: Animation::Wrong,
            },
            ToyOutcome::Idle => DeviceCommand {
                cue: None,
                animation: Animation::Default,
            },
        }
    }
}

/// Condition over the remote state
pub type Predicate = fn(&BatteryState) -> bool;

/// Which outcome a matching rule produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Success,
    WrongConnection,
}

#[derive(Debug, Clone, Copy)]
pub struct PolicyRule {
    pub name: &'static str,
    pub predicate: Predicate,
    pub outcome: RuleOutcome,
}

/// Success when all four flags are set
pub fn all_connected(s: &BatteryState) -> bool {
    s.fully_connected()
}

/// Both clamps on, at least one reversed
pub fn any_polarity_wrong(s: &BatteryState) -> bool {
    s.both_present() && !(s.pos_polarity_ok && s.neg_polarity_ok)
}

/// Negative clamp on and reversed, regardless of the positive side
pub fn negative_polarity_wrong(s: &BatteryState) -> bool {
    s.neg_present && !s.neg_polarity_ok
}

/// Ordered rule set; the first matching rule wins, no match means idle
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<PolicyRule>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(vec![
            PolicyRule {
                name: "success",
                predicate: all_connected,
                outcome: RuleOutcome::Success,
            },
            PolicyRule {
                name: "wrong-polarity",
                predicate: any_polarity_wrong,
                outcome: RuleOutcome::WrongConnection,
            },
        ])
    }
}

impl PolicyTable {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self { rules }
    }

    /// Variant that flags a reversed negative clamp even with the positive
    /// clamp still off
    pub fn negative_clamp_strict() -> Self {
        Self::new(vec![
            PolicyRule {
                name: "success",
                predicate: all_connected,
                outcome: RuleOutcome::Success,
            },
            PolicyRule {
                name: "negative-reversed",
                predicate: negative_polarity_wrong,
                outcome: RuleOutcome::WrongConnection,
            },
        ])
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    pub fn evaluate(&self, remote: &RemoteBatteryState) -> ToyOutcome {
        for rule in &self.rules {
            if (rule.predicate)(&remote.state) {
                debug!("Policy rule '{}' matched battery {}", rule.name, remote.battery_id);
                return match rule.outcome {
                    RuleOutcome::Success => ToyOutcome::Success {
                        battery_id: remote.battery_id,
                    },
                    RuleOutcome::WrongConnection => ToyOutcome::WrongConnection {
                        battery_id: remote.battery_id,
                    },
                };
            }
        }
        ToyOutcome::Idle
    }

    /// Combine the per-battery outcomes into the one the toy shows.
    ///
    /// Any success wins over a wrong connection, which wins over idle. Within
    /// a rank the battery that just reported (`latest`) wins, then the lowest
    /// id.
    pub fn evaluate_all(&self, states: &BTreeMap<u8, BatteryState>, latest: u8) -> ToyOutcome {
        let mut success = None;
        let mut wrong = None;
        for (&battery_id, &state) in states {
            let outcome = self.evaluate(&RemoteBatteryState { battery_id, state });
            let slot = match outcome {
                ToyOutcome::Success { .. } => &mut success,
                ToyOutcome::WrongConnection { .. } => &mut wrong,
                ToyOutcome::Idle => continue,
            };
            if slot.is_none() || battery_id == latest {
                *slot = Some(outcome);
            }
        }
        success.or(wrong).unwrap_or(ToyOutcome::Idle)
    }
}

/// Applies received states to the toy outputs
#[derive(Debug, Clone)]
pub struct ToyDispatcher {
    policy: PolicyTable,
    remote: Option<RemoteBatteryState>,
    batteries: BTreeMap<u8, BatteryState>,
    outcome: Option<ToyOutcome>,
    commands_issued: u64,
}

impl ToyDispatcher {
    pub fn new(policy: PolicyTable) -> Self {
        Self {
            policy,
            remote: None,
            batteries: BTreeMap::new(),
            outcome: None,
            commands_issued: 0,
        }
    }

    /// Last accepted remote state; `None` until the first valid frame
    pub fn remote(&self) -> Option<&RemoteBatteryState> {
        self.remote.as_ref()
    }

    /// Last state heard per battery id
    pub fn remote_states(&self) -> &BTreeMap<u8, BatteryState> {
        &self.batteries
    }

    pub fn outcome(&self) -> Option<ToyOutcome> {
        self.outcome
    }

    pub fn commands_issued(&self) -> u64 {
        self.commands_issued
    }

    /// Put the outputs in the idle state at start-up
    pub fn start<O>(&mut self, out: &mut O)
    where
        O: CueOutput + ?Sized,
    {
        self.issue(ToyOutcome::Idle, out);
    }

    /// Handle one valid frame for one battery and re-evaluate the aggregate.
    /// Returns true if a command was issued.
    pub fn on_packet<O>(&mut self, packet: WallStatusPacket, out: &mut O) -> bool
    where
        O: CueOutput + ?Sized,
    {
        let remote = RemoteBatteryState::from(packet);
        self.remote = Some(remote);
        if self.batteries.insert(remote.battery_id, remote.state) == Some(remote.state) {
            debug!("Remote state unchanged for battery {}", remote.battery_id);
            return false;
        }

        let outcome = self.policy.evaluate_all(&self.batteries, remote.battery_id);
        if self.outcome == Some(outcome) {
            return false;
        }
        self.issue(outcome, out);
        true
    }

    fn issue<O>(&mut self, outcome: ToyOutcome, out: &mut O)
    where
        O: CueOutput + ?Sized,
    {
        let cmd = outcome.command();
        info!("Toy outcome {:?} -> cue={:?} animation={:?}", outcome, cmd.cue, cmd.animation);
        if let Some(cue) = cmd.cue {
            out.play_cue(cue);
        }
        out.set_animation(cmd.animation);
        self.outcome = Some(outcome);
        self.commands_issued += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BusError;

    #[derive(Default)]
    struct Link {
        sent: Vec<WallStatusPacket>,
        fail: bool,
    }

    impl PacketSink for Link {
        fn transmit(&mut self, packet: &WallStatusPacket) -> Result<(), BusError> {
            if self.fail {
                return Err(BusError::Timeout);
            }
            self.sent.push(*packet);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Outputs {
        cues: Vec<Cue>,
        animations: Vec<Animation>,
    }

    impl CueOutput for Outputs {
        fn play_cue(&mut self, cue: Cue) {
            self.cues.push(cue);
        }
        fn set_animation(&mut self, mode: Animation) {
            self.animations.push(mode);
        }
    }

    const ALL: BatteryState = BatteryState {
        pos_present: true,
        neg_present: true,
        pos_polarity_ok: true,
        neg_polarity_ok: true,
    };

    #[test]
    fn test_wall_sends_only_changes() {
        let mut d = WallDispatcher::new(3);
        let mut link = Link::default();
        let idle = BatteryState::default();

        assert_eq!(d.dispatch(&[(0, idle), (1, idle), (2, idle)], &mut link), 0);
        assert_eq!(d.dispatch(&[(0, ALL), (1, idle), (2, ALL)], &mut link), 2);
        assert_eq!(link.sent.len(), 2);
        assert_eq!(link.sent[0].battery_id, 0);
        assert_eq!(link.sent[1].battery_id, 2);

        // Identical snapshot: quiescent
        assert_eq!(d.dispatch(&[(0, ALL), (1, idle), (2, ALL)], &mut link), 0);
        assert_eq!(link.sent.len(), 2);
        assert_eq!(d.tx_packets(), 2);
    }

    #[test]
    fn test_wall_failed_send_not_retried() {
        let mut d = WallDispatcher::new(1);
        let mut link = Link { fail: true, ..Link::default() };
        assert_eq!(d.dispatch(&[(0, ALL)], &mut link), 0);
        assert_eq!(d.tx_errors(), 1);
        link.fail = false;
        assert_eq!(d.dispatch(&[(0, ALL)], &mut link), 0);
        assert!(link.sent.is_empty());
    }

    #[test]
    fn test_indicator_only_on_change() {
        struct Led(Vec<IndicatorState>);
        impl IndicatorOutput for Led {
            fn set_indicator(&mut self, state: IndicatorState) {
                self.0.push(state);
            }
        }
        let mut drv = IndicatorDriver::default();
        let mut led = Led(Vec::new());
        assert!(!drv.apply(IndicatorState::Off, &mut led));
        assert!(drv.apply(IndicatorState::Red, &mut led));
        assert!(!drv.apply(IndicatorState::Red, &mut led));
        assert!(drv.apply(IndicatorState::Green, &mut led));
        assert_eq!(led.0, vec![IndicatorState::Red, IndicatorState::Green]);
    }

    #[test]
    fn test_policy_priority() {
        let table = PolicyTable::default();
        let ok = RemoteBatteryState { battery_id: 1, state: ALL };
        assert_eq!(table.evaluate(&ok), ToyOutcome::Success { battery_id: 1 });

        let reversed = RemoteBatteryState {
            battery_id: 1,
            state: BatteryState { neg_polarity_ok: false, ..ALL },
        };
        assert_eq!(table.evaluate(&reversed), ToyOutcome::WrongConnection { battery_id: 1 });

        let one_clamp = RemoteBatteryState {
            battery_id: 1,
            state: BatteryState { neg_present: true, ..BatteryState::default() },
        };
        assert_eq!(table.evaluate(&one_clamp), ToyOutcome::Idle);
        assert_eq!(
            PolicyTable::negative_clamp_strict().evaluate(&one_clamp),
            ToyOutcome::WrongConnection { battery_id: 1 }
        );
    }

    #[test]
    fn test_toy_commands_per_battery() {
        assert_eq!(ToyOutcome::Success { battery_id: 0 }.command().cue, Some(Cue::Sputter));
        assert_eq!(ToyOutcome::Success { battery_id: 1 }.command().animation, Animation::Battery12V);
        assert_eq!(ToyOutcome::Success { battery_id: 2 }.command().cue, Some(Cue::Zap));
        assert_eq!(ToyOutcome::Success { battery_id: 9 }.command().cue, None);
        assert_eq!(ToyOutcome::Idle.command().cue, None);
    }

    #[test]
    fn test_toy_identical_packet_issues_once() {
        let mut d = ToyDispatcher::new(PolicyTable::default());
        let mut out = Outputs::default();
        let pkt = WallStatusPacket::new(1, ALL);
        assert!(d.on_packet(pkt, &mut out));
        assert!(!d.on_packet(pkt, &mut out));
        assert_eq!(out.cues, vec![Cue::EngineStart]);
        assert_eq!(out.animations, vec![Animation::Battery12V]);
        assert_eq!(d.commands_issued(), 1);
    }

    #[test]
    fn test_toy_same_outcome_suppressed() {
        let mut d = ToyDispatcher::new(PolicyTable::default());
        let mut out = Outputs::default();
        d.start(&mut out);
        // Different remote states that both evaluate to idle
        let a = WallStatusPacket::new(0, BatteryState { pos_present: true, ..BatteryState::default() });
        let b = WallStatusPacket::new(0, BatteryState { neg_present: true, ..BatteryState::default() });
        assert!(!d.on_packet(a, &mut out));
        assert!(!d.on_packet(b, &mut out));
        assert_eq!(out.animations, vec![Animation::Default]);
        assert_eq!(d.remote().map(|r| r.state), Some(b.state));
    }

    #[test]
    fn test_toy_other_battery_does_not_clear_success() {
        let mut d = ToyDispatcher::new(PolicyTable::default());
        let mut out = Outputs::default();
        d.start(&mut out);
        assert!(d.on_packet(WallStatusPacket::new(0, ALL), &mut out));

        // One clamp touched on another battery
        let touch = BatteryState { pos_present: true, pos_polarity_ok: true, ..BatteryState::default() };
        assert!(!d.on_packet(WallStatusPacket::new(1, touch), &mut out));
        assert_eq!(d.outcome(), Some(ToyOutcome::Success { battery_id: 0 }));
        assert_eq!(out.animations, vec![Animation::Default, Animation::Battery6V]);
        assert_eq!(d.remote().map(|r| r.battery_id), Some(1));
        assert_eq!(d.remote_states().len(), 2);

        // Battery 0 released: nothing left connected
        assert!(d.on_packet(WallStatusPacket::new(0, BatteryState::default()), &mut out));
        assert_eq!(d.outcome(), Some(ToyOutcome::Idle));
    }

    #[test]
    fn test_toy_aggregate_ranking() {
        let mut d = ToyDispatcher::new(PolicyTable::default());
        let mut out = Outputs::default();
        let reversed = BatteryState { neg_polarity_ok: false, ..ALL };

        d.on_packet(WallStatusPacket::new(2, ALL), &mut out);
        // A wrong connection elsewhere does not override a success
        assert!(!d.on_packet(WallStatusPacket::new(0, reversed), &mut out));
        assert_eq!(d.outcome(), Some(ToyOutcome::Success { battery_id: 2 }));

        // A new success takes over from the older one
        assert!(d.on_packet(WallStatusPacket::new(1, ALL), &mut out));
        assert_eq!(d.outcome(), Some(ToyOutcome::Success { battery_id: 1 }));

        // Falls back to the remaining success, then to the wrong connection
        d.on_packet(WallStatusPacket::new(1, BatteryState::default()), &mut out);
        assert_eq!(d.outcome(), Some(ToyOutcome::Success { battery_id: 2 }));
        d.on_packet(WallStatusPacket::new(2, BatteryState::default()), &mut out);
        assert_eq!(d.outcome(), Some(ToyOutcome::WrongConnection { battery_id: 0 }));
        assert_eq!(out.cues, vec![Cue::Zap, Cue::EngineStart, Cue::Zap, Cue::Fail]);
    }

    #[test]
    fn test_toy_success_then_wrong_then_idle() {
        let mut d = ToyDispatcher::new(PolicyTable::default());
        let mut out = Outputs::default();
        d.on_packet(WallStatusPacket::new(2, ALL), &mut out);
        d.on_packet(
            WallStatusPacket::new(2, BatteryState { pos_polarity_ok: false, ..ALL }),
            &mut out,
        );
        d.on_packet(WallStatusPacket::new(2, BatteryState::default()), &mut out);
        assert_eq!(out.cues, vec![Cue::Zap, Cue::Fail]);
        assert_eq!(
            out.animations,
            vec![Animation::Battery16V, Animation::Wrong, Animation::Default]
        );
        assert_eq!(d.outcome(), Some(ToyOutcome::Idle));
    }
}
