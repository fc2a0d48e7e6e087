mod common;

use std::time::{Duration, Instant};

use common::{ToyOutputs, Wire};
use jumpstart_link::hal::{Animation, Cue};
use jumpstart_link::toy::RemoteStatus;
use jumpstart_link::{BatteryState, PolicyTable, TimingConfig, ToyNode, ToyOutcome, WallStatusPacket};

const ALL: BatteryState = BatteryState {
    pos_present: true,
    neg_present: true,
    pos_polarity_ok: true,
    neg_polarity_ok: true,
};

fn toy() -> (ToyNode<Wire, ToyOutputs>, Wire) {
    let wire = Wire::default();
    let node = ToyNode::new(
        &TimingConfig::default(),
        PolicyTable::default(),
        wire.clone(),
        ToyOutputs::default(),
    );
    (node, wire)
}

#[test]
fn test_start_issues_idle_once() {
    let (mut node, _wire) = toy();
    node.start();
    assert_eq!(node.outputs().animations, vec![Animation::Default]);
    assert!(node.outputs().cues.is_empty());
    assert_eq!(node.aggregate_status().remote, RemoteStatus::Unknown);
}

#[test]
fn test_success_plays_battery_cue() {
    let (mut node, wire) = toy();
    node.start();
    wire.push(&WallStatusPacket::new(0, ALL).encode());
    assert_eq!(node.on_byte_stream_available(Instant::now()), 1);

    assert_eq!(node.outputs().cues, vec![Cue::Sputter]);
    assert_eq!(
        node.outputs().animations,
        vec![Animation::Default, Animation::Battery6V]
    );
    let status = node.aggregate_status();
    assert_eq!(status.outcome, Some(ToyOutcome::Success { battery_id: 0 }));
    assert!(matches!(status.remote, RemoteStatus::Known(r) if r.state == ALL));
}

#[test]
fn test_touch_on_second_battery_keeps_success() {
    let (mut node, wire) = toy();
    node.start();
    wire.push(&WallStatusPacket::new(0, ALL).encode());
    let one_clamp = BatteryState {
        pos_present: true,
        pos_polarity_ok: true,
        ..BatteryState::default()
    };
    wire.push(&WallStatusPacket::new(1, one_clamp).encode());
    assert_eq!(node.on_byte_stream_available(Instant::now()), 2);

    let status = node.aggregate_status();
    assert_eq!(status.outcome, Some(ToyOutcome::Success { battery_id: 0 }));
    assert_eq!(
        node.outputs().animations,
        vec![Animation::Default, Animation::Battery6V],
        "battery 0 is still jumped"
    );
    assert!(matches!(status.remote, RemoteStatus::Known(r) if r.battery_id == 1));
}

#[test]
fn test_duplicate_frame_no_second_cue() {
    let (mut node, wire) = toy();
    let frame = WallStatusPacket::new(2, ALL).encode();
    wire.push(&frame);
    wire.push(&frame);
    assert_eq!(node.on_byte_stream_available(Instant::now()), 2);
    assert_eq!(node.outputs().cues, vec![Cue::Zap]);
    assert_eq!(node.aggregate_status().commands_issued, 1);
}

#[test]
fn test_corrupt_frame_keeps_previous_state() {
    let (mut node, wire) = toy();
    let t0 = Instant::now();
    wire.push(&WallStatusPacket::new(1, ALL).encode());
    node.on_byte_stream_available(t0);

    let mut bad = WallStatusPacket::new(1, BatteryState::default()).encode();
    bad[7] ^= 0xFF;
    wire.push(&bad);
    assert_eq!(node.on_byte_stream_available(t0 + Duration::from_millis(10)), 0);

    let status = node.aggregate_status();
    assert_eq!(status.outcome, Some(ToyOutcome::Success { battery_id: 1 }));
    assert_eq!(status.receiver.checksum_errors, 1);
    assert_eq!(node.outputs().cues, vec![Cue::EngineStart]);
}

#[test]
fn test_wrong_connection_then_fixed() {
    let (mut node, wire) = toy();
    let t0 = Instant::now();
    let reversed = BatteryState {
        pos_polarity_ok: false,
        neg_polarity_ok: false,
        ..ALL
    };
    wire.push(&WallStatusPacket::new(1, reversed).encode());
    node.on_byte_stream_available(t0);
    wire.push(&WallStatusPacket::new(1, ALL).encode());
    node.on_byte_stream_available(t0 + Duration::from_millis(500));

    assert_eq!(node.outputs().cues, vec![Cue::Fail, Cue::EngineStart]);
    assert_eq!(
        node.outputs().animations,
        vec![Animation::Wrong, Animation::Battery12V]
    );
}

#[test]
fn test_stalled_partial_then_fresh_frame() {
    let (mut node, wire) = toy();
    let t0 = Instant::now();
    let stale = WallStatusPacket::new(0, ALL).encode();
    wire.push(&stale[..5]);
    assert_eq!(node.on_byte_stream_available(t0), 0);

    wire.push(&WallStatusPacket::new(2, ALL).encode());
    assert_eq!(node.on_byte_stream_available(t0 + Duration::from_millis(250)), 1);
    let status = node.aggregate_status();
    assert_eq!(status.outcome, Some(ToyOutcome::Success { battery_id: 2 }));
    assert_eq!(status.receiver.timeouts, 1);
}

#[test]
fn test_reset_stats() {
    let (mut node, wire) = toy();
    wire.push(&[0x01, 0x02, 0x03]);
    node.on_byte_stream_available(Instant::now());
    assert_eq!(node.aggregate_status().receiver.discarded_bytes, 3);
    node.reset_stats();
    assert_eq!(node.aggregate_status().receiver.rx_bytes, 0);
}
