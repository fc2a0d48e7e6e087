//! Per-terminal tag presence tracking
//!
//! Converts raw "tag visible this scan" observations into a debounced
//! presence state plus the last decoded tag payload.
//!
//! ```text
//!            visible                 debounce elapsed
//!  ABSENT ------------> DETECTED ------------------------> PRESENT
//!    ^                   |   ^  ^                            |  |
//!    |  2 misses         |   |  | UID changed                |  |
//!    +-------------------+   |  +----------------------------+  |
//!    |                       | visible          misses >= N or  |
//!    |  > 2x absence         |                  > absence       |
//!    +------------------- REMOVED <-----------------------------+
//! ```
//!
//! Polarity and tag data are only reported while PRESENT.

use log::{debug, info, warn};
use std::time::Instant;

use crate::config::TimingConfig;
use crate::tag::{TagRecord, TagSighting, TagUid};

/// Presence state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PresenceState {
    Absent,
    Detected,
    Present,
    Removed,
}

impl PresenceState {
    pub fn name(&self) -> &'static str {
        match self {
            PresenceState::Absent => "ABSENT",
            PresenceState::Detected => "DETECTED",
            PresenceState::Present => "PRESENT",
            PresenceState::Removed => "REMOVED",
        }
    }
}

/// Which pole of the battery a terminal is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TerminalRole {
    Positive,
    Negative,
}

impl TerminalRole {
    pub fn name(&self) -> &'static str {
        match self {
            TerminalRole::Positive => "Positive",
            TerminalRole::Negative => "Negative",
        }
    }
}

/// State of one physical terminal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalState {
    pub presence: PresenceState,
    last_tag: Option<TagRecord>,
    polarity_ok: bool,
    pub consecutive_misses: u8,
    pub last_seen_at: Option<Instant>,
    pub first_seen_at: Option<Instant>,
    uid: TagUid,
}

impl TerminalState {
    fn absent() -> Self {
        Self {
            presence: PresenceState::Absent,
            last_tag: None,
            polarity_ok: false,
            consecutive_misses: 0,
            last_seen_at: None,
            first_seen_at: None,
            uid: TagUid::new(),
        }
    }

    /// Decoded tag, only while PRESENT and the payload verified
    pub fn tag(&self) -> Option<&TagRecord> {
        match self.presence {
            PresenceState::Present => self.last_tag.as_ref(),
            _ => None,
        }
    }

    /// Tag orientation matches this terminal; always false unless PRESENT
    pub fn polarity_ok(&self) -> bool {
        self.presence == PresenceState::Present && self.polarity_ok
    }

    pub fn is_present(&self) -> bool {
        self.presence == PresenceState::Present
    }

    pub fn uid(&self) -> &[u8] {
        &self.uid
    }
}

/// Debounced tag tracker for one terminal
#[derive(Debug, Clone)]
pub struct TerminalTracker {
    role: TerminalRole,
    channel: u8,
    timing: TimingConfig,
    state: TerminalState,
    reader_ok: bool,
    payload_errors: u32,
}

impl TerminalTracker {
    pub fn new(role: TerminalRole, channel: u8, timing: TimingConfig) -> Self {
        Self {
            role,
            channel,
            timing,
            state: TerminalState::absent(),
            reader_ok: false,
            payload_errors: 0,
        }
    }

    pub fn role(&self) -> TerminalRole {
        self.role
    }

    /// Mux channel this terminal's reader sits on
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn state(&self) -> &TerminalState {
        &self.state
    }

    pub fn presence(&self) -> PresenceState {
        self.state.presence
    }

    pub fn reader_ok(&self) -> bool {
        self.reader_ok
    }

    pub fn set_reader_ok(&mut self, ok: bool) {
        if self.reader_ok != ok {
            info!(
                "{} terminal (ch {}) reader {}",
                self.role.name(),
                self.channel,
                if ok { "OK" } else { "FAILED" }
            );
        }
        self.reader_ok = ok;
    }

    /// Payload reads discarded due to bad checksum or format
    pub fn payload_errors(&self) -> u32 {
        self.payload_errors
    }

    /// Feed the result of one scan.
    ///
    /// `sighting` is `None` when no tag answered (or the scan failed).
    pub fn update(&mut self, sighting: Option<&TagSighting>, now: Instant) {
        match sighting {
            Some(s) => self.on_visible(s, now),
            None => self.on_miss(now),
        }
    }

    fn on_visible(&mut self, sighting: &TagSighting, now: Instant) {
        self.state.consecutive_misses = 0;
        self.state.last_seen_at = Some(now);

        match self.state.presence {
            PresenceState::Absent | PresenceState::Removed => {
                self.enter_detected(sighting, now);
            }
            PresenceState::Detected => {
                if sighting.uid != self.state.uid {
                    // A different tag replaced the one being debounced
                    self.enter_detected(sighting, now);
                    return;
                }
                let first = self.state.first_seen_at.unwrap_or(now);
                if now.duration_since(first) > self.timing.debounce_window {
                    self.enter_present(sighting);
                }
            }
            PresenceState::Present => {
                if sighting.uid != self.state.uid {
                    debug!(
                        "{} terminal: tag changed {} -> {}",
                        self.role.name(),
                        hex::encode_upper(&self.state.uid),
                        sighting.uid_hex()
                    );
                    self.enter_detected(sighting, now);
                }
            }
        }
    }

    fn on_miss(&mut self, now: Instant) {
        self.state.consecutive_misses = self.state.consecutive_misses.saturating_add(1);
        let since_seen = self
            .state
            .last_seen_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default();

        match self.state.presence {
            PresenceState::Absent => {}
            PresenceState::Detected => {
                if self.state.consecutive_misses >= self.timing.detected_drop_misses {
                    debug!("{} terminal: DETECTED -> ABSENT (noise)", self.role.name());
                    self.reset();
                }
            }
            PresenceState::Present => {
                if self.state.consecutive_misses >= self.timing.presence_threshold
                    || since_seen > self.timing.absence_timeout
                {
                    info!(
                        "{} terminal: PRESENT -> REMOVED after {} misses / {}ms",
                        self.role.name(),
                        self.state.consecutive_misses,
                        since_seen.as_millis()
                    );
                    self.state.presence = PresenceState::Removed;
                    self.state.last_tag = None;
                    self.state.polarity_ok = false;
                }
            }
            PresenceState::Removed => {
                if since_seen > self.timing.removal_confirm() {
                    debug!("{} terminal: REMOVED -> ABSENT", self.role.name());
                    self.reset();
                }
            }
        }
    }

    fn enter_detected(&mut self, sighting: &TagSighting, now: Instant) {
        debug!(
            "{} terminal: {} -> DETECTED uid={}",
            self.role.name(),
            self.state.presence.name(),
            sighting.uid_hex()
        );
        self.state.presence = PresenceState::Detected;
        self.state.first_seen_at = Some(now);
        self.state.uid = sighting.uid.clone();
        self.state.last_tag = None;
        self.state.polarity_ok = false;
    }

    fn enter_present(&mut self, sighting: &TagSighting) {
        self.state.presence = PresenceState::Present;

        match TagRecord::decode(&sighting.payload) {
            Ok(record) => {
                self.state.polarity_ok = record.polarity_matches(self.role == TerminalRole::Positive);
                self.state.last_tag = Some(record);
                info!(
                    "{} terminal: PRESENT uid={} kind={:?} id={} polarity={}",
                    self.role.name(),
                    sighting.uid_hex(),
                    record.kind,
                    record.cable_id,
                    if self.state.polarity_ok { "OK" } else { "WRONG" }
                );
            }
            Err(e) => {
                // Tag is there, just unreadable; keep presence
                self.payload_errors += 1;
                self.state.last_tag = None;
                self.state.polarity_ok = false;
                warn!(
                    "{} terminal: PRESENT uid={} but payload rejected: {}",
                    self.role.name(),
                    sighting.uid_hex(),
                    e
                );
            }
        }
    }

    /// Back to the absent baseline
    pub fn reset(&mut self) {
        self.state = TerminalState::absent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::TagKind;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn timing() -> TimingConfig {
        TimingConfig {
            debounce_window: ms(100),
            absence_timeout: ms(450),
            presence_threshold: 3,
            ..TimingConfig::default()
        }
    }

    fn sighting(uid: u8, kind: TagKind, cable_id: u8) -> TagSighting {
        let payload = TagRecord { kind, cable_id }.encode();
        TagSighting::new(&[0x04, uid, 0x10, 0x20], &payload)
    }

    fn present_tracker(t0: Instant) -> (TerminalTracker, TagSighting) {
        let mut tr = TerminalTracker::new(TerminalRole::Positive, 2, timing());
        let s = sighting(1, TagKind::Positive, 1);
        tr.update(Some(&s), t0);
        tr.update(Some(&s), t0 + ms(50));
        tr.update(Some(&s), t0 + ms(150));
        assert_eq!(tr.presence(), PresenceState::Present);
        (tr, s)
    }

    #[test]
    fn test_absent_to_detected_on_first_sighting() {
        let t0 = Instant::now();
        let mut tr = TerminalTracker::new(TerminalRole::Positive, 2, timing());
        tr.update(Some(&sighting(1, TagKind::Positive, 1)), t0);
        assert_eq!(tr.presence(), PresenceState::Detected);
        assert_eq!(tr.state().first_seen_at, Some(t0));
        assert!(!tr.state().polarity_ok());
    }

    #[test]
    fn test_short_visibility_never_reaches_present() {
        let t0 = Instant::now();
        let mut tr = TerminalTracker::new(TerminalRole::Positive, 2, timing());
        let s = sighting(1, TagKind::Positive, 1);
        tr.update(Some(&s), t0);
        tr.update(Some(&s), t0 + ms(50));
        tr.update(Some(&s), t0 + ms(100)); // exactly the window, not beyond
        assert_eq!(tr.presence(), PresenceState::Detected);
        tr.update(None, t0 + ms(150));
        tr.update(None, t0 + ms(200));
        assert_eq!(tr.presence(), PresenceState::Absent, "2 misses drop a DETECTED tag");
    }

    #[test]
    fn test_debounced_tag_becomes_present_with_payload() {
        let (tr, _) = present_tracker(Instant::now());
        let tag = tr.state().tag().expect("payload decoded");
        assert_eq!(tag.cable_id, 1);
        assert!(tr.state().polarity_ok());
    }

    #[test]
    fn test_wrong_polarity_tag() {
        let t0 = Instant::now();
        let mut tr = TerminalTracker::new(TerminalRole::Negative, 1, timing());
        let s = sighting(1, TagKind::Positive, 1);
        for i in 0..3 {
            tr.update(Some(&s), t0 + ms(60 * i));
        }
        assert!(tr.state().is_present());
        assert!(!tr.state().polarity_ok());
        assert!(tr.state().tag().is_some());
    }

    #[test]
    fn test_bad_payload_keeps_presence() {
        let t0 = Instant::now();
        let mut tr = TerminalTracker::new(TerminalRole::Positive, 2, timing());
        let mut payload = TagRecord { kind: TagKind::Positive, cable_id: 2 }.encode();
        payload[5] ^= 0x01;
        let s = TagSighting::new(&[0x04, 0x01], &payload);
        for i in 0..3 {
            tr.update(Some(&s), t0 + ms(60 * i));
        }
        assert_eq!(tr.presence(), PresenceState::Present);
        assert!(tr.state().tag().is_none());
        assert!(!tr.state().polarity_ok());
        assert_eq!(tr.payload_errors(), 1);

        // Still present on later scans, no re-read
        tr.update(Some(&s), t0 + ms(200));
        assert_eq!(tr.presence(), PresenceState::Present);
        assert_eq!(tr.payload_errors(), 1);
    }

    #[test]
    fn test_single_miss_does_not_remove() {
        let t0 = Instant::now();
        let (mut tr, s) = present_tracker(t0);
        tr.update(None, t0 + ms(200));
        assert_eq!(tr.presence(), PresenceState::Present);
        assert_eq!(tr.state().consecutive_misses, 1);
        tr.update(Some(&s), t0 + ms(250));
        assert_eq!(tr.state().consecutive_misses, 0);
        assert_eq!(tr.state().last_seen_at, Some(t0 + ms(250)));
    }

    #[test]
    fn test_miss_threshold_removes() {
        let t0 = Instant::now();
        let (mut tr, _) = present_tracker(t0);
        tr.update(None, t0 + ms(160));
        tr.update(None, t0 + ms(170));
        assert_eq!(tr.presence(), PresenceState::Present);
        tr.update(None, t0 + ms(180));
        assert_eq!(tr.presence(), PresenceState::Removed);
        assert!(!tr.state().polarity_ok());
        assert!(tr.state().tag().is_none());
    }

    #[test]
    fn test_absence_timeout_removes_before_threshold() {
        let t0 = Instant::now();
        let (mut tr, _) = present_tracker(t0);
        // last seen at t0+150; one miss well past the absence timeout
        tr.update(None, t0 + ms(150 + 451));
        assert_eq!(tr.presence(), PresenceState::Removed);
        assert_eq!(tr.state().consecutive_misses, 1);
    }

    #[test]
    fn test_removed_holds_until_double_absence() {
        let t0 = Instant::now();
        let (mut tr, _) = present_tracker(t0);
        let seen = t0 + ms(150);
        for i in 1..=3 {
            tr.update(None, seen + ms(50 * i));
        }
        assert_eq!(tr.presence(), PresenceState::Removed);

        // Exactly the absence timeout since last sighting: still REMOVED
        tr.update(None, seen + ms(450));
        assert_eq!(tr.presence(), PresenceState::Removed);
        // Exactly 2x: still REMOVED
        tr.update(None, seen + ms(900));
        assert_eq!(tr.presence(), PresenceState::Removed);
        tr.update(None, seen + ms(901));
        assert_eq!(tr.presence(), PresenceState::Absent);
        assert!(tr.state().uid().is_empty());
    }

    #[test]
    fn test_reappearing_tag_restarts_debounce() {
        let t0 = Instant::now();
        let (mut tr, s) = present_tracker(t0);
        for i in 1..=3 {
            tr.update(None, t0 + ms(150 + 50 * i));
        }
        assert_eq!(tr.presence(), PresenceState::Removed);

        let back = t0 + ms(400);
        tr.update(Some(&s), back);
        assert_eq!(tr.presence(), PresenceState::Detected);
        assert_eq!(tr.state().first_seen_at, Some(back));
    }

    #[test]
    fn test_uid_change_while_present_restarts_debounce() {
        let t0 = Instant::now();
        let (mut tr, _) = present_tracker(t0);
        let other = sighting(9, TagKind::Positive, 2);
        tr.update(Some(&other), t0 + ms(200));
        assert_eq!(tr.presence(), PresenceState::Detected);
        assert!(tr.state().tag().is_none());
        assert_eq!(tr.state().uid(), &[0x04, 9, 0x10, 0x20]);

        tr.update(Some(&other), t0 + ms(350));
        assert_eq!(tr.presence(), PresenceState::Present);
        assert_eq!(tr.state().tag().map(|t| t.cable_id), Some(2));
    }

    #[test]
    fn test_polarity_false_unless_present() {
        let t0 = Instant::now();
        let (mut tr, s) = present_tracker(t0);
        let mut now = t0 + ms(150);
        let script: [Option<&TagSighting>; 9] =
            [None, None, None, Some(&s), Some(&s), None, None, None, None];
        for step in script {
            now += ms(60);
            tr.update(step, now);
            if tr.presence() != PresenceState::Present {
                assert!(!tr.state().polarity_ok(), "polarity leaked in {:?}", tr.presence());
                assert!(tr.state().tag().is_none());
            }
        }
    }
}
