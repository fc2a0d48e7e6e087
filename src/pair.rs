//! Jumper cable pair validation
//!
//! Cable ends are numbered 1..=4. Only the pairings that correspond to a
//! correctly oriented physical cable are accepted across a battery's
//! positive and negative terminals.

use crate::packet::BatteryState;
use crate::tracker::TerminalState;

/// Accepted (positive id, negative id) combinations
pub const VALID_CABLE_PAIRS: [(u8, u8); 4] = [(1, 3), (2, 4), (2, 3), (1, 4)];

/// Whether a positive/negative cable id pairing is accepted
pub fn is_valid_cable_pair(pos_id: u8, neg_id: u8) -> bool {
    VALID_CABLE_PAIRS.contains(&(pos_id, neg_id))
}

/// Full pair check over two terminal states.
///
/// Requires both PRESENT, both polarity OK and an accepted cable id pairing.
pub fn is_valid_pair(positive: &TerminalState, negative: &TerminalState) -> bool {
    if !positive.is_present() || !negative.is_present() {
        return false;
    }
    if !positive.polarity_ok() || !negative.polarity_ok() {
        return false;
    }
    match (positive.tag(), negative.tag()) {
        (Some(pos), Some(neg)) => is_valid_cable_pair(pos.cable_id, neg.cable_id),
        _ => false,
    }
}

/// Projection of two terminals onto the flags carried on the link
pub fn pair_state(positive: &TerminalState, negative: &TerminalState) -> BatteryState {
    BatteryState {
        pos_present: positive.is_present(),
        neg_present: negative.is_present(),
        pos_polarity_ok: positive.polarity_ok(),
        neg_polarity_ok: negative.polarity_ok(),
    }
}
