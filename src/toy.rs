//! Toy node context
//!
//! Pulls frames off the link, keeps the last state per battery and turns
//! each new aggregate outcome into one cue/animation command.

use log::info;
use std::time::Instant;

use crate::config::TimingConfig;
use crate::dispatch::{PolicyTable, RemoteBatteryState, ToyDispatcher, ToyOutcome};
use crate::framer::{FrameReceiver, ReceiverStats};
use crate::hal::{ByteSource, CueOutput};

/// What the toy knows about the wall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RemoteStatus {
    /// No valid frame received yet
    Unknown,
    Known(RemoteBatteryState),
}

/// Snapshot of the toy node for status display
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ToyStatus {
    pub remote: RemoteStatus,
    pub outcome: Option<ToyOutcome>,
    pub commands_issued: u64,
    pub receiver: ReceiverStats,
}

pub struct ToyNode<S, O> {
    receiver: FrameReceiver,
    dispatcher: ToyDispatcher,
    source: S,
    outputs: O,
}

impl<S, O> ToyNode<S, O>
where
    S: ByteSource,
    O: CueOutput,
{
    pub fn new(timing: &TimingConfig, policy: PolicyTable, source: S, outputs: O) -> Self {
        Self {
            receiver: FrameReceiver::new(timing.inter_byte_timeout),
            dispatcher: ToyDispatcher::new(policy),
            source,
            outputs,
        }
    }

    /// Put the toy into its idle animation
    pub fn start(&mut self) {
        info!("Toy node started, waiting for wall status");
        self.dispatcher.start(&mut self.outputs);
    }

    /// Drain the link and react to every valid frame. Returns frames accepted.
    pub fn on_byte_stream_available(&mut self, now: Instant) -> usize {
        self.receiver.poll(&mut self.source, now, |packet| {
            self.dispatcher.on_packet(packet, &mut self.outputs);
        })
    }

    pub fn aggregate_status(&self) -> ToyStatus {
        ToyStatus {
            remote: match self.dispatcher.remote() {
                Some(r) => RemoteStatus::Known(*r),
                None => RemoteStatus::Unknown,
            },
            outcome: self.dispatcher.outcome(),
            commands_issued: self.dispatcher.commands_issued(),
            receiver: self.receiver.stats().clone(),
        }
    }

    pub fn reset_stats(&mut self) {
        self.receiver.reset_stats();
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn outputs_mut(&mut self) -> &mut O {
        &mut self.outputs
    }
}
