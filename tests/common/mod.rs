//! Fake peripherals shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use jumpstart_link::hal::{
    Animation, ByteSource, ChannelSelector, Cue, CueOutput, IndicatorOutput, IndicatorState,
    PacketSink, TagScanner,
};
use jumpstart_link::tag::{TagKind, TagRecord, TagSighting};
use jumpstart_link::{BusError, WallStatusPacket};

/// Muxes and readers keyed by (mux address, channel)
#[derive(Default)]
pub struct FakeBus {
    pub tags: HashMap<(u8, u8), TagSighting>,
    pub dead_muxes: Vec<u8>,
    pub settle: Duration,
    selected: Option<(u8, u8)>,
}

impl FakeBus {
    pub fn with_dead_muxes(muxes: &[u8]) -> Self {
        Self {
            dead_muxes: muxes.to_vec(),
            ..Self::default()
        }
    }

    pub fn place(&mut self, mux: u8, channel: u8, tag: TagSighting) {
        self.tags.insert((mux, channel), tag);
    }

    pub fn lift(&mut self, mux: u8, channel: u8) {
        self.tags.remove(&(mux, channel));
    }
}

impl ChannelSelector for FakeBus {
    fn probe(&mut self, bus_addr: u8) -> Result<(), BusError> {
        if self.dead_muxes.contains(&bus_addr) {
            return Err(BusError::Nack(bus_addr));
        }
        Ok(())
    }

    fn select_channel(&mut self, bus_addr: u8, channel: u8) -> Result<(), BusError> {
        self.probe(bus_addr)?;
        self.selected = Some((bus_addr, channel));
        Ok(())
    }

    fn disable_channel(&mut self, bus_addr: u8) -> Result<(), BusError> {
        self.probe(bus_addr)?;
        self.selected = None;
        Ok(())
    }

    fn settle_time(&self) -> Duration {
        self.settle
    }
}

impl TagScanner for FakeBus {
    fn init_reader(&mut self, _channel: u8) -> Result<(), BusError> {
        match self.selected {
            Some(_) => Ok(()),
            None => Err(BusError::Device("no channel selected".into())),
        }
    }

    fn scan(&mut self, _channel: u8) -> Result<Option<TagSighting>, BusError> {
        let key = self
            .selected
            .ok_or_else(|| BusError::Device("no channel selected".into()))?;
        Ok(self.tags.get(&key).cloned())
    }
}

pub fn cable_end(uid: u8, kind: TagKind, cable_id: u8) -> TagSighting {
    TagSighting::new(
        &[0x04, uid, 0x5A, 0x3C, 0x81, 0x70, 0x80],
        &TagRecord { kind, cable_id }.encode(),
    )
}

/// Shared in-memory serial line; the wall writes, the toy reads
#[derive(Clone, Default)]
pub struct Wire(pub Rc<RefCell<VecDeque<u8>>>);

impl Wire {
    pub fn push(&self, bytes: &[u8]) {
        self.0.borrow_mut().extend(bytes.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

impl PacketSink for Wire {
    fn transmit(&mut self, packet: &WallStatusPacket) -> Result<(), BusError> {
        self.push(&packet.encode());
        Ok(())
    }
}

impl ByteSource for Wire {
    fn read_available(&mut self, buf: &mut [u8]) -> usize {
        let mut q = self.0.borrow_mut();
        let n = buf.len().min(q.len());
        for (slot, b) in buf.iter_mut().zip(q.drain(..n)) {
            *slot = b;
        }
        n
    }
}

/// Records every packet written
#[derive(Default)]
pub struct SentPackets(pub Vec<WallStatusPacket>);

impl PacketSink for SentPackets {
    fn transmit(&mut self, packet: &WallStatusPacket) -> Result<(), BusError> {
        self.0.push(*packet);
        Ok(())
    }
}

#[derive(Default)]
pub struct Led(pub Vec<IndicatorState>);

impl IndicatorOutput for Led {
    fn set_indicator(&mut self, state: IndicatorState) {
        self.0.push(state);
    }
}

#[derive(Default)]
pub struct ToyOutputs {
    pub cues: Vec<Cue>,
    pub animations: Vec<Animation>,
}

impl CueOutput for ToyOutputs {
    fn play_cue(&mut self, cue: Cue) {
        self.cues.push(cue);
    }

    fn set_animation(&mut self, mode: Animation) {
        self.animations.push(mode);
    }
}
