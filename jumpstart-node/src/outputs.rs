//! Lights and sound
//!
//! - Wall: green/red indicator LEDs on two GPIOs.
//! - Toy: a sound board with active-low trigger inputs (one clip per pin) and
//!   the RP2040 LED controller, which takes a one-byte animation command
//!   over I2C.

use embedded_hal::i2c::I2c;
use esp_idf_svc::hal::gpio::{AnyOutputPin, Output, PinDriver};
use jumpstart_link::hal::{Animation, Cue, CueOutput, IndicatorOutput, IndicatorState};
use log::{debug, warn};
use std::time::{Duration, Instant};

use crate::ws1850s::bus_err;

type OutPin = PinDriver<'static, AnyOutputPin, Output>;

/// Sound board trigger inputs need to be held low at least this long
const TRIGGER_PULSE: Duration = Duration::from_millis(150);

pub struct StatusLeds {
    green: OutPin,
    red: OutPin,
}

impl StatusLeds {
    pub fn new(mut green: OutPin, mut red: OutPin) -> anyhow::Result<Self> {
        green.set_low()?;
        red.set_low()?;
        Ok(Self { green, red })
    }
}

impl IndicatorOutput for StatusLeds {
    fn set_indicator(&mut self, state: IndicatorState) {
        let (g, r) = match state {
            IndicatorState::Off => (false, false),
            IndicatorState::Green => (true, false),
            IndicatorState::Red => (false, true),
        };
        let result = self
            .green
            .set_level(g.into())
            .and_then(|_| self.red.set_level(r.into()));
        if let Err(e) = result {
            warn!("Indicator LED write failed: {}", e);
        }
    }
}

/// Trigger pins, one per cue
pub struct SoundTriggers {
    pub sputter: OutPin,
    pub engine_start: OutPin,
    pub zap: OutPin,
    pub fail: OutPin,
}

pub struct ToyOutputs<I> {
    triggers: SoundTriggers,
    active: Option<(Cue, Instant)>,
    i2c: I,
    led_controller_addr: u8,
    led_errors: u32,
}

impl<I: I2c> ToyOutputs<I> {
    pub fn new(mut triggers: SoundTriggers, i2c: I, led_controller_addr: u8) -> anyhow::Result<Self> {
        for pin in [
            &mut triggers.sputter,
            &mut triggers.engine_start,
            &mut triggers.zap,
            &mut triggers.fail,
        ] {
            pin.set_high()?;
        }
        Ok(Self {
            triggers,
            active: None,
            i2c,
            led_controller_addr,
            led_errors: 0,
        })
    }

    pub fn led_errors(&self) -> u32 {
        self.led_errors
    }

    fn pin(&mut self, cue: Cue) -> &mut OutPin {
        match cue {
            Cue::Sputter => &mut self.triggers.sputter,
            Cue::EngineStart => &mut self.triggers.engine_start,
            Cue::Zap => &mut self.triggers.zap,
            Cue::Fail => &mut self.triggers.fail,
        }
    }

    fn release(&mut self, cue: Cue) {
        if let Err(e) = self.pin(cue).set_high() {
            warn!("Sound trigger {:?} release failed: {}", cue, e);
        }
    }

    /// Release a trigger once its pulse has elapsed. Call every loop pass.
    pub fn service(&mut self, now: Instant) {
        if let Some((cue, since)) = self.active {
            if now.saturating_duration_since(since) >= TRIGGER_PULSE {
                self.release(cue);
                self.active = None;
            }
        }
    }
}

impl<I: I2c> CueOutput for ToyOutputs<I> {
    fn play_cue(&mut self, cue: Cue) {
        // A new cue cuts the previous one
        if let Some((prev, _)) = self.active.take() {
            self.release(prev);
        }
        match self.pin(cue).set_low() {
            Ok(()) => {
                debug!("Sound trigger {:?}", cue);
                self.active = Some((cue, Instant::now()));
            }
            Err(e) => warn!("Sound trigger {:?} failed: {}", cue, e),
        }
    }

    fn set_animation(&mut self, mode: Animation) {
        let cmd = mode.command_code();
        if let Err(e) = self
            .i2c
            .write(self.led_controller_addr, &[cmd])
            .map_err(|e| bus_err(self.led_controller_addr, e))
        {
            self.led_errors += 1;
            warn!("LED controller command 0x{:02X} failed: {}", cmd, e);
        } else {
            debug!("LED controller <- 0x{:02X} ({:?})", cmd, mode);
        }
    }
}
