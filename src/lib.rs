//! Control logic for the jumper cable exhibit
//!
//! Two nodes share one RS-485 link:
//!
//! - the **wall** node reads RFID tags on battery terminals through I2C
//!   muxes, debounces them, validates the cable pairing and sends a status
//!   frame whenever a battery changes;
//! - the **toy** node reassembles those frames from the byte stream and
//!   plays the matching sound and LED animation.
//!
//! Everything here is plain logic over the traits in [`hal`], so it builds
//! and tests on the host. The firmware crate supplies the peripherals.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`packet`] | 8-byte status frame with XOR checksum |
//! | [`tag`] | Tag payload stored on each cable end |
//! | [`tracker`] | Debounced presence state per terminal |
//! | [`pair`] | Accepted cable pairings |
//! | [`battery`] | One battery: mux, two terminals, health |
//! | [`scheduler`] | Round-robin scan timing |
//! | [`framer`] | Byte stream to frame state machine |
//! | [`dispatch`] | Change detection and toy policy |
//! | [`wall`] / [`toy`] | Node contexts driven from the main loop |

pub mod battery;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod framer;
pub mod hal;
pub mod packet;
pub mod pair;
pub mod scheduler;
pub mod tag;
pub mod toy;
pub mod tracker;
pub mod wall;

pub use config::{default_batteries, BatterySpec, TimingConfig};
pub use dispatch::{PolicyTable, RemoteBatteryState, ToyOutcome};
pub use error::{BusError, ConfigError, PacketError, TagError};
pub use packet::{BatteryState, WallStatusPacket};
pub use toy::{ToyNode, ToyStatus};
pub use wall::{WallNode, WallStatus};
