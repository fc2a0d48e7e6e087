//! Node configuration with NVS persistence
//!
//! Both exhibit controllers run the same image; the role and all tunables
//! live in NVS. First boot uses defaults.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use jumpstart_link::config::{default_batteries, BatterySpec, TimingConfig};
use log::{info, warn};
use std::time::Duration;

/// NVS namespace for node configuration
const NVS_NAMESPACE: &str = "jumpstart_cfg";

/// NVS keys for configuration values
mod nvs_keys {
    pub const ROLE: &str = "role";
    pub const BAUD: &str = "rs485_baud";
    pub const DEBOUNCE: &str = "debounce_ms";
    pub const ABSENCE: &str = "absence_ms";
    pub const THRESHOLD: &str = "miss_thresh";
    pub const POLL: &str = "poll_ms";
    pub const BYTE_TIMEOUT: &str = "byte_tmo_ms";
    pub const MUX_6V: &str = "mux_6v";
    pub const MUX_12V: &str = "mux_12v";
    pub const MUX_16V: &str = "mux_16v";
    pub const READER: &str = "reader_addr";
    pub const LED_CTRL: &str = "led_addr";
    pub const CONFIGURED: &str = "configured";
}

/// Which side of the exhibit this board drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Wall,
    Toy,
}

impl NodeRole {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Wall),
            1 => Some(Self::Toy),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Wall => 0,
            Self::Toy => 1,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::Wall => Self::Toy,
            Self::Toy => Self::Wall,
        }
    }
}

/// Node configuration settings
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: NodeRole,

    // RS-485 link
    pub rs485_baud_rate: u32,

    // Tag tracking
    pub debounce_ms: u16,
    pub absence_ms: u16,
    pub presence_threshold: u8,
    pub poll_ms: u16,
    pub inter_byte_timeout_ms: u16,

    // I2C addresses
    pub mux_addrs: [u8; 3],
    pub reader_addr: u8,
    pub led_controller_addr: u8,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let timing = TimingConfig::default();
        Self {
            role: NodeRole::Wall,
            rs485_baud_rate: 9600,
            debounce_ms: timing.debounce_window.as_millis() as u16,
            absence_ms: timing.absence_timeout.as_millis() as u16,
            presence_threshold: timing.presence_threshold,
            poll_ms: timing.poll_interval.as_millis() as u16,
            inter_byte_timeout_ms: timing.inter_byte_timeout.as_millis() as u16,
            mux_addrs: [0x70, 0x71, 0x72],
            reader_addr: 0x28,         // WS1850S
            led_controller_addr: 0x20, // RP2040 animation board
        }
    }
}

impl NodeConfig {
    /// Load configuration from NVS, falling back to defaults if not configured
    pub fn load_from_nvs(nvs_partition: EspNvsPartition<NvsDefault>) -> Result<Self, anyhow::Error> {
        let nvs = match EspNvs::new(nvs_partition, NVS_NAMESPACE, true) {
            Ok(nvs) => nvs,
            Err(e) => {
                warn!("Failed to open NVS namespace, using defaults: {}", e);
                return Ok(Self::default());
            }
        };

        let configured = nvs
            .get_u8(nvs_keys::CONFIGURED)
            .ok()
            .flatten()
            .map(|v| v != 0)
            .unwrap_or(false);

        if !configured {
            info!("No saved configuration found, using defaults");
            return Ok(Self::default());
        }

        let mut config = Self::default();

        if let Ok(Some(role)) = nvs.get_u8(nvs_keys::ROLE) {
            match NodeRole::from_u8(role) {
                Some(r) => config.role = r,
                None => warn!("Ignoring unknown role {} in NVS", role),
            }
        }
        if let Ok(Some(baud)) = nvs.get_u32(nvs_keys::BAUD) {
            config.rs485_baud_rate = baud;
        }

        if let Ok(Some(v)) = nvs.get_u16(nvs_keys::DEBOUNCE) {
            config.debounce_ms = v;
        }
        if let Ok(Some(v)) = nvs.get_u16(nvs_keys::ABSENCE) {
            config.absence_ms = v;
        }
        if let Ok(Some(v)) = nvs.get_u8(nvs_keys::THRESHOLD) {
            config.presence_threshold = v;
        }
        if let Ok(Some(v)) = nvs.get_u16(nvs_keys::POLL) {
            config.poll_ms = v;
        }
        if let Ok(Some(v)) = nvs.get_u16(nvs_keys::BYTE_TIMEOUT) {
            config.inter_byte_timeout_ms = v;
        }

        for (slot, key) in [nvs_keys::MUX_6V, nvs_keys::MUX_12V, nvs_keys::MUX_16V]
            .into_iter()
            .enumerate()
        {
            if let Ok(Some(addr)) = nvs.get_u8(key) {
                config.mux_addrs[slot] = addr;
            }
        }
        if let Ok(Some(addr)) = nvs.get_u8(nvs_keys::READER) {
            config.reader_addr = addr;
        }
        if let Ok(Some(addr)) = nvs.get_u8(nvs_keys::LED_CTRL) {
            config.led_controller_addr = addr;
        }

        info!("Configuration loaded from NVS");
        Ok(config)
    }

    /// Save configuration to NVS
    pub fn save_to_nvs(&self, nvs_partition: EspNvsPartition<NvsDefault>) -> Result<(), anyhow::Error> {
        let mut nvs = EspNvs::new(nvs_partition, NVS_NAMESPACE, true)?;

        info!("Saving configuration to NVS...");

        nvs.set_u8(nvs_keys::ROLE, self.role.as_u8())?;
        nvs.set_u32(nvs_keys::BAUD, self.rs485_baud_rate)?;

        nvs.set_u16(nvs_keys::DEBOUNCE, self.debounce_ms)?;
        nvs.set_u16(nvs_keys::ABSENCE, self.absence_ms)?;
        nvs.set_u8(nvs_keys::THRESHOLD, self.presence_threshold)?;
        nvs.set_u16(nvs_keys::POLL, self.poll_ms)?;
        nvs.set_u16(nvs_keys::BYTE_TIMEOUT, self.inter_byte_timeout_ms)?;

        nvs.set_u8(nvs_keys::MUX_6V, self.mux_addrs[0])?;
        nvs.set_u8(nvs_keys::MUX_12V, self.mux_addrs[1])?;
        nvs.set_u8(nvs_keys::MUX_16V, self.mux_addrs[2])?;
        nvs.set_u8(nvs_keys::READER, self.reader_addr)?;
        nvs.set_u8(nvs_keys::LED_CTRL, self.led_controller_addr)?;

        nvs.set_u8(nvs_keys::CONFIGURED, 1)?;

        info!("Configuration saved to NVS");
        Ok(())
    }

    /// Timing handed to the control logic. Settle times are fixed by the
    /// hardware and not stored.
    pub fn timing(&self) -> TimingConfig {
        TimingConfig {
            debounce_window: Duration::from_millis(self.debounce_ms as u64),
            absence_timeout: Duration::from_millis(self.absence_ms as u64),
            presence_threshold: self.presence_threshold,
            poll_interval: Duration::from_millis(self.poll_ms as u64),
            inter_byte_timeout: Duration::from_millis(self.inter_byte_timeout_ms as u64),
            ..TimingConfig::default()
        }
    }

    /// Battery layout with the configured mux addresses
    pub fn batteries(&self) -> Vec<BatterySpec> {
        default_batteries()
            .into_iter()
            .zip(self.mux_addrs)
            .map(|(spec, mux_addr)| BatterySpec { mux_addr, ..spec })
            .collect()
    }
}
