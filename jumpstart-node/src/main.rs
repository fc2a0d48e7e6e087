//! Jumper cable exhibit controller for ESP32
//!
//! One image for both boards. The role stored in NVS decides what runs:
//!
//! - **wall**: scans the battery terminals through the I2C muxes and sends
//!   a status frame over RS-485 whenever a battery changes;
//! - **toy**: listens on RS-485 and plays the matching sound and LED
//!   animation.
//!
//! Holding BOOT (GPIO0) during reset flips the stored role.
//!
//! ## Production Features
//! - NVS-based configuration persistence
//! - Watchdog timer for automatic recovery
//! - Panic handler with automatic restart
//! - Degraded operation when some battery hardware is missing

use esp_idf_svc::{
    hal::{
        gpio::{AnyIOPin, OutputPin, PinDriver, Pull},
        i2c::{I2cConfig, I2cDriver},
        prelude::*,
        task::watchdog::{TWDTConfig, TWDTDriver, WatchdogSubscription},
        uart::{config::Config as UartConfig, UartDriver},
        units::Hertz,
    },
    nvs::EspDefaultNvsPartition,
};
use jumpstart_link::{PolicyTable, ToyNode, WallNode};
use log::{error, info, warn};
use std::thread;
use std::time::{Duration, Instant};

mod config;
mod outputs;
mod rs485;
mod tca9548a;
mod wall_bus;
mod ws1850s;

use config::{NodeConfig, NodeRole};
use outputs::{SoundTriggers, StatusLeds, ToyOutputs};
use rs485::Rs485Port;
use wall_bus::WallBus;

/// Watchdog timeout in seconds
const WATCHDOG_TIMEOUT_SECS: u64 = 10;

/// How often the main loop logs a status summary
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Toy receive loop period; well under the inter-byte timeout
const TOY_LOOP_PERIOD: Duration = Duration::from_millis(5);

fn main() -> anyhow::Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();

    // Set up panic handler for automatic restart
    std::panic::set_hook(Box::new(|panic_info| {
        error!("PANIC: {}", panic_info);
        error!("Restarting in 3 seconds...");
        thread::sleep(Duration::from_secs(3));
        unsafe { esp_idf_svc::sys::esp_restart(); }
    }));

    info!("Jumpstart exhibit controller starting");

    let peripherals = Peripherals::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    // Initialize Task Watchdog Timer (TWDT)
    let twdt_config = TWDTConfig {
        duration: Duration::from_secs(WATCHDOG_TIMEOUT_SECS),
        panic_on_trigger: true,
        subscribed_idle_tasks: enumset::EnumSet::empty(),
    };
    let mut twdt_driver = TWDTDriver::new(peripherals.twdt, &twdt_config)?;
    let mut watchdog = twdt_driver.watch_current_task()?;
    info!("Watchdog timer initialized with {}s timeout", WATCHDOG_TIMEOUT_SECS);

    // Load configuration from NVS (falls back to defaults if not configured)
    let mut config = match NodeConfig::load_from_nvs(nvs.clone()) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("Failed to load config from NVS: {}, using defaults", e);
            NodeConfig::default()
        }
    };

    // BOOT held at reset flips the role
    let mut role_btn = PinDriver::input(peripherals.pins.gpio0)?;
    role_btn.set_pull(Pull::Up)?;
    if role_btn.is_low() {
        config.role = config.role.other();
        info!("Role switch requested, now {:?}", config.role);
        if let Err(e) = config.save_to_nvs(nvs.clone()) {
            warn!("Failed to persist role: {}", e);
        }
    }
    drop(role_btn);

    info!("Configuration:");
    info!("  Role: {:?}", config.role);
    info!("  RS-485 baud: {}", config.rs485_baud_rate);
    info!("  Debounce/absence: {}ms/{}ms", config.debounce_ms, config.absence_ms);

    let timing = config.timing();

    // Shared I2C bus: muxes + reader on the wall, LED controller on the toy
    let i2c_config = I2cConfig::new().baudrate(100.kHz().into());
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio21, // SDA
        peripherals.pins.gpio22, // SCL
        &i2c_config,
    )?;

    // RS-485: UART1 + MAX485 DE/RE on GPIO4
    let uart_config = UartConfig::default()
        .baudrate(Hertz(config.rs485_baud_rate))
        .data_bits(esp_idf_svc::hal::uart::config::DataBits::DataBits8)
        .parity_none()
        .stop_bits(esp_idf_svc::hal::uart::config::StopBits::STOP1);
    let uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio17, // TX
        peripherals.pins.gpio16, // RX
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let de = PinDriver::output(peripherals.pins.gpio4.downgrade_output())?;
    let port = Rs485Port::new(uart, de, timing.line_settle)?;
    info!("RS-485 initialized at {} baud", config.rs485_baud_rate);

    match config.role {
        NodeRole::Wall => {
            let green = PinDriver::output(peripherals.pins.gpio25.downgrade_output())?;
            let red = PinDriver::output(peripherals.pins.gpio26.downgrade_output())?;
            let leds = StatusLeds::new(green, red)?;
            let bus = WallBus::new(i2c, config.reader_addr, timing.channel_settle, timing.reader_settle);

            let node = WallNode::new(timing, config.batteries(), bus, port, leds)?;
            run_wall(node, &mut watchdog)
        }
        NodeRole::Toy => {
            let triggers = SoundTriggers {
                sputter: PinDriver::output(peripherals.pins.gpio25.downgrade_output())?,
                engine_start: PinDriver::output(peripherals.pins.gpio26.downgrade_output())?,
                zap: PinDriver::output(peripherals.pins.gpio27.downgrade_output())?,
                fail: PinDriver::output(peripherals.pins.gpio14.downgrade_output())?,
            };
            let outputs = ToyOutputs::new(triggers, i2c, config.led_controller_addr)?;

            let node = ToyNode::new(&timing, PolicyTable::default(), port, outputs);
            run_toy(node, &mut watchdog)
        }
    }
}

type WallNodeHw = WallNode<WallBus<I2cDriver<'static>>, Rs485Port<'static>, StatusLeds>;
type ToyNodeHw = ToyNode<Rs485Port<'static>, ToyOutputs<I2cDriver<'static>>>;

fn run_wall(mut node: WallNodeHw, watchdog: &mut WatchdogSubscription<'_>) -> anyhow::Result<()> {
    if !node.initialize() {
        // Keep scanning anyway; a battery may come back once reseated
        error!("Wall hardware check failed, continuing degraded");
    }

    let mut last_status = Instant::now();
    info!("Entering wall loop");
    loop {
        watchdog.feed()?;

        node.on_poll_tick(Instant::now());

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let status = node.aggregate_status();
            for b in &status.batteries {
                info!(
                    "{:>3}: +{} -{} valid={} mux={} readers={}/{}",
                    b.name,
                    b.positive.name(),
                    b.negative.name(),
                    b.valid,
                    b.health.mux_ok,
                    b.health.positive_reader_ok,
                    b.health.negative_reader_ok
                );
            }
            info!(
                "Indicator {:?}, tx={} tx_err={}",
                status.indicator, status.tx_packets, status.tx_errors
            );
        }

        let wait = node.time_until_due(Instant::now());
        thread::sleep(wait.max(Duration::from_millis(1)));
    }
}

fn run_toy(mut node: ToyNodeHw, watchdog: &mut WatchdogSubscription<'_>) -> anyhow::Result<()> {
    node.start();

    let mut last_status = Instant::now();
    info!("Entering toy loop");
    loop {
        watchdog.feed()?;

        let now = Instant::now();
        node.on_byte_stream_available(now);
        node.outputs_mut().service(now);

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let status = node.aggregate_status();
            let rx = &status.receiver;
            info!(
                "Remote {:?}, outcome {:?}, rx={} ok={} chk_err={} frm_err={} timeouts={}",
                status.remote,
                status.outcome,
                rx.rx_bytes,
                rx.frames_ok,
                rx.checksum_errors,
                rx.framing_errors,
                rx.timeouts
            );
            if node.outputs().led_errors() > 0 {
                warn!("LED controller errors: {}", node.outputs().led_errors());
            }
        }

        thread::sleep(TOY_LOOP_PERIOD);
    }
}
