//! WS1850S RFID reader over I2C
//!
//! The WS1850S is register compatible with the MFRC522. Only what the
//! exhibit needs is implemented: wake a single ISO 14443-A tag, resolve its
//! UID (up to three cascade levels) and read four pages of user memory.
//!
//! A collision on the anticollision loop is reported as a device fault; only
//! one tag sits on a terminal at a time.

use embedded_hal::i2c::{ErrorKind, I2c};
use jumpstart_link::tag::{crc_a, TagUid, TAG_START_READ_PAGE};
use jumpstart_link::BusError;
use log::{debug, trace};
use std::thread;
use std::time::{Duration, Instant};

// PCD registers
const COMMAND_REG: u8 = 0x01;
const COM_IRQ_REG: u8 = 0x04;
const ERROR_REG: u8 = 0x06;
const FIFO_DATA_REG: u8 = 0x09;
const FIFO_LEVEL_REG: u8 = 0x0A;
const CONTROL_REG: u8 = 0x0C;
const BIT_FRAMING_REG: u8 = 0x0D;
const COLL_REG: u8 = 0x0E;
const MODE_REG: u8 = 0x11;
const TX_MODE_REG: u8 = 0x12;
const RX_MODE_REG: u8 = 0x13;
const TX_CONTROL_REG: u8 = 0x14;
const TX_ASK_REG: u8 = 0x15;
const MOD_WIDTH_REG: u8 = 0x24;
const T_MODE_REG: u8 = 0x2A;
const T_PRESCALER_REG: u8 = 0x2B;
const T_RELOAD_REG_H: u8 = 0x2C;
const T_RELOAD_REG_L: u8 = 0x2D;
const VERSION_REG: u8 = 0x37;

// PCD commands
const PCD_IDLE: u8 = 0x00;
const PCD_TRANSCEIVE: u8 = 0x0C;
const PCD_SOFT_RESET: u8 = 0x0F;

// PICC commands
const PICC_REQA: u8 = 0x26;
const PICC_READ: u8 = 0x30;
const PICC_HLTA: u8 = 0x50;
const PICC_SEL_CL: [u8; 3] = [0x93, 0x95, 0x97];
const PICC_CASCADE_TAG: u8 = 0x88;

// ComIrqReg bits
const IRQ_RX: u8 = 0x20;
const IRQ_IDLE: u8 = 0x10;
const IRQ_TIMER: u8 = 0x01;

// ErrorReg: BufferOvfl | ParityErr | ProtocolErr
const ERR_FATAL: u8 = 0x13;
const ERR_COLL: u8 = 0x08;

/// Longest wait for a transceive; the chip timer fires at 25 ms
const TRANSCEIVE_DEADLINE: Duration = Duration::from_millis(40);
const RESET_SETTLE: Duration = Duration::from_millis(50);

/// Result of one transceive
enum Reply {
    Data(heapless::Vec<u8, 18>),
    /// Chip timer expired: no tag answered
    Silent,
}

pub struct Ws1850s {
    addr: u8,
}

impl Ws1850s {
    pub fn new(addr: u8) -> Self {
        Self { addr }
    }

    fn write_reg<I: I2c>(&self, i2c: &mut I, reg: u8, value: u8) -> Result<(), BusError> {
        i2c.write(self.addr, &[reg, value]).map_err(|e| bus_err(self.addr, e))
    }

    fn read_reg<I: I2c>(&self, i2c: &mut I, reg: u8) -> Result<u8, BusError> {
        let mut buf = [0u8];
        i2c.write_read(self.addr, &[reg], &mut buf)
            .map_err(|e| bus_err(self.addr, e))?;
        Ok(buf[0])
    }

    fn set_bits<I: I2c>(&self, i2c: &mut I, reg: u8, mask: u8) -> Result<(), BusError> {
        let v = self.read_reg(i2c, reg)?;
        self.write_reg(i2c, reg, v | mask)
    }

    /// Soft reset and configure for ISO 14443-A at 106 kbit/s
    pub fn init<I: I2c>(&self, i2c: &mut I) -> Result<(), BusError> {
        self.write_reg(i2c, COMMAND_REG, PCD_SOFT_RESET)?;
        thread::sleep(RESET_SETTLE);

        self.write_reg(i2c, TX_MODE_REG, 0x00)?;
        self.write_reg(i2c, RX_MODE_REG, 0x00)?;
        self.write_reg(i2c, MOD_WIDTH_REG, 0x26)?;

        // Timer: auto start, f = 40 kHz, reload 1000 -> 25 ms
        self.write_reg(i2c, T_MODE_REG, 0x80)?;
        self.write_reg(i2c, T_PRESCALER_REG, 0xA9)?;
        self.write_reg(i2c, T_RELOAD_REG_H, 0x03)?;
        self.write_reg(i2c, T_RELOAD_REG_L, 0xE8)?;

        self.write_reg(i2c, TX_ASK_REG, 0x40)?; // 100% ASK
        self.write_reg(i2c, MODE_REG, 0x3D)?; // CRC preset 0x6363

        // Antenna on
        self.set_bits(i2c, TX_CONTROL_REG, 0x03)?;

        let version = self.read_reg(i2c, VERSION_REG)?;
        debug!("WS1850S @0x{:02X} version 0x{:02X}", self.addr, version);
        Ok(())
    }

    fn transceive<I: I2c>(&self, i2c: &mut I, data: &[u8], tx_last_bits: u8) -> Result<Reply, BusError> {
        self.write_reg(i2c, COMMAND_REG, PCD_IDLE)?;
        self.write_reg(i2c, COM_IRQ_REG, 0x7F)?;
        self.write_reg(i2c, FIFO_LEVEL_REG, 0x80)?; // flush
        for &b in data {
            self.write_reg(i2c, FIFO_DATA_REG, b)?;
        }
        self.write_reg(i2c, BIT_FRAMING_REG, tx_last_bits)?;
        self.write_reg(i2c, COMMAND_REG, PCD_TRANSCEIVE)?;
        self.set_bits(i2c, BIT_FRAMING_REG, 0x80)?; // StartSend

        let started = Instant::now();
        loop {
            let irq = self.read_reg(i2c, COM_IRQ_REG)?;
            if irq & (IRQ_RX | IRQ_IDLE) != 0 {
                break;
            }
            if irq & IRQ_TIMER != 0 {
                return Ok(Reply::Silent);
            }
            if started.elapsed() > TRANSCEIVE_DEADLINE {
                return Err(BusError::Timeout);
            }
        }

        let err = self.read_reg(i2c, ERROR_REG)?;
        if err & ERR_FATAL != 0 {
            return Err(BusError::Device(format!("reader error 0x{:02X}", err)));
        }
        if err & ERR_COLL != 0 {
            let coll = self.read_reg(i2c, COLL_REG)?;
            return Err(BusError::Device(format!("tag collision 0x{:02X}", coll)));
        }

        let level = self.read_reg(i2c, FIFO_LEVEL_REG)? as usize;
        let mut out = heapless::Vec::new();
        for _ in 0..level.min(18) {
            let b = self.read_reg(i2c, FIFO_DATA_REG)?;
            let _ = out.push(b);
        }
        let last_bits = self.read_reg(i2c, CONTROL_REG)? & 0x07;
        trace!("WS1850S rx {} bytes (last bits {}): {:02X?}", out.len(), last_bits, out);
        Ok(Reply::Data(out))
    }

    /// REQA; returns false if nothing answered
    fn request<I: I2c>(&self, i2c: &mut I) -> Result<bool, BusError> {
        match self.transceive(i2c, &[PICC_REQA], 0x07)? {
            Reply::Data(atqa) if atqa.len() == 2 => Ok(true),
            Reply::Data(atqa) => Err(BusError::Device(format!("bad ATQA length {}", atqa.len()))),
            Reply::Silent => Ok(false),
        }
    }

    /// Anticollision and select through every cascade level
    fn select<I: I2c>(&self, i2c: &mut I) -> Result<Option<TagUid>, BusError> {
        let mut uid = TagUid::new();

        for sel in PICC_SEL_CL {
            let part = match self.transceive(i2c, &[sel, 0x20], 0x00)? {
                Reply::Data(d) if d.len() == 5 => d,
                Reply::Data(d) => return Err(BusError::Device(format!("bad UID CLn length {}", d.len()))),
                Reply::Silent => return Ok(None),
            };
            let bcc = part[0] ^ part[1] ^ part[2] ^ part[3];
            if bcc != part[4] {
                return Err(BusError::Device("UID BCC mismatch".into()));
            }

            let mut frame = [sel, 0x70, part[0], part[1], part[2], part[3], part[4], 0, 0];
            let crc = crc_a(&frame[..7]);
            frame[7..].copy_from_slice(&crc);
            let sak = match self.transceive(i2c, &frame, 0x00)? {
                Reply::Data(d) if !d.is_empty() => d[0],
                Reply::Data(_) => return Err(BusError::Device("empty SAK".into())),
                Reply::Silent => return Ok(None),
            };

            let cascaded = part[0] == PICC_CASCADE_TAG;
            let bytes = if cascaded { &part[1..4] } else { &part[0..4] };
            for &b in bytes {
                let _ = uid.push(b);
            }
            if sak & 0x04 == 0 {
                return Ok(Some(uid));
            }
        }
        Err(BusError::Device("UID incomplete after cascade level 3".into()))
    }

    /// Read 16 bytes starting at `page`
    fn read_pages<I: I2c>(&self, i2c: &mut I, page: u8) -> Result<heapless::Vec<u8, 16>, BusError> {
        let mut cmd = [PICC_READ, page, 0, 0];
        let crc = crc_a(&cmd[..2]);
        cmd[2..].copy_from_slice(&crc);
        match self.transceive(i2c, &cmd, 0x00)? {
            Reply::Data(d) if d.len() == 18 => {
                if crc_a(&d[..16]) != [d[16], d[17]] {
                    return Err(BusError::Device("page read CRC mismatch".into()));
                }
                let mut out = heapless::Vec::new();
                let _ = out.extend_from_slice(&d[..16]);
                Ok(out)
            }
            Reply::Data(d) => Err(BusError::Device(format!("short page read {}", d.len()))),
            Reply::Silent => Err(BusError::Timeout),
        }
    }

    fn halt<I: I2c>(&self, i2c: &mut I) -> Result<(), BusError> {
        let mut cmd = [PICC_HLTA, 0x00, 0, 0];
        let crc = crc_a(&cmd[..2]);
        cmd[2..].copy_from_slice(&crc);
        // A halted tag does not answer; silence is success
        self.transceive(i2c, &cmd, 0x00).map(|_| ())
    }

    /// Look for a tag. On a hit returns its UID and the payload pages.
    ///
    /// A tag that answers REQA but drops out before the page read returns an
    /// empty payload; the tracker will reject it.
    pub fn scan<I: I2c>(
        &self,
        i2c: &mut I,
    ) -> Result<Option<(TagUid, heapless::Vec<u8, 16>)>, BusError> {
        if !self.request(i2c)? {
            return Ok(None);
        }
        let Some(uid) = self.select(i2c)? else {
            return Ok(None);
        };

        let payload = match self.read_pages(i2c, TAG_START_READ_PAGE) {
            Ok(p) => p,
            Err(e) => {
                debug!("Tag page read failed: {}", e);
                heapless::Vec::new()
            }
        };
        if let Err(e) = self.halt(i2c) {
            trace!("HLTA: {}", e);
        }
        Ok(Some((uid, payload)))
    }
}

pub fn bus_err<E: embedded_hal::i2c::Error>(addr: u8, e: E) -> BusError {
    match e.kind() {
        ErrorKind::NoAcknowledge(_) => BusError::Nack(addr),
        other => BusError::Device(format!("{:?}", other)),
    }
}
