//! Device side of the serial link: command framing and dispatch.
//!
//! The loop is single-threaded, blocking and half-duplex. One opcode byte
//! is read, the matching operation runs to completion, and only then is the
//! next opcode read. There is no acknowledgement, error reporting or
//! resynchronization on the wire; unknown bytes are ignored.

use std::io::{ErrorKind, Read, Write};

use strum::Display;

use crate::bus::{ADDRESS_MASK, BusDirection, DataWord, LANE_COUNT, ModuleBus};
use crate::error::{Error, Result};
use crate::flash::{DEFAULT_POLL_LIMIT, FlashSequencer};
use crate::ram::{RAM_TEST_WORDS, RamTester};

/// Wire opcodes. Anything else on the link is silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Opcode {
    ReadIds,
    EraseFlash,
    ReadFlash,
    WriteFlash,
    TestRam,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'i' => Some(Self::ReadIds),
            b'e' => Some(Self::EraseFlash),
            b'r' => Some(Self::ReadFlash),
            b'w' => Some(Self::WriteFlash),
            b't' => Some(Self::TestRam),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::ReadIds => b'i',
            Self::EraseFlash => b'e',
            Self::ReadFlash => b'r',
            Self::WriteFlash => b'w',
            Self::TestRam => b't',
        }
    }
}

/// Knobs for the command loop.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Words covered by one RAM test.
    pub ram_test_words: u32,
    /// Bound on flash completion polling.
    pub poll_limit: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ram_test_words: RAM_TEST_WORDS,
            poll_limit: DEFAULT_POLL_LIMIT,
        }
    }
}

/// The device-side command loop.
///
/// Owns the bus and the serial link for its whole lifetime; only one
/// operation ever executes at a time, so the loop itself is the mutual
/// exclusion.
pub struct CommandServer<B, S> {
    bus: B,
    link: S,
    config: ServerConfig,
}

impl<B: ModuleBus, S: Read + Write> CommandServer<B, S> {
    pub fn new(bus: B, link: S) -> Self {
        Self::with_config(bus, link, ServerConfig::default())
    }

    pub fn with_config(bus: B, link: S, config: ServerConfig) -> Self {
        Self { bus, link, config }
    }

    /// Give the bus and link back, e.g. to inspect simulated chip state.
    pub fn into_parts(self) -> (B, S) {
        (self.bus, self.link)
    }

    /// Serve commands until the link reaches end of input.
    pub fn run(&mut self) -> Result<()> {
        while self.serve_one()? {}
        Ok(())
    }

    /// Block for one opcode byte and execute it. Returns `false` once the
    /// link is exhausted.
    pub fn serve_one(&mut self) -> Result<bool> {
        let mut byte = [0u8; 1];
        if !self.read_link(&mut byte)? {
            return Ok(false);
        }
        match Opcode::from_byte(byte[0]) {
            Some(op) => {
                tracing::debug!("dispatching {}", op);
                self.dispatch(op)?;
            }
            None => tracing::debug!("ignoring byte 0x{:02x}", byte[0]),
        }
        Ok(true)
    }

    fn dispatch(&mut self, op: Opcode) -> Result<()> {
        match op {
            Opcode::ReadIds => self.read_ids(),
            Opcode::EraseFlash => self.erase_flash(),
            Opcode::ReadFlash => self.read_flash(),
            Opcode::WriteFlash => self.write_flash(),
            Opcode::TestRam => self.test_ram(),
        }
    }

    /// Fill `buf` from the link, riding out the short and timed-out reads a
    /// serial port produces. Returns `false` on end of input.
    fn read_link(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut offset = 0;
        while offset < buf.len() {
            match self.link.read(&mut buf[offset..]) {
                Ok(0) => return Ok(false),
                Ok(n) => offset += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    /// Like [`read_link`](Self::read_link), for payload bytes that must
    /// arrive once a command has started.
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.read_link(buf)? {
            return Err(Error::protocol("link closed mid-command"));
        }
        Ok(())
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_payload(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Run `body` with the module enabled, disabling it again on every exit
    /// path.
    fn with_module<T>(&mut self, body: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.bus.enable_module();
        let result = body(self);
        self.bus.disable_module();
        result
    }

    fn read_ids(&mut self) -> Result<()> {
        self.with_module(|srv| {
            srv.bus.select_rom();
            let (manufacturer, device) = FlashSequencer::new(&mut srv.bus).software_id();
            srv.link.write_all(&manufacturer)?;
            srv.link.write_all(&device)?;
            srv.link.flush()?;
            Ok(())
        })
    }

    fn erase_flash(&mut self) -> Result<()> {
        let poll_limit = self.config.poll_limit;
        self.with_module(move |srv| {
            srv.bus.select_rom();
            FlashSequencer::with_poll_limit(&mut srv.bus, poll_limit).chip_erase()?;
            // a single zero byte signals completion
            srv.link.write_all(&[0u8])?;
            srv.link.flush()?;
            Ok(())
        })
    }

    fn read_flash(&mut self) -> Result<()> {
        let start = self.read_u32_le()?;
        let words = self.read_u32_le()?;
        self.with_module(move |srv| {
            srv.bus.select_rom();
            srv.bus.set_direction(BusDirection::Input);
            for offset in 0..words {
                let addr = start.wrapping_add(offset) & ADDRESS_MASK;
                let lanes = srv.bus.read_word(addr);
                srv.link.write_all(&lanes)?;
            }
            srv.link.flush()?;
            Ok(())
        })
    }

    fn write_flash(&mut self) -> Result<()> {
        let start = self.read_u32_le()?;
        let words = self.read_u32_le()?;
        let poll_limit = self.config.poll_limit;
        self.with_module(move |srv| {
            srv.bus.select_rom();
            for offset in 0..words {
                let addr = start.wrapping_add(offset) & ADDRESS_MASK;
                let mut lanes: DataWord = [0; LANE_COUNT];
                srv.read_payload(&mut lanes)?;
                FlashSequencer::with_poll_limit(&mut srv.bus, poll_limit)
                    .program_word(addr, lanes)?;
            }
            Ok(())
        })
    }

    fn test_ram(&mut self) -> Result<()> {
        let words = self.config.ram_test_words;
        self.with_module(move |srv| {
            srv.bus.select_ram();
            let report = RamTester::new(&mut srv.bus).run(words);
            tracing::debug!("ram test: {:?}", report);
            srv.link.write_all(&report.to_le_bytes())?;
            srv.link.flush()?;
            Ok(())
        })
    }
}
