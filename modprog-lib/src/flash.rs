//! JEDEC command sequences and completion polling for the flash pair.
//!
//! The flash chips accept commands as three-cycle unlock sequences: two
//! fixed key writes followed by one opcode write, all carried on the same
//! bus as ordinary transfers. Erase and program completion is signalled in
//! band on the data lanes, so the sequencer polls for it.

use strum::Display;

use crate::bus::{BusDirection, DataWord, LANE_COUNT, ModuleBus};
use crate::error::{Error, Result};

pub const UNLOCK_ADDR_1: u32 = 0x5555;
pub const UNLOCK_ADDR_2: u32 = 0x2AAA;
pub const UNLOCK_KEY_1: u8 = 0xAA;
pub const UNLOCK_KEY_2: u8 = 0x55;

/// Default bound on completion polling. A full chip erase runs for about
/// 100 ms, several orders of magnitude below this many samples.
pub const DEFAULT_POLL_LIMIT: u32 = 50_000_000;

/// Commands the flash pair understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FlashCommand {
    SoftwareIdEntry,
    ChipErase,
    ByteProgram,
}

impl FlashCommand {
    /// Opcode cycles for the command. Each byte is carried by one complete
    /// unlock sequence; chip erase takes a second full unlock before the
    /// erase-confirm opcode.
    pub fn opcode_cycles(self) -> &'static [u8] {
        match self {
            FlashCommand::SoftwareIdEntry => &[0x90],
            FlashCommand::ChipErase => &[0x80, 0x10],
            FlashCommand::ByteProgram => &[0xA0],
        }
    }
}

/// Builds and issues unlock sequences and polls for completion.
///
/// Borrows the bus for the duration of one flash operation. The sequencer
/// remembers the last lanes it drove; completion polling compares samples
/// against that value.
pub struct FlashSequencer<'a, B: ModuleBus> {
    bus: &'a mut B,
    poll_limit: u32,
    last_driven: DataWord,
}

impl<'a, B: ModuleBus> FlashSequencer<'a, B> {
    pub fn new(bus: &'a mut B) -> Self {
        Self::with_poll_limit(bus, DEFAULT_POLL_LIMIT)
    }

    pub fn with_poll_limit(bus: &'a mut B, poll_limit: u32) -> Self {
        Self {
            bus,
            poll_limit,
            last_driven: [0; LANE_COUNT],
        }
    }

    fn latch(&mut self, addr: u32, lanes: DataWord) {
        self.bus.write_word(addr, lanes);
        self.last_driven = lanes;
    }

    fn key_cycle(&mut self, addr: u32, byte: u8) {
        self.latch(addr, [byte; LANE_COUNT]);
    }

    /// Issue the unlock sequence for `cmd`, one per opcode cycle.
    /// Direction must already be `Output`.
    pub fn issue(&mut self, cmd: FlashCommand) {
        tracing::debug!("flash command: {}", cmd);
        for &opcode in cmd.opcode_cycles() {
            self.key_cycle(UNLOCK_ADDR_1, UNLOCK_KEY_1);
            self.key_cycle(UNLOCK_ADDR_2, UNLOCK_KEY_2);
            self.key_cycle(UNLOCK_ADDR_1, opcode);
        }
    }

    /// Wait for both chips to finish an erase or program.
    ///
    /// The chips report status on bit 7 of their low lane (lanes 0 and 2)
    /// whenever the lanes are sampled during an internal operation. The
    /// poll pulses read and accepts completion once two consecutive samples
    /// show bit 7 flipped relative to the last driven value on both lanes.
    /// Direction must be `Input`. A chip that never responds exhausts the
    /// poll limit and surfaces as [`Error::Timeout`].
    pub fn poll_completion(&mut self) -> Result<()> {
        let driven = self.last_driven;
        let mut flipped = 0u32;
        for _ in 0..self.poll_limit {
            self.bus.assert_read();
            let sample = self.bus.read_lanes();
            self.bus.release_read();
            let done = (sample[0] ^ driven[0]) & (sample[2] ^ driven[2]) & 0x80 != 0;
            if done {
                flipped += 1;
                if flipped == 2 {
                    return Ok(());
                }
            } else {
                flipped = 0;
            }
        }
        Err(Error::timeout("waiting for flash completion"))
    }

    /// Program one word at `addr` and wait for completion, then settle for
    /// the chips' recovery time. Programming only clears bits; erase first
    /// for arbitrary data.
    pub fn program_word(&mut self, addr: u32, lanes: DataWord) -> Result<()> {
        self.bus.set_direction(BusDirection::Output);
        self.issue(FlashCommand::ByteProgram);
        self.latch(addr, lanes);
        self.bus.set_direction(BusDirection::Input);
        self.poll_completion()?;
        self.bus.settle();
        Ok(())
    }

    /// Erase both chips and wait for completion.
    pub fn chip_erase(&mut self) -> Result<()> {
        self.bus.set_direction(BusDirection::Output);
        self.issue(FlashCommand::ChipErase);
        self.bus.set_direction(BusDirection::Input);
        self.poll_completion()
    }

    /// Enter software ID mode and read the manufacturer word (address 0)
    /// and device word (address 1).
    pub fn software_id(&mut self) -> (DataWord, DataWord) {
        self.bus.set_direction(BusDirection::Output);
        self.issue(FlashCommand::SoftwareIdEntry);
        self.bus.set_direction(BusDirection::Input);
        let manufacturer = self.bus.read_word(0);
        let device = self.bus.read_word(1);
        (manufacturer, device)
    }
}
