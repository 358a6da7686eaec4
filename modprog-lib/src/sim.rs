//! Behavioral simulation of a populated module socket.
//!
//! Models the two 16-bit flash chips (lanes 0/1 and 2/3) with their unlock
//! state machines, software ID mode and in-band busy signalling, plus the
//! SRAM pair. Used by the integration tests and the CLI loopback mode.
//!
//! The simulation asserts the call-ordering rules the real bus can only
//! document: sampling lanes requires input direction with read asserted,
//! driving lanes requires output direction, and direction never changes
//! under an asserted strobe.

use crate::bus::{ADDRESS_MASK, BusDirection, DataWord, LANE_COUNT, ModuleBus};
use crate::flash::{UNLOCK_ADDR_1, UNLOCK_ADDR_2, UNLOCK_KEY_1, UNLOCK_KEY_2};

/// Manufacturer ID the simulated chips report.
pub const SIM_MANUFACTURER_ID: u16 = 0x00BF;
/// Device ID the simulated chips report.
pub const SIM_DEVICE_ID: u16 = 0x2780;

/// Samples a busy chip returns before an erase completes.
const ERASE_BUSY_READS: u32 = 6;
/// Samples a busy chip returns before a byte program completes.
const PROGRAM_BUSY_READS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnlockState {
    Idle,
    Key1,
    Key2,
}

/// One 16-bit flash chip occupying two adjacent lanes. Commands arrive on
/// the low lane; the cell array aliases above the chip's address pins.
struct FlashChip {
    cells: Vec<[u8; 2]>,
    unlock: UnlockState,
    erase_armed: bool,
    program_pending: bool,
    id_mode: bool,
    busy_reads: u32,
    busy_value: [u8; 2],
}

impl FlashChip {
    fn new(words: u32) -> Self {
        Self {
            cells: vec![[0xFF; 2]; words as usize],
            unlock: UnlockState::Idle,
            erase_armed: false,
            program_pending: false,
            id_mode: false,
            busy_reads: 0,
            busy_value: [0; 2],
        }
    }

    fn latch(&mut self, addr: u32, halves: [u8; 2]) {
        if self.busy_reads > 0 {
            // writes are ignored while an operation is in flight
            return;
        }
        if self.program_pending {
            self.program_pending = false;
            self.unlock = UnlockState::Idle;
            let index = addr as usize % self.cells.len();
            let cell = &mut self.cells[index];
            cell[0] &= halves[0];
            cell[1] &= halves[1];
            self.busy_value = [cell[0] ^ 0x80, cell[1]];
            self.busy_reads = PROGRAM_BUSY_READS;
            return;
        }
        let command = halves[0];
        self.unlock = match (self.unlock, addr, command) {
            (UnlockState::Idle, UNLOCK_ADDR_1, UNLOCK_KEY_1) => UnlockState::Key1,
            (UnlockState::Key1, UNLOCK_ADDR_2, UNLOCK_KEY_2) => UnlockState::Key2,
            (UnlockState::Key2, UNLOCK_ADDR_1, opcode) => {
                self.apply_command(opcode);
                UnlockState::Idle
            }
            _ => {
                self.erase_armed = false;
                UnlockState::Idle
            }
        };
    }

    fn apply_command(&mut self, opcode: u8) {
        match opcode {
            0x90 => self.id_mode = true,
            0xF0 => self.id_mode = false,
            0xA0 => self.program_pending = true,
            0x80 => self.erase_armed = true,
            0x10 if self.erase_armed => {
                self.erase_armed = false;
                for cell in &mut self.cells {
                    *cell = [0xFF; 2];
                }
                self.busy_value = [0x00, 0x00];
                self.busy_reads = ERASE_BUSY_READS;
            }
            _ => self.erase_armed = false,
        }
    }

    fn read(&mut self, addr: u32) -> [u8; 2] {
        if self.busy_reads > 0 {
            self.busy_reads -= 1;
            return self.busy_value;
        }
        if self.id_mode {
            return match addr {
                0 => SIM_MANUFACTURER_ID.to_le_bytes(),
                1 => SIM_DEVICE_ID.to_le_bytes(),
                _ => [0xFF; 2],
            };
        }
        self.cells[addr as usize % self.cells.len()]
    }

    fn power_cycle(&mut self) {
        self.unlock = UnlockState::Idle;
        self.erase_armed = false;
        self.program_pending = false;
        self.id_mode = false;
        self.busy_reads = 0;
    }
}

/// In-memory module: flash pair, SRAM pair, and the bus pins in between.
pub struct SimModule {
    flash: [FlashChip; 2],
    sram: Vec<DataWord>,
    powered: bool,
    in_reset: bool,
    direction: BusDirection,
    address: u32,
    driven: DataWord,
    read_asserted: bool,
    write_asserted: bool,
    rom_selected: bool,
    ram_selected: bool,
}

impl SimModule {
    /// A module with `flash_words` of flash and `ram_words` of RAM.
    pub fn new(flash_words: u32, ram_words: u32) -> Self {
        Self {
            flash: [FlashChip::new(flash_words), FlashChip::new(flash_words)],
            sram: vec![[0; LANE_COUNT]; ram_words as usize],
            powered: false,
            in_reset: true,
            direction: BusDirection::Input,
            address: 0,
            driven: [0; LANE_COUNT],
            read_asserted: false,
            write_asserted: false,
            rom_selected: false,
            ram_selected: false,
        }
    }

    /// Flash contents at `addr`, for test inspection.
    pub fn flash_word(&self, addr: u32) -> DataWord {
        let index = addr as usize % self.flash[0].cells.len();
        let low = self.flash[0].cells[index];
        let high = self.flash[1].cells[index];
        [low[0], low[1], high[0], high[1]]
    }

    /// SRAM contents at `addr`, for test inspection.
    pub fn sram_word(&self, addr: u32) -> DataWord {
        self.sram[addr as usize % self.sram.len()]
    }

    /// Flip one bit in one SRAM lane, to fault-inject between fill and
    /// verify.
    pub fn corrupt_sram_lane(&mut self, addr: u32, lane: usize) {
        let index = addr as usize % self.sram.len();
        self.sram[index][lane] ^= 0x01;
    }

    fn latch_current(&mut self) {
        if !self.powered || self.in_reset || self.direction != BusDirection::Output {
            return;
        }
        let addr = self.address;
        let lanes = self.driven;
        if self.rom_selected {
            self.flash[0].latch(addr, [lanes[0], lanes[1]]);
            self.flash[1].latch(addr, [lanes[2], lanes[3]]);
        } else if self.ram_selected {
            let index = addr as usize % self.sram.len();
            self.sram[index] = lanes;
        }
    }
}

impl ModuleBus for SimModule {
    fn set_address(&mut self, addr: u32) {
        self.address = addr & ADDRESS_MASK;
    }

    fn set_direction(&mut self, dir: BusDirection) {
        assert!(
            !self.read_asserted && !self.write_asserted,
            "direction change under an asserted strobe"
        );
        self.direction = dir;
    }

    fn assert_read(&mut self) {
        self.read_asserted = true;
    }

    fn release_read(&mut self) {
        self.read_asserted = false;
    }

    fn assert_write(&mut self) {
        self.write_asserted = true;
    }

    fn release_write(&mut self) {
        // values latch on the strobe's release edge
        if self.write_asserted {
            self.write_asserted = false;
            self.latch_current();
        }
    }

    fn select_rom(&mut self) {
        self.rom_selected = true;
    }

    fn deselect_rom(&mut self) {
        self.rom_selected = false;
    }

    fn select_ram(&mut self) {
        self.ram_selected = true;
    }

    fn deselect_ram(&mut self) {
        self.ram_selected = false;
    }

    fn power_on(&mut self) {
        self.powered = true;
    }

    fn power_off(&mut self) {
        self.powered = false;
        for chip in &mut self.flash {
            chip.power_cycle();
        }
        // SRAM loses its contents without power
        for word in &mut self.sram {
            *word = [0; LANE_COUNT];
        }
    }

    fn hold_reset(&mut self) {
        self.in_reset = true;
    }

    fn release_reset(&mut self) {
        self.in_reset = false;
    }

    fn write_lanes(&mut self, lanes: DataWord) {
        assert!(
            self.direction == BusDirection::Output,
            "write_lanes while the lanes float"
        );
        self.driven = lanes;
    }

    fn read_lanes(&mut self) -> DataWord {
        assert!(
            self.direction == BusDirection::Input,
            "read_lanes while the lanes are driven"
        );
        assert!(self.read_asserted, "read_lanes without the read strobe");
        if !self.powered || self.in_reset {
            return [0xFF; LANE_COUNT];
        }
        if self.rom_selected {
            let addr = self.address;
            let low = self.flash[0].read(addr);
            let high = self.flash[1].read(addr);
            [low[0], low[1], high[0], high[1]]
        } else if self.ram_selected {
            self.sram[self.address as usize % self.sram.len()]
        } else {
            [0xFF; LANE_COUNT]
        }
    }

    fn settle(&mut self) {}
}
