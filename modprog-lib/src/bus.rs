//! Address/data/control bus shared by the chips in the module socket.
//!
//! The socket carries four byte-wide data lanes behind one 21-bit address
//! bus. Flash command cycles and raw transfers multiplex the same lines;
//! the [`ModuleBus`] trait is the only way other components touch them.

/// Data lanes in the socket, one per byte-wide chip position.
pub const LANE_COUNT: usize = 4;

/// Width of the address bus.
pub const ADDRESS_BITS: u32 = 21;

/// One past the highest addressable word.
pub const ADDRESS_LIMIT: u32 = 1 << ADDRESS_BITS;

/// Mask applied to addresses before they are driven onto the bus.
pub const ADDRESS_MASK: u32 = ADDRESS_LIMIT - 1;

/// Word capacity of the flash pair fitted to current modules.
pub const DEFAULT_FLASH_WORDS: u32 = 512 * 1024;

/// One bus word: four independent byte lanes, sampled and driven together.
pub type DataWord = [u8; LANE_COUNT];

/// Split a 32-bit value across the lanes, lane 0 carrying the low byte.
pub fn word_to_lanes(word: u32) -> DataWord {
    word.to_le_bytes()
}

/// Reassemble a 32-bit value from the lanes.
pub fn lanes_to_word(lanes: DataWord) -> u32 {
    u32::from_le_bytes(lanes)
}

/// Who drives the data lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDirection {
    /// Lanes float and the chips drive them.
    Input,
    /// The controller drives the lanes.
    Output,
}

/// Pin-level access to the module socket.
///
/// An implementation owns the physical address, data and control lines.
/// Callers must respect the ordering documented on each method; a violation
/// is a programming error the bus cannot detect, not a runtime condition.
pub trait ModuleBus {
    /// Drive the full address onto the address bus. No effect on the data
    /// or control lines. Addresses wider than the bus are truncated.
    fn set_address(&mut self, addr: u32);

    /// Switch all data lanes between driven output and floating input.
    /// Must not be called while a strobe is asserted.
    fn set_direction(&mut self, dir: BusDirection);

    fn assert_read(&mut self);
    fn release_read(&mut self);
    fn assert_write(&mut self);
    fn release_write(&mut self);

    fn select_rom(&mut self);
    fn deselect_rom(&mut self);
    fn select_ram(&mut self);
    fn deselect_ram(&mut self);

    /// Energize the socket, settling for the chips' power-up time before
    /// returning.
    fn power_on(&mut self);
    fn power_off(&mut self);

    fn hold_reset(&mut self);
    /// Release reset, settling before returning.
    fn release_reset(&mut self);

    /// Drive all four lanes. Valid only while the direction is
    /// [`BusDirection::Output`].
    fn write_lanes(&mut self, lanes: DataWord);

    /// Sample all four lanes. Valid only while the direction is
    /// [`BusDirection::Input`] and read is asserted.
    fn read_lanes(&mut self) -> DataWord;

    /// One short fixed delay, on the order of the chips' recovery time.
    fn settle(&mut self);

    /// Assert then immediately release write with no intervening bus
    /// change. This is how flash and RAM latch a value.
    fn write_pulse(&mut self) {
        self.assert_write();
        self.release_write();
    }

    /// Latch `lanes` at `addr`. Direction must be `Output`.
    fn write_word(&mut self, addr: u32, lanes: DataWord) {
        self.set_address(addr);
        self.write_lanes(lanes);
        self.write_pulse();
    }

    /// Read the word at `addr`. Direction must be `Input` and no strobe
    /// asserted on entry.
    fn read_word(&mut self, addr: u32) -> DataWord {
        self.set_address(addr);
        self.assert_read();
        let lanes = self.read_lanes();
        self.release_read();
        lanes
    }

    /// Power the socket and bring it to the idle enabled state: selects and
    /// strobes released first, reset released last.
    fn enable_module(&mut self) {
        self.power_on();
        self.deselect_rom();
        self.deselect_ram();
        self.release_read();
        self.release_write();
        self.release_reset();
    }

    /// Return to the safe disabled state: address bus to zero, reset held,
    /// every control line driven to its active level, power removed last.
    fn disable_module(&mut self) {
        self.set_address(0);
        self.hold_reset();
        self.assert_read();
        self.assert_write();
        self.select_rom();
        self.select_ram();
        self.power_off();
    }
}
