//! Bus sequencing and serial protocol engine for a parallel memory-module
//! programmer/tester.
//!
//! The programmer drives a socket holding paired byte-wide NOR flash and
//! SRAM chips over a shared 21-bit address / 4-lane data bus, and exposes a
//! minimal byte-oriented serial protocol for reading chip IDs, erasing,
//! reading and writing flash, and stress-testing the RAM.
//!
//! [`bus::ModuleBus`] is the seam to the physical pins; everything above it
//! is hardware-independent. [`protocol::CommandServer`] is the device-side
//! command loop, [`host::HostClient`] the host-side counterpart, and
//! [`sim::SimModule`] a behavioral socket model for tests and loopback
//! bring-up.

pub mod bus;
pub mod error;
pub mod flash;
pub mod host;
pub mod protocol;
pub mod ram;
pub mod sim;

pub use bus::{BusDirection, DataWord, ModuleBus};
pub use error::{Error, Result};
pub use flash::{FlashCommand, FlashSequencer};
pub use host::{ChipIds, HostClient};
pub use protocol::{CommandServer, Opcode, ServerConfig};
pub use ram::{PatternGenerator, RamTestReport, RamTester};
pub use sim::SimModule;
