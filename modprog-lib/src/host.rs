//! Host side of the wire protocol, for driving a programmer over a serial
//! port.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::bus::{DataWord, LANE_COUNT};
use crate::error::{Error, Result};
use crate::protocol::Opcode;
use crate::ram::RamTestReport;

/// Baud rate the programmer firmware runs its link at.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default bound on waiting for a response. Erase and the full RAM test
/// are the slowest operations on the wire.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

const IO_CHUNK: usize = 4 * 1024;

/// Chip identifiers: the word read at address 0 (manufacturer) and the word
/// read at address 1 (device).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipIds {
    pub manufacturer: DataWord,
    pub device: DataWord,
}

impl ChipIds {
    /// Manufacturer IDs per chip pair: lanes 0/1 and lanes 2/3, each
    /// little-endian.
    pub fn manufacturer_ids(&self) -> [u16; 2] {
        [
            u16::from_le_bytes([self.manufacturer[0], self.manufacturer[1]]),
            u16::from_le_bytes([self.manufacturer[2], self.manufacturer[3]]),
        ]
    }

    /// Device IDs per chip pair.
    pub fn device_ids(&self) -> [u16; 2] {
        [
            u16::from_le_bytes([self.device[0], self.device[1]]),
            u16::from_le_bytes([self.device[2], self.device[3]]),
        ]
    }
}

/// Open `port_name` configured for the programmer link.
pub fn open_port(port_name: &str, baud: u32) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(port_name, baud)
        .timeout(Duration::from_millis(100))
        .open()?;
    Ok(port)
}

/// Speaks the programmer's command protocol from the host end.
///
/// The link is half-duplex: a new command is only sent once the previous
/// one has fully completed.
pub struct HostClient<S> {
    link: S,
    timeout: Duration,
}

impl<S: Read + Write> HostClient<S> {
    pub fn new(link: S) -> Self {
        Self::with_timeout(link, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(link: S, timeout: Duration) -> Self {
        Self { link, timeout }
    }

    /// Read the manufacturer and device ID words.
    pub fn read_ids(&mut self) -> Result<ChipIds> {
        self.send_opcode(Opcode::ReadIds)?;
        let mut manufacturer: DataWord = [0; LANE_COUNT];
        self.read_exact_deadline(&mut manufacturer, "manufacturer IDs")?;
        let mut device: DataWord = [0; LANE_COUNT];
        self.read_exact_deadline(&mut device, "device IDs")?;
        Ok(ChipIds {
            manufacturer,
            device,
        })
    }

    /// Erase both flash chips and wait for the completion byte.
    pub fn erase(&mut self) -> Result<()> {
        self.send_opcode(Opcode::EraseFlash)?;
        let mut ack = [0u8; 1];
        self.read_exact_deadline(&mut ack, "erase completion")?;
        if ack[0] != 0 {
            return Err(Error::protocol(format!(
                "unexpected erase response 0x{:02x}",
                ack[0]
            )));
        }
        Ok(())
    }

    /// Read `words` words starting at `start`, streaming the raw bytes to
    /// `out` in address order. Returns the number of bytes transferred.
    pub fn read_flash(&mut self, start: u32, words: u32, out: &mut impl Write) -> Result<u64> {
        self.send_opcode(Opcode::ReadFlash)?;
        self.send_range(start, words)?;
        let total = words as u64 * LANE_COUNT as u64;
        let mut remaining = total;
        let mut chunk = [0u8; IO_CHUNK];
        while remaining > 0 {
            let len = chunk.len().min(remaining as usize);
            self.read_exact_deadline(&mut chunk[..len], "flash data")?;
            out.write_all(&chunk[..len])?;
            remaining -= len as u64;
        }
        Ok(total)
    }

    /// Program `words` words starting at `start`, streaming from `data`.
    /// The reader must supply exactly `4 * words` bytes; programming only
    /// clears bits, so the range is normally erased first.
    pub fn write_flash(&mut self, start: u32, words: u32, data: &mut impl Read) -> Result<()> {
        self.send_opcode(Opcode::WriteFlash)?;
        self.send_range(start, words)?;
        let mut remaining = words as u64 * LANE_COUNT as u64;
        let mut chunk = [0u8; IO_CHUNK];
        while remaining > 0 {
            let len = chunk.len().min(remaining as usize);
            data.read_exact(&mut chunk[..len])?;
            self.link.write_all(&chunk[..len])?;
            remaining -= len as u64;
        }
        self.link.flush()?;
        Ok(())
    }

    /// Run the RAM test and fetch the two mismatch tallies.
    pub fn test_ram(&mut self) -> Result<RamTestReport> {
        self.send_opcode(Opcode::TestRam)?;
        let mut bytes = [0u8; 8];
        self.read_exact_deadline(&mut bytes, "RAM test report")?;
        Ok(RamTestReport::from_le_bytes(bytes))
    }

    fn send_opcode(&mut self, op: Opcode) -> Result<()> {
        tracing::debug!("sending {}", op);
        self.link.write_all(&[op.to_byte()])?;
        self.link.flush()?;
        Ok(())
    }

    fn send_range(&mut self, start: u32, words: u32) -> Result<()> {
        self.link.write_all(&start.to_le_bytes())?;
        self.link.write_all(&words.to_le_bytes())?;
        self.link.flush()?;
        Ok(())
    }

    /// Fill `buf`, tolerating the short and timed-out reads a serial port
    /// produces, bounded by the client deadline.
    fn read_exact_deadline(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        let mut offset = 0;
        let mut last_activity = Instant::now();
        while offset < buf.len() {
            match self.link.read(&mut buf[offset..]) {
                Ok(0) => {
                    if last_activity.elapsed() > self.timeout {
                        return Err(Error::timeout(format!("waiting for {}", context)));
                    }
                }
                Ok(n) => {
                    offset += n;
                    last_activity = Instant::now();
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if last_activity.elapsed() > self.timeout {
                        return Err(Error::timeout(format!("waiting for {}", context)));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
