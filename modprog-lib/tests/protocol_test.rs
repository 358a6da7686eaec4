use std::io::{self, Cursor, Read, Write};

use modprog_lib::protocol::{CommandServer, ServerConfig};
use modprog_lib::sim::SimModule;

/// A pre-recorded host: the server consumes the scripted input and the test
/// inspects everything it transmitted.
struct ScriptedLink {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl ScriptedLink {
    fn new(input: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(input),
            output: Vec::new(),
        }
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn range_header(start: u32, words: u32) -> Vec<u8> {
    let mut header = Vec::new();
    header.extend_from_slice(&start.to_le_bytes());
    header.extend_from_slice(&words.to_le_bytes());
    header
}

fn run_script(input: Vec<u8>) -> (SimModule, Vec<u8>) {
    let sim = SimModule::new(0x4000, 0x100);
    let config = ServerConfig {
        ram_test_words: 0x100,
        poll_limit: 100_000,
    };
    let mut server = CommandServer::with_config(sim, ScriptedLink::new(input), config);
    server.run().unwrap();
    let (sim, link) = server.into_parts();
    (sim, link.output)
}

#[test]
fn unknown_bytes_are_ignored_without_response() {
    let (_, output) = run_script(vec![0x00, b'x', b'Z', 0xFF]);
    assert!(output.is_empty());
}

#[test]
fn read_ids_transmits_eight_bytes() {
    let (_, output) = run_script(vec![b'i']);
    assert_eq!(output.len(), 8);
    // manufacturer word first, device word second
    assert_eq!(&output[0..4], [0xBF, 0x00, 0xBF, 0x00]);
    assert_eq!(&output[4..8], [0x80, 0x27, 0x80, 0x27]);
}

#[test]
fn erase_acknowledges_with_a_zero_byte() {
    let mut script = vec![b'w'];
    script.extend_from_slice(&range_header(0, 1));
    script.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    script.push(b'e');

    let (sim, output) = run_script(script);
    assert_eq!(output, vec![0x00]);
    assert_eq!(sim.flash_word(0), [0xFF; 4]);
}

#[test]
fn write_then_read_round_trip() {
    let payload: [u8; 16] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        0x00,
    ];
    let mut script = vec![b'w'];
    script.extend_from_slice(&range_header(0x1000, 4));
    script.extend_from_slice(&payload);
    script.push(b'r');
    script.extend_from_slice(&range_header(0x1000, 4));

    let (_, output) = run_script(script);
    assert_eq!(output, payload);
}

#[test]
fn out_of_range_reads_wrap_and_keep_the_length() {
    let mut script = vec![b'r'];
    // two words below the address limit, four words requested
    script.extend_from_slice(&range_header((1 << 21) - 2, 4));

    let (_, output) = run_script(script);
    assert_eq!(output.len(), 16);
    assert!(output.iter().all(|&b| b == 0xFF));
}

#[test]
fn ram_test_reports_two_zero_tallies() {
    let (_, output) = run_script(vec![b't']);
    assert_eq!(output, vec![0; 8]);
}

#[test]
fn truncated_payload_is_a_protocol_error() {
    let sim = SimModule::new(0x100, 0x10);
    let link = ScriptedLink::new(vec![b'r', 0x00, 0x00]);
    let mut server = CommandServer::new(sim, link);
    assert!(server.run().is_err());
}
