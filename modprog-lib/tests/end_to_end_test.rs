use std::io::Cursor;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use modprog_lib::host::HostClient;
use modprog_lib::protocol::{CommandServer, ServerConfig};
use modprog_lib::sim::{SIM_DEVICE_ID, SIM_MANUFACTURER_ID, SimModule};

const FLASH_WORDS: u32 = 0x2000;
const RAM_WORDS: u32 = 0x400;

/// Server on its own thread, client on ours, a real duplex byte stream in
/// between.
fn spawn_programmer() -> (HostClient<TcpStream>, thread::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let sim = SimModule::new(FLASH_WORDS, RAM_WORDS);
        let config = ServerConfig {
            ram_test_words: RAM_WORDS,
            poll_limit: 100_000,
        };
        let mut server = CommandServer::with_config(sim, stream, config);
        server.run().unwrap();
    });
    let stream = TcpStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let client = HostClient::with_timeout(stream, Duration::from_secs(10));
    (client, handle)
}

#[test]
fn write_then_read_back_reproduces_the_bytes() {
    let (mut client, handle) = spawn_programmer();
    let payload: [u8; 16] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        0x00,
    ];

    client
        .write_flash(0x1000, 4, &mut Cursor::new(payload))
        .unwrap();
    let mut readback = Vec::new();
    client.read_flash(0x1000, 4, &mut readback).unwrap();
    assert_eq!(readback, payload);

    drop(client);
    handle.join().unwrap();
}

#[test]
fn erase_restores_the_erased_state() {
    let (mut client, handle) = spawn_programmer();

    client
        .write_flash(0, 2, &mut Cursor::new(vec![0x00; 8]))
        .unwrap();
    client.erase().unwrap();
    let mut readback = Vec::new();
    client.read_flash(0, 2, &mut readback).unwrap();
    assert!(readback.iter().all(|&b| b == 0xFF));

    drop(client);
    handle.join().unwrap();
}

#[test]
fn chip_ids_come_back_in_order() {
    let (mut client, handle) = spawn_programmer();

    let ids = client.read_ids().unwrap();
    assert_eq!(ids.manufacturer_ids(), [SIM_MANUFACTURER_ID; 2]);
    assert_eq!(ids.device_ids(), [SIM_DEVICE_ID; 2]);

    drop(client);
    handle.join().unwrap();
}

#[test]
fn ram_test_reports_clean_on_good_ram() {
    let (mut client, handle) = spawn_programmer();

    let report = client.test_ram().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.errors_pair0, 0);
    assert_eq!(report.errors_pair1, 0);

    drop(client);
    handle.join().unwrap();
}
