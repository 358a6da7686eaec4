use modprog_lib::Error;
use modprog_lib::bus::{BusDirection, ModuleBus};
use modprog_lib::flash::FlashSequencer;
use modprog_lib::sim::{SIM_DEVICE_ID, SIM_MANUFACTURER_ID, SimModule};

const FLASH_WORDS: u32 = 0x4000;

fn powered_sim() -> SimModule {
    let mut sim = SimModule::new(FLASH_WORDS, 0x100);
    sim.enable_module();
    sim.select_rom();
    sim
}

#[test]
fn software_id_reads_manufacturer_then_device() {
    let mut sim = powered_sim();
    let (manufacturer, device) = FlashSequencer::new(&mut sim).software_id();
    assert_eq!(manufacturer, [0xBF, 0x00, 0xBF, 0x00]);
    assert_eq!(device, [0x80, 0x27, 0x80, 0x27]);
    assert_eq!(
        u16::from_le_bytes([manufacturer[0], manufacturer[1]]),
        SIM_MANUFACTURER_ID
    );
    assert_eq!(u16::from_le_bytes([device[2], device[3]]), SIM_DEVICE_ID);
}

#[test]
fn program_then_read_back() {
    let mut sim = powered_sim();
    FlashSequencer::new(&mut sim)
        .program_word(0x10, [0x12, 0x34, 0x56, 0x78])
        .unwrap();
    assert_eq!(sim.flash_word(0x10), [0x12, 0x34, 0x56, 0x78]);
    // neighbours untouched
    assert_eq!(sim.flash_word(0x0F), [0xFF; 4]);
    assert_eq!(sim.flash_word(0x11), [0xFF; 4]);
}

#[test]
fn erase_leaves_every_cell_erased() {
    let mut sim = powered_sim();
    FlashSequencer::new(&mut sim)
        .program_word(0x10, [0x12, 0x34, 0x56, 0x78])
        .unwrap();
    FlashSequencer::new(&mut sim).chip_erase().unwrap();
    for addr in [0u32, 0x10, FLASH_WORDS - 1] {
        assert_eq!(sim.flash_word(addr), [0xFF; 4]);
    }
}

#[test]
fn program_only_clears_bits() {
    let mut sim = powered_sim();
    FlashSequencer::new(&mut sim)
        .program_word(0x20, [0xF0, 0xFF, 0x0F, 0xFF])
        .unwrap();
    FlashSequencer::new(&mut sim)
        .program_word(0x20, [0x70, 0x0F, 0x0C, 0xF0])
        .unwrap();
    assert_eq!(sim.flash_word(0x20), [0x70, 0x0F, 0x0C, 0xF0]);
}

#[test]
fn bare_opcodes_without_keys_do_nothing() {
    let mut sim = powered_sim();
    FlashSequencer::new(&mut sim)
        .program_word(0x05, [0x00, 0x11, 0x22, 0x33])
        .unwrap();

    sim.set_direction(BusDirection::Output);
    sim.write_word(0x5555, [0x80; 4]);
    sim.write_word(0x5555, [0x10; 4]);
    sim.set_direction(BusDirection::Input);

    assert_eq!(sim.flash_word(0x05), [0x00, 0x11, 0x22, 0x33]);
}

#[test]
fn exhausted_poll_reports_timeout() {
    let mut sim = powered_sim();
    // one sample can never satisfy the two-sample completion rule
    let err = FlashSequencer::with_poll_limit(&mut sim, 1)
        .chip_erase()
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}
