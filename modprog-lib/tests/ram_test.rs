use modprog_lib::bus::ModuleBus;
use modprog_lib::ram::{PatternGenerator, RamTestReport, RamTester};
use modprog_lib::sim::SimModule;

const TEST_WORDS: u32 = 0x800;

#[test]
fn pattern_is_deterministic_and_restartable() {
    let mut first = PatternGenerator::new();
    let mut second = PatternGenerator::new();
    let a: Vec<u32> = (0..1000).map(|_| first.next_word()).collect();
    let b: Vec<u32> = (0..1000).map(|_| second.next_word()).collect();
    assert_eq!(a, b);
    assert_eq!(a[0], 123_456_789);
    assert_eq!(a[1], 123_456_789u32.wrapping_add(2_654_435_769));
}

#[test]
fn fill_then_verify_is_clean() {
    let mut sim = SimModule::new(0x100, TEST_WORDS);
    sim.enable_module();
    sim.select_ram();
    let report = RamTester::new(&mut sim).run(TEST_WORDS);
    assert!(report.is_clean());
    sim.disable_module();
}

#[test]
fn corruption_is_counted_per_chip_pair() {
    let mut sim = SimModule::new(0x100, TEST_WORDS);
    sim.enable_module();
    sim.select_ram();
    RamTester::new(&mut sim).fill(TEST_WORDS);

    sim.corrupt_sram_lane(3, 0);
    sim.corrupt_sram_lane(5, 1);
    sim.corrupt_sram_lane(9, 2);

    let report = RamTester::new(&mut sim).verify(TEST_WORDS);
    assert_eq!(report.errors_pair0, 2);
    assert_eq!(report.errors_pair1, 1);
}

#[test]
fn report_wire_layout_is_little_endian_pair0_first() {
    let report = RamTestReport {
        errors_pair0: 0x0102_0304,
        errors_pair1: 5,
    };
    let bytes = report.to_le_bytes();
    assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01, 0x05, 0x00, 0x00, 0x00]);
    assert_eq!(RamTestReport::from_le_bytes(bytes), report);
}
