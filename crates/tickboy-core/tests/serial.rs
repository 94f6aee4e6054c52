mod common;

use common::RomBuilder;

/// Sends each byte of `text` over the link port, then spins.
fn printer(text: &[u8]) -> Vec<u8> {
    let mut program = Vec::new();
    for &byte in text {
        program.extend_from_slice(&[0x3E, byte, 0xE0, 0x01, 0x3E, 0x81, 0xE0, 0x02]);
    }
    program.extend_from_slice(&[0x18, 0xFE]);
    program
}

#[test]
fn guest_output_is_collected() {
    let mut gb = RomBuilder::new()
        .program(0x0100, &printer(b"Passed\n"))
        .machine();
    gb.run_frame().unwrap();
    assert_eq!(gb.take_serial(), b"Passed\n");
    gb.run_frame().unwrap();
    assert!(gb.take_serial().is_empty());
}

#[test]
fn unconnected_port_receives_ff() {
    let mut gb = RomBuilder::new().program(0x0100, &printer(b"x")).machine();
    gb.run_frame().unwrap();
    assert_eq!(gb.mmu.read_byte(0xFF01), 0xFF);
    assert_eq!(gb.mmu.read_byte(0xFF02) & 0x80, 0);
    assert_ne!(gb.mmu.interrupts.read_if() & 0x08, 0);
}
