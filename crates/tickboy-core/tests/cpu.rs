mod common;

use common::RomBuilder;
use tickboy_core::{
    GameBoy,
    decoder::{self, CB_PREFIX, Cond, Descriptor, Mnemonic, Target},
    registers::{FLAG_C, FLAG_Z},
};

/// Machine about to execute `program` at 0x0100 with every pointer register
/// aimed at work RAM.
fn primed(program: &[u8], flags: u8) -> GameBoy {
    let mut gb = RomBuilder::new().program(0x0100, program).machine();
    let regs = &mut gb.cpu.regs;
    regs.set_bc(0xC000);
    regs.set_de(0xC000);
    regs.set_hl(0xC000);
    regs.sp = 0xDFF0;
    regs.f = flags;
    gb
}

fn taken(desc: &Descriptor, flags: u8) -> bool {
    let cond = desc.operands.iter().find_map(|op| match op.target {
        Target::Cond(cond) => Some(cond),
        _ => None,
    });
    match cond {
        Some(Cond::NZ) => flags & FLAG_Z == 0,
        Some(Cond::Z) => flags & FLAG_Z != 0,
        Some(Cond::NC) => flags & FLAG_C == 0,
        Some(Cond::C) => flags & FLAG_C != 0,
        None => true,
    }
}

#[test]
fn unprefixed_costs_match_table() {
    let table = decoder::table().unwrap();
    let holes = table.holes();
    for opcode in 0..=255u8 {
        if holes.contains(&opcode) || opcode == CB_PREFIX {
            continue;
        }
        let desc = table.lookup(opcode, false).unwrap();
        if matches!(desc.mnemonic, Mnemonic::Halt | Mnemonic::Stop) {
            continue;
        }
        for flags in [0x00, 0xF0] {
            // Operand bytes 00 C0: a16 = C000, a8 = FF00, e8 = 0.
            let mut gb = primed(&[opcode, 0x00, 0xC0], flags);
            let cycles = gb.step().unwrap();
            let expected = desc.cost(taken(desc, flags));
            assert_eq!(
                cycles * 4,
                expected as u32,
                "opcode {opcode:02X} ({:?}) with F={flags:02X}",
                desc.mnemonic
            );
        }
    }
}

#[test]
fn prefixed_costs_match_table() {
    let table = decoder::table().unwrap();
    for opcode in 0..=255u8 {
        let desc = table.lookup(opcode, true).unwrap();
        let mut gb = primed(&[CB_PREFIX, opcode], 0);
        let cycles = gb.step().unwrap();
        assert_eq!(
            cycles * 4,
            desc.cost(true) as u32,
            "opcode CB {opcode:02X} ({:?})",
            desc.mnemonic
        );
        assert_eq!(gb.cpu.regs.pc, 0x0102);
    }
}

#[test]
fn holes_raise_unknown_opcode() {
    let table = decoder::table().unwrap();
    let holes = table.holes();
    assert_eq!(
        holes,
        [0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD]
    );
    for opcode in holes {
        let mut gb = primed(&[opcode], 0);
        let err = gb.step().unwrap_err();
        assert!(!err.is_guest_hang());
        assert!(
            err.to_string().contains(&format!("{opcode:02X} at 0100")),
            "{err}"
        );
    }
}

#[test]
fn pc_advances_by_instruction_length() {
    let table = decoder::table().unwrap();
    // Straight-line opcodes only: no jumps, calls, returns or restarts.
    for opcode in [0x00, 0x01, 0x06, 0x08, 0x36, 0x3E, 0xC6, 0xE0, 0xEA, 0xF8] {
        let desc = table.lookup(opcode, false).unwrap();
        let mut gb = primed(&[opcode, 0x00, 0xC0], 0);
        gb.step().unwrap();
        assert_eq!(
            gb.cpu.regs.pc,
            0x0100 + desc.bytes as u16,
            "opcode {opcode:02X}"
        );
    }
}

#[test]
fn small_program_computes_sum() {
    // LD A,0 ; LD B,10 ; loop: ADD A,B ; DEC B ; JR NZ,loop ; LD (C000),A ; JR -2
    let program = [
        0x3E, 0x00, 0x06, 0x0A, 0x80, 0x05, 0x20, 0xFC, 0xEA, 0x00, 0xC0, 0x18, 0xFE,
    ];
    let mut gb = primed(&program, 0);
    for _ in 0..64 {
        gb.step().unwrap();
    }
    assert_eq!(gb.cpu.regs.a, 55);
    assert_eq!(gb.mmu.read_byte(0xC000), 55);
    assert_eq!(gb.cpu.regs.pc, 0x010B);
}

#[test]
fn daa_adjusts_bcd_addition() {
    // LD A,$15 ; ADD A,$27 ; DAA
    let mut gb = primed(&[0x3E, 0x15, 0xC6, 0x27, 0x27], 0);
    for _ in 0..3 {
        gb.step().unwrap();
    }
    assert_eq!(gb.cpu.regs.a, 0x42);
    assert_eq!(gb.cpu.regs.f & FLAG_C, 0);
}

#[test]
fn halt_with_nothing_enabled_is_a_guest_hang() {
    // XOR A ; LDH ($FF),A ; HALT
    let mut gb = primed(&[0xAF, 0xE0, 0xFF, 0x76], 0);
    gb.step().unwrap();
    gb.step().unwrap();
    let err = gb.step().unwrap_err();
    assert!(err.is_guest_hang());
}
