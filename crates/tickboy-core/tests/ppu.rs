mod common;

use common::RomBuilder;
use tickboy_core::{
    GameBoy,
    ppu::{DMG_PALETTE, Mode},
};

/// Turns the LCD off, fills tile 0 with color 3, turns it back on and spins.
const FILL_TILE_ZERO: [u8; 21] = [
    0xAF, // XOR A
    0xE0, 0x40, // LDH ($40),A
    0x21, 0x00, 0x80, // LD HL,$8000
    0x0E, 0x10, // LD C,16
    0x3E, 0xFF, // LD A,$FF
    0x22, // loop: LD (HL+),A
    0x0D, // DEC C
    0x20, 0xFC, // JR NZ,loop
    0x3E, 0x91, // LD A,$91
    0xE0, 0x40, // LDH ($40),A
    0x18, 0xFE, // JR -2
    0x00,
];

fn filled_machine() -> GameBoy {
    RomBuilder::new().program(0x0100, &FILL_TILE_ZERO).machine()
}

#[test]
fn blank_vram_renders_color_zero() {
    let mut gb = RomBuilder::new().program(0x0100, &[0x18, 0xFE]).machine();
    gb.run_frame().unwrap();
    assert!(gb.framebuffer().iter().all(|&px| px == DMG_PALETTE[0]));
}

#[test]
fn filled_tile_covers_the_screen() {
    let mut gb = filled_machine();
    for _ in 0..3 {
        gb.run_frame().unwrap();
    }
    assert!(gb.framebuffer().iter().all(|&px| px == DMG_PALETTE[3]));
}

#[test]
fn identical_machines_render_identical_frames() {
    let mut a = filled_machine();
    let mut b = filled_machine();
    for _ in 0..4 {
        a.run_frame().unwrap();
        b.run_frame().unwrap();
        assert_eq!(a.cpu.cycles, b.cpu.cycles);
        assert_eq!(a.framebuffer()[..], b.framebuffer()[..]);
    }
    assert_eq!(a.frame_count(), b.frame_count());
}

#[test]
fn guest_can_poll_ly_for_vblank() {
    let program = [
        0xF0, 0x44, // loop: LDH A,($44)
        0xFE, 0x90, // CP 144
        0x20, 0xFA, // JR NZ,loop
        0x18, 0xFE, // JR -2
    ];
    let mut gb = RomBuilder::new().program(0x0100, &program).machine();
    for _ in 0..100_000 {
        if gb.cpu.regs.pc == 0x0106 {
            break;
        }
        gb.step().unwrap();
    }
    assert_eq!(gb.cpu.regs.pc, 0x0106);
    // A few cycles pass between the read and the check.
    assert!((144..154).contains(&gb.mmu.ppu.ly()));
    assert_eq!(gb.mmu.ppu.mode(), Mode::VBlank);
}

#[test]
fn frames_arrive_at_a_fixed_cadence() {
    let mut gb = RomBuilder::new().program(0x0100, &[0x18, 0xFE]).machine();
    gb.run_frame().unwrap();
    let first = gb.cpu.cycles;
    gb.run_frame().unwrap();
    let second = gb.cpu.cycles - first;
    gb.run_frame().unwrap();
    let third = gb.cpu.cycles - first - second;
    // JR takes 3 cycles, so a frame boundary can overshoot by up to 2.
    assert!(second.abs_diff(17_556) <= 2, "{second}");
    assert!(third.abs_diff(17_556) <= 2, "{third}");
}
