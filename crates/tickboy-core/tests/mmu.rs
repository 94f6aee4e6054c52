mod common;

use common::RomBuilder;
use tickboy_core::joypad::Button;

#[test]
fn oam_dma_runs_while_the_cpu_spins() {
    let program = [
        0x3E, 0xC1, // LD A,$C1
        0xE0, 0x46, // LDH ($46),A
        0x18, 0xFE, // JR -2
    ];
    let mut gb = RomBuilder::new().program(0x0100, &program).machine();
    for i in 0..0xA0u16 {
        gb.mmu.write_byte(0xC100 + i, 0xA0 - i as u8);
    }
    gb.mmu.write_byte(0xFF40, 0x00);

    while gb.cpu.cycles < 4 + 2 + 160 + 3 {
        gb.step().unwrap();
    }
    assert!(!gb.mmu.oam_dma_active());
    assert_eq!(gb.mmu.read_byte(0xFE00), 0xA0);
    assert_eq!(gb.mmu.read_byte(0xFE9F), 0x01);
}

#[test]
fn gdma_stall_is_charged_to_the_writing_instruction() {
    let program = [
        0xAF, // XOR A
        0xE0, 0x40, // LDH ($40),A
        0x3E, 0xC0, // LD A,$C0
        0xE0, 0x51, // LDH ($51),A
        0xAF, // XOR A
        0xE0, 0x52, // LDH ($52),A
        0xE0, 0x53, // LDH ($53),A
        0xE0, 0x54, // LDH ($54),A
        0x3E, 0x01, // LD A,$01
        0xE0, 0x55, // LDH ($55),A
        0x18, 0xFE, // JR -2
    ];
    let mut gb = RomBuilder::new()
        .cgb_flag(0x80)
        .program(0x0100, &program)
        .machine();
    for i in 0..0x20u16 {
        gb.mmu.write_byte(0xC000 + i, 0x80 | i as u8);
    }

    for _ in 0..9 {
        gb.step().unwrap();
    }
    assert_eq!(gb.step().unwrap(), 3 + 16);
    assert_eq!(gb.mmu.read_byte(0xFF55), 0xFF);
    assert_eq!(gb.mmu.ppu.vram[0][0x00], 0x80);
    assert_eq!(gb.mmu.ppu.vram[0][0x1F], 0x9F);
}

#[test]
fn work_ram_banks_through_guest_code() {
    let program = [
        0x3E, 0x02, // LD A,2
        0xE0, 0x70, // LDH ($70),A
        0x3E, 0xAA, // LD A,$AA
        0xEA, 0x00, 0xD0, // LD ($D000),A
        0x3E, 0x03, // LD A,3
        0xE0, 0x70, // LDH ($70),A
        0xFA, 0x00, 0xF0, // LD A,($F000)
        0x18, 0xFE, // JR -2
    ];
    let mut gb = RomBuilder::new()
        .cgb_flag(0x80)
        .program(0x0100, &program)
        .machine();
    for _ in 0..7 {
        gb.step().unwrap();
    }
    // F000 echoes D000, which now shows bank 3.
    assert_eq!(gb.cpu.regs.a, 0x00);
    assert_eq!(gb.mmu.wram[2][0], 0xAA);
    assert_eq!(gb.mmu.wram[3][0], 0x00);
    assert_eq!(gb.mmu.read_byte(0xFF70), 0xFB);
}

#[test]
fn cartridge_ram_is_reachable_from_the_bus() {
    let mut gb = RomBuilder::new().cart_type(0x03).ram_code(0x02).machine();
    gb.mmu.write_byte(0xA000, 0x11);
    assert_eq!(gb.mmu.read_byte(0xA000), 0xFF);
    gb.mmu.write_byte(0x0000, 0x0A);
    gb.mmu.write_byte(0xA000, 0x11);
    assert_eq!(gb.mmu.read_byte(0xA000), 0x11);
    assert_eq!(gb.take_dirty_save().map(|ram| ram[0]), Some(0x11));
    assert!(gb.take_dirty_save().is_none());
}

#[test]
fn joypad_rows_follow_the_select_bits() {
    let mut gb = RomBuilder::new().machine();
    gb.press(Button::Start);
    gb.press(Button::Left);

    gb.mmu.write_byte(0xFF00, 0x10);
    assert_eq!(gb.mmu.read_byte(0xFF00) & 0x0F, 0x07);
    gb.mmu.write_byte(0xFF00, 0x20);
    assert_eq!(gb.mmu.read_byte(0xFF00) & 0x0F, 0x0D);
    gb.mmu.write_byte(0xFF00, 0x30);
    assert_eq!(gb.mmu.read_byte(0xFF00) & 0x0F, 0x0F);

    gb.release(Button::Start);
    gb.mmu.write_byte(0xFF00, 0x10);
    assert_eq!(gb.mmu.read_byte(0xFF00) & 0x0F, 0x0F);
}
