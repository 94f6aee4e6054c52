mod common;

use common::RomBuilder;
use tickboy_core::{interrupts::InterruptController, timer::Timer};

#[test]
fn clock_selects_have_expected_periods() {
    for (tac, period) in [(0x04, 1024), (0x05, 16), (0x06, 64), (0x07, 256)] {
        let mut irq = InterruptController::new();
        let mut timer = Timer::new(0);
        timer.write(0xFF07, tac);
        timer.step(period * 4, &mut irq);
        assert_eq!(timer.read(0xFF05), 4, "TAC {tac:02X}");
        timer.step(period - 1, &mut irq);
        assert_eq!(timer.read(0xFF05), 4, "TAC {tac:02X}");
    }
}

#[test]
fn disabled_timer_does_not_count() {
    let mut irq = InterruptController::new();
    let mut timer = Timer::new(0);
    timer.write(0xFF07, 0x01);
    timer.step(4096, &mut irq);
    assert_eq!(timer.read(0xFF05), 0);
    assert_eq!(timer.read(0xFF04), 0x10);
}

#[test]
fn div_write_through_the_bus_restarts_the_divider() {
    let mut gb = RomBuilder::new().machine();
    assert_eq!(gb.mmu.read_byte(0xFF04), 0xAB);
    gb.mmu.write_byte(0xFF04, 0x55);
    assert_eq!(gb.mmu.read_byte(0xFF04), 0);
    gb.mmu.tick(64);
    assert_eq!(gb.mmu.read_byte(0xFF04), 1);
}

#[test]
fn cgb_boots_with_its_own_divider() {
    let mut gb = RomBuilder::new().cgb_flag(0x80).machine();
    assert_eq!(gb.mmu.read_byte(0xFF04), 0x1E);
}

#[test]
fn timer_interrupt_dispatches_to_its_vector() {
    let program = [
        0x3E, 0x05, // LD A,$05
        0xE0, 0x07, // LDH ($07),A
        0x3E, 0x04, // LD A,$04
        0xE0, 0xFF, // LDH ($FF),A
        0xAF, // XOR A
        0xE0, 0x0F, // LDH ($0F),A
        0xFB, // EI
        0x76, // HALT
        0x18, 0xFE, // JR -2
    ];
    let mut gb = RomBuilder::new()
        .program(0x0050, &[0x18, 0xFE])
        .program(0x0100, &program)
        .machine();

    let mut reached = false;
    for _ in 0..10_000 {
        gb.step().unwrap();
        if gb.cpu.regs.pc == 0x0050 {
            reached = true;
            break;
        }
    }
    assert!(reached, "timer interrupt never taken");
    assert!(!gb.mmu.interrupts.ime);
    assert_eq!(gb.mmu.interrupts.read_if() & 0x04, 0);
    // Return address is the instruction after HALT.
    assert_eq!(gb.mmu.read_byte(gb.cpu.regs.sp), 0x0D);
    assert_eq!(gb.mmu.read_byte(gb.cpu.regs.sp + 1), 0x01);
}
