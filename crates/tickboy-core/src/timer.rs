use crate::interrupts::{Interrupt, InterruptController};

/// Internal divider value left by the DMG boot ROM.
pub const DMG_BOOT_DIV: u16 = 0xABCC;
/// Internal divider value left by the CGB boot ROM.
pub const CGB_BOOT_DIV: u16 = 0x1EA0;

/// Dots TIMA spends reading 0 after an overflow before TMA is loaded.
const RELOAD_DELAY: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    None,
    /// TIMA wrapped and reads 0. `value` lands after `dots` more dots.
    Pending { dots: u8, value: u8 },
    /// The reload landed on the current dot.
    Reloaded,
}

/// DIV/TIMA/TMA/TAC, stepped once per tick of the 4 MiHz clock.
#[derive(Debug, Clone)]
pub struct Timer {
    /// Full 16-bit divider; DIV reads the upper byte.
    pub div: u16,
    pub tima: u8,
    pub tma: u8,
    pub tac: u8,
    /// Timer input (enable AND selected divider bit) at the last update.
    input: bool,
    overflow: Overflow,
    /// TMA from before a write on the current dot
    tma_before_write: Option<u8>,
}

impl Timer {
    pub fn new(div: u16) -> Self {
        Self {
            div,
            tima: 0,
            tma: 0,
            tac: 0,
            input: false,
            overflow: Overflow::None,
            tma_before_write: None,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0xFF04 => (self.div >> 8) as u8,
            0xFF05 => self.tima,
            0xFF06 => self.tma,
            0xFF07 => 0xF8 | self.tac,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF04 => self.reset_div(),
            0xFF05 => self.write_tima(val),
            0xFF06 => self.write_tma(val),
            0xFF07 => self.write_tac(val),
            _ => {}
        }
    }

    /// Advance by `dots` clock ticks.
    pub fn step(&mut self, dots: u32, irq: &mut InterruptController) {
        for _ in 0..dots {
            let next = self.div.wrapping_add(1);
            self.advance(next, irq);
        }
    }

    /// DIV write. Clearing the divider can drop the timer input, which
    /// counts as a falling edge and ticks TIMA. The write lands within the
    /// current dot, so a pending reload keeps its remaining delay.
    pub fn reset_div(&mut self) {
        self.set_div(0);
    }

    fn advance(&mut self, div: u16, irq: &mut InterruptController) {
        self.land_reload(irq);
        self.set_div(div);
    }

    fn set_div(&mut self, div: u16) {
        let old_tma = self.tma_before_write.take();
        self.div = div;
        let now = self.current_input();
        if self.input && !now {
            self.bump(old_tma);
        }
        self.input = now;
    }

    fn land_reload(&mut self, irq: &mut InterruptController) {
        self.overflow = match self.overflow {
            Overflow::Pending { dots: 0, value } => {
                self.tima = value;
                irq.request(Interrupt::Timer);
                Overflow::Reloaded
            }
            Overflow::Pending { dots, value } => Overflow::Pending {
                dots: dots - 1,
                value,
            },
            Overflow::Reloaded | Overflow::None => Overflow::None,
        };
    }

    fn bump(&mut self, old_tma: Option<u8>) {
        match self.tima.checked_add(1) {
            Some(next) => self.tima = next,
            None => {
                self.tima = 0;
                self.overflow = Overflow::Pending {
                    dots: RELOAD_DELAY,
                    value: old_tma.unwrap_or(self.tma),
                };
            }
        }
    }

    fn write_tima(&mut self, val: u8) {
        match self.overflow {
            // the reload wins on the dot it lands
            Overflow::Reloaded | Overflow::Pending { dots: 0, .. } => {}
            Overflow::Pending { .. } => {
                log::trace!("TIMA write cancelled pending reload");
                self.tima = val;
                self.overflow = Overflow::None;
            }
            Overflow::None => self.tima = val,
        }
    }

    fn write_tma(&mut self, val: u8) {
        self.tma_before_write = Some(self.tma);
        self.tma = val;
        match &mut self.overflow {
            Overflow::Pending { value, .. } => *value = val,
            Overflow::Reloaded => self.tima = val,
            Overflow::None => {}
        }
    }

    fn write_tac(&mut self, val: u8) {
        self.tac = val & 0x07;
        let now = self.current_input();
        if self.input && !now {
            let old_tma = self.tma_before_write.take();
            self.bump(old_tma);
        }
        self.input = now;
    }

    fn current_input(&self) -> bool {
        let bit = match self.tac & 0x03 {
            0x00 => 9,
            0x01 => 3,
            0x02 => 5,
            _ => 7,
        };
        self.tac & 0x04 != 0 && self.div & (1 << bit) != 0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(tac: u8) -> (Timer, InterruptController) {
        let mut irq = InterruptController::new();
        irq.ie = 0x04;
        let mut t = Timer::new(0);
        t.write(0xFF07, tac);
        (t, irq)
    }

    #[test]
    fn div_reads_upper_byte() {
        let t = Timer::new(0xABCC);
        assert_eq!(t.read(0xFF04), 0xAB);
        assert_eq!(t.read(0xFF07), 0xF8);
    }

    #[test]
    fn fastest_clock_select_counts_every_16_dots() {
        let (mut t, mut irq) = running(0x05);
        t.step(15, &mut irq);
        assert_eq!(t.tima, 0);
        t.step(1, &mut irq);
        assert_eq!(t.tima, 1);
        t.step(16 * 9, &mut irq);
        assert_eq!(t.tima, 10);
    }

    #[test]
    fn reload_and_interrupt_trail_the_overflow() {
        let (mut t, mut irq) = running(0x05);
        t.write(0xFF06, 0x42);
        t.write(0xFF05, 0xFF);
        t.step(16, &mut irq);
        assert_eq!(t.tima, 0x00);
        t.step(3, &mut irq);
        assert_eq!(t.tima, 0x00);
        assert_eq!(irq.pending(), 0);
        t.step(1, &mut irq);
        assert_eq!(t.tima, 0x42);
        assert_eq!(irq.pending(), 0x04);
    }

    #[test]
    fn tima_write_in_the_gap_cancels_the_reload() {
        let (mut t, mut irq) = running(0x05);
        t.write(0xFF06, 0x42);
        t.write(0xFF05, 0xFF);
        t.step(17, &mut irq);
        t.write(0xFF05, 0x10);
        t.step(8, &mut irq);
        assert_eq!(t.tima, 0x10);
        assert_eq!(irq.pending(), 0);
    }

    #[test]
    fn tma_write_in_the_gap_changes_the_reload_value() {
        let (mut t, mut irq) = running(0x05);
        t.write(0xFF06, 0x42);
        t.write(0xFF05, 0xFF);
        t.step(17, &mut irq);
        t.write(0xFF06, 0x99);
        t.step(3, &mut irq);
        assert_eq!(t.tima, 0x99);
        assert_eq!(irq.pending(), 0x04);
    }

    #[test]
    fn clearing_div_on_a_high_bit_ticks_tima() {
        let (mut t, mut irq) = running(0x05);
        t.step(8, &mut irq);
        assert_eq!(t.tima, 0);
        t.write(0xFF04, 0x00);
        assert_eq!(t.tima, 1);
        assert_eq!(t.div, 0);
    }

    #[test]
    fn div_write_in_the_gap_keeps_the_reload_delay() {
        let (mut t, mut irq) = running(0x05);
        t.write(0xFF06, 0x42);
        t.write(0xFF05, 0xFF);
        t.step(16, &mut irq);
        t.write(0xFF04, 0x00);
        t.step(3, &mut irq);
        assert_eq!(t.tima, 0x00);
        assert_eq!(irq.pending(), 0);
        t.step(1, &mut irq);
        assert_eq!(t.tima, 0x42);
        assert_eq!(irq.pending(), 0x04);
    }

    #[test]
    fn disabling_while_input_high_ticks_tima() {
        let (mut t, mut irq) = running(0x05);
        t.step(8, &mut irq);
        t.write(0xFF07, 0x01);
        assert_eq!(t.tima, 1);
        t.step(64, &mut irq);
        assert_eq!(t.tima, 1);
    }
}
