/// Interrupt sources in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    VBlank,
    LcdStat,
    Timer,
    Serial,
    Joypad,
}

pub const ALL: [Interrupt; 5] = [
    Interrupt::VBlank,
    Interrupt::LcdStat,
    Interrupt::Timer,
    Interrupt::Serial,
    Interrupt::Joypad,
];

impl Interrupt {
    pub fn bit(self) -> u8 {
        1 << self as u8
    }

    /// Handler address (gbdev.io/pandocs/Interrupts.html).
    pub fn vector(self) -> u16 {
        0x40 + 8 * self as u16
    }
}

/// IE, IF and the master enable with its one-instruction EI delay.
#[derive(Debug, Clone, Default)]
pub struct InterruptController {
    pub ie: u8,
    if_reg: u8,
    pub ime: bool,
    enable_delay: u8,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, irq: Interrupt) {
        self.if_reg |= irq.bit();
    }

    pub fn acknowledge(&mut self, irq: Interrupt) {
        self.if_reg &= !irq.bit();
    }

    /// IF as seen by the CPU; the unused top bits read as 1.
    pub fn read_if(&self) -> u8 {
        self.if_reg | 0xE0
    }

    pub fn write_if(&mut self, val: u8) {
        self.if_reg = val & 0x1F;
    }

    /// Enabled-and-requested bits.
    pub fn pending(&self) -> u8 {
        self.ie & self.if_reg & 0x1F
    }

    /// Highest-priority enabled-and-requested source.
    pub fn highest(&self) -> Option<Interrupt> {
        let pending = self.pending();
        ALL.into_iter().find(|irq| pending & irq.bit() != 0)
    }

    /// EI: IME turns on once the following instruction has completed.
    pub fn schedule_enable(&mut self) {
        if !self.ime && self.enable_delay == 0 {
            self.enable_delay = 2;
        }
    }

    /// RETI path: no delay.
    pub fn enable_immediately(&mut self) {
        self.ime = true;
        self.enable_delay = 0;
    }

    pub fn disable(&mut self) {
        self.ime = false;
        self.enable_delay = 0;
    }

    /// Called once per completed instruction to age a pending EI.
    pub fn advance_enable_delay(&mut self) {
        if self.enable_delay > 0 {
            self.enable_delay -= 1;
            if self.enable_delay == 0 {
                self.ime = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_and_bits() {
        assert_eq!(Interrupt::VBlank.vector(), 0x40);
        assert_eq!(Interrupt::Joypad.vector(), 0x60);
        assert_eq!(Interrupt::Timer.bit(), 0x04);
    }

    #[test]
    fn priority_is_lowest_bit_first() {
        let mut ic = InterruptController::new();
        ic.ie = 0x1F;
        ic.request(Interrupt::Joypad);
        ic.request(Interrupt::Timer);
        assert_eq!(ic.highest(), Some(Interrupt::Timer));
        ic.acknowledge(Interrupt::Timer);
        assert_eq!(ic.highest(), Some(Interrupt::Joypad));
    }

    #[test]
    fn if_top_bits_read_high() {
        let mut ic = InterruptController::new();
        ic.write_if(0x01);
        assert_eq!(ic.read_if(), 0xE1);
    }

    #[test]
    fn ei_waits_one_instruction() {
        let mut ic = InterruptController::new();
        ic.schedule_enable();
        // end of the EI instruction itself
        ic.advance_enable_delay();
        assert!(!ic.ime);
        // end of the following instruction
        ic.advance_enable_delay();
        assert!(ic.ime);
    }

    #[test]
    fn di_cancels_pending_ei() {
        let mut ic = InterruptController::new();
        ic.schedule_enable();
        ic.advance_enable_delay();
        ic.disable();
        ic.advance_enable_delay();
        assert!(!ic.ime);
    }
}
