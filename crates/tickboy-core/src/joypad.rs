use crate::interrupts::{Interrupt, InterruptController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

impl Button {
    /// Bit in the selected P1 nibble, plus whether it is on the action row.
    fn line(self) -> (u8, bool) {
        match self {
            Button::Right => (0x01, false),
            Button::Left => (0x02, false),
            Button::Up => (0x04, false),
            Button::Down => (0x08, false),
            Button::A => (0x01, true),
            Button::B => (0x02, true),
            Button::Select => (0x04, true),
            Button::Start => (0x08, true),
        }
    }
}

/// P1/JOYP. Held buttons are stored active-high and inverted on read.
#[derive(Debug, Clone)]
pub struct Joypad {
    select: u8,
    directions: u8,
    actions: u8,
}

impl Joypad {
    pub fn new() -> Self {
        Self {
            select: 0x30,
            directions: 0,
            actions: 0,
        }
    }

    pub fn read(&self) -> u8 {
        let mut held = 0;
        if self.select & 0x10 == 0 {
            held |= self.directions;
        }
        if self.select & 0x20 == 0 {
            held |= self.actions;
        }
        0xC0 | self.select | (!held & 0x0F)
    }

    pub fn write(&mut self, val: u8) {
        self.select = val & 0x30;
    }

    /// Returns true if the button was not already held.
    pub fn press(&mut self, button: Button, irq: &mut InterruptController) -> bool {
        let (mask, action) = button.line();
        let row = if action {
            &mut self.actions
        } else {
            &mut self.directions
        };
        if *row & mask != 0 {
            return false;
        }
        *row |= mask;
        irq.request(Interrupt::Joypad);
        true
    }

    pub fn release(&mut self, button: Button) {
        let (mask, action) = button.line();
        if action {
            self.actions &= !mask;
        } else {
            self.directions &= !mask;
        }
    }
}

impl Default for Joypad {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_selected_reads_high() {
        let mut pad = Joypad::new();
        let mut irq = InterruptController::new();
        pad.press(Button::A, &mut irq);
        assert_eq!(pad.read(), 0xFF);
    }

    #[test]
    fn selected_row_reads_active_low() {
        let mut pad = Joypad::new();
        let mut irq = InterruptController::new();
        pad.press(Button::Start, &mut irq);
        pad.press(Button::Left, &mut irq);
        pad.write(0x10);
        assert_eq!(pad.read(), 0xD7);
        pad.write(0x20);
        assert_eq!(pad.read(), 0xED);
        pad.release(Button::Start);
        pad.write(0x10);
        assert_eq!(pad.read(), 0xDF);
    }

    #[test]
    fn press_requests_interrupt_once() {
        let mut pad = Joypad::new();
        let mut irq = InterruptController::new();
        irq.ie = 0x10;
        assert!(pad.press(Button::B, &mut irq));
        assert_eq!(irq.pending(), 0x10);
        irq.acknowledge(Interrupt::Joypad);
        assert!(!pad.press(Button::B, &mut irq));
        assert_eq!(irq.pending(), 0);
    }
}
