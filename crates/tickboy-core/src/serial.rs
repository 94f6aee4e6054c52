use crate::interrupts::{Interrupt, InterruptController};

/// The other end of the link cable.
pub trait LinkPort: Send {
    /// Exchange one byte: `sent` goes out, the partner's byte comes back.
    fn transfer(&mut self, sent: u8) -> u8;
}

/// No cable: the input line floats high.
#[derive(Debug, Default)]
pub struct Disconnected;

impl LinkPort for Disconnected {
    fn transfer(&mut self, _sent: u8) -> u8 {
        0xFF
    }
}

/// Cable plugged back into the same unit.
#[derive(Debug, Default)]
pub struct Loopback;

impl LinkPort for Loopback {
    fn transfer(&mut self, sent: u8) -> u8 {
        sent
    }
}

const SC_START: u8 = 0x80;
const SC_INTERNAL_CLOCK: u8 = 0x01;

/// SB/SC. Transfers on the internal clock complete as soon as they start;
/// externally clocked ones wait for a partner that never drives them.
pub struct Serial {
    data: u8,
    control: u8,
    /// Every byte the guest has shifted out, for the host to collect
    sent: Vec<u8>,
    link: Box<dyn LinkPort>,
    cgb: bool,
}

impl Serial {
    pub fn new(cgb: bool) -> Self {
        Self {
            data: 0,
            control: 0x7E,
            sent: Vec::new(),
            link: Box::new(Disconnected),
            cgb,
        }
    }

    pub fn connect(&mut self, link: Box<dyn LinkPort>) {
        self.link = link;
    }

    pub fn read(&self, addr: u16) -> u8 {
        // SC bit 1 selects the fast clock, which only CGB has.
        let unused = if self.cgb { 0x7C } else { 0x7E };
        match addr {
            0xFF01 => self.data,
            0xFF02 => self.control | unused,
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8, irq: &mut InterruptController) {
        match addr {
            0xFF01 => self.data = val,
            0xFF02 => {
                self.control = val;
                if val & (SC_START | SC_INTERNAL_CLOCK) == SC_START | SC_INTERNAL_CLOCK {
                    self.sent.push(self.data);
                    self.data = self.link.transfer(self.data);
                    self.control &= !SC_START;
                    irq.request(Interrupt::Serial);
                }
            }
            _ => {}
        }
    }

    /// Bytes sent since the last call.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.sent)
    }
}
