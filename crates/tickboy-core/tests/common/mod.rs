#![allow(dead_code)]

use once_cell::sync::Lazy;
use tickboy_core::{
    GameBoy, ModeSelect,
    cartridge::{Cartridge, header_checksum},
};

const BANK_SIZE: usize = 0x4000;

/// Two empty banks with a valid header. Builders start from a copy.
static BLANK_ROM: Lazy<Vec<u8>> = Lazy::new(|| {
    let mut rom = vec![0u8; 2 * BANK_SIZE];
    rom[0x0134..0x013C].copy_from_slice(b"TICKTEST");
    rom[0x014D] = header_checksum(&rom);
    rom
});

/// Synthesizes small cartridge images so tests don't need ROM files.
pub struct RomBuilder {
    rom: Vec<u8>,
}

impl Default for RomBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RomBuilder {
    pub fn new() -> Self {
        Self {
            rom: BLANK_ROM.clone(),
        }
    }

    /// Resize to `count` banks (a power of two) and stamp each bank's first
    /// byte with its own number.
    pub fn banks(mut self, count: usize) -> Self {
        assert!(count.is_power_of_two() && count >= 2);
        self.rom.resize(count * BANK_SIZE, 0);
        self.rom[0x0148] = count.trailing_zeros() as u8 - 1;
        for bank in 1..count {
            self.rom[bank * BANK_SIZE] = bank as u8;
        }
        self
    }

    pub fn cart_type(mut self, code: u8) -> Self {
        self.rom[0x0147] = code;
        self
    }

    pub fn ram_code(mut self, code: u8) -> Self {
        self.rom[0x0149] = code;
        self
    }

    pub fn cgb_flag(mut self, flag: u8) -> Self {
        self.rom[0x0143] = flag;
        self
    }

    pub fn program(mut self, at: u16, bytes: &[u8]) -> Self {
        let at = at as usize;
        self.rom[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    /// Finished image with a correct header checksum.
    pub fn build(mut self) -> Vec<u8> {
        self.rom[0x014D] = header_checksum(&self.rom);
        self.rom
    }

    pub fn cartridge(self) -> Cartridge {
        Cartridge::from_bytes(self.build()).unwrap()
    }

    pub fn machine(self) -> GameBoy {
        GameBoy::new(self.cartridge(), ModeSelect::Auto).unwrap()
    }
}
