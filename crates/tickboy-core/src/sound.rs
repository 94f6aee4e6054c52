/// Post-boot contents of NR10..=NR52 (0xFF10..=0xFF26).
const POST_BOOT: [u8; 0x17] = [
    0x80, 0xBF, 0xF3, 0xFF, 0xBF, 0xFF, 0x3F, 0x00, 0xFF, 0xBF, 0x7F, 0xFF, 0x9F, 0xFF, 0xBF,
    0xFF, 0xFF, 0x00, 0x00, 0xBF, 0x77, 0xF3, 0xF1,
];

/// Sound registers and wave RAM as plain storage. No audio is produced.
#[derive(Debug, Clone)]
pub struct Sound {
    regs: [u8; 0x30],
}

impl Sound {
    pub fn new() -> Self {
        let mut regs = [0u8; 0x30];
        regs[..POST_BOOT.len()].copy_from_slice(&POST_BOOT);
        Self { regs }
    }

    pub fn read(&self, addr: u16) -> u8 {
        self.regs[addr.wrapping_sub(0xFF10) as usize % 0x30]
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        self.regs[addr.wrapping_sub(0xFF10) as usize % 0x30] = val;
    }
}

impl Default for Sound {
    fn default() -> Self {
        Self::new()
    }
}
