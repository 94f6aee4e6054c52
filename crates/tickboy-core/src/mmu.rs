use crate::{
    cartridge::Cartridge,
    interrupts::InterruptController,
    joypad::{Button, Joypad},
    ppu::Ppu,
    serial::Serial,
    sound::Sound,
    timer::{CGB_BOOT_DIV, DMG_BOOT_DIV, Timer},
};

const WRAM_BANK_SIZE: usize = 0x1000;
const OAM_DMA_LEN: u16 = 0xA0;
/// Machine cycles between the FF46 write and the first byte copied.
const OAM_DMA_START_DELAY: u8 = 2;
const HDMA_BLOCK_LEN: u16 = 0x10;

#[derive(Debug, Default)]
struct OamDma {
    /// Base address of the page being copied, already mirrored below 0xE000
    source: u16,
    /// Next OAM offset to fill
    index: u16,
    start_delay: u8,
    active: bool,
}

#[derive(Debug)]
struct HdmaState {
    /// Source pointer; low nibble always zero when programmed
    src: u16,
    /// Destination in VRAM (0x8000 | (dst & 0x1FF0))
    dst: u16,
    /// Remaining 0x10-byte blocks
    blocks: u8,
    /// HBlank transfer in progress
    active: bool,
    /// The last HBlank transfer was stopped by an FF55 write
    cancelled: bool,
}

/// The CPU's view of memory. Owns every peripheral and advances them in
/// lockstep through [`Mmu::tick`].
pub struct Mmu {
    pub wram: [[u8; WRAM_BANK_SIZE]; 8],
    pub wram_bank: usize,
    pub hram: [u8; 0x7F],
    pub cart: Cartridge,
    pub ppu: Ppu,
    pub timer: Timer,
    pub joypad: Joypad,
    pub serial: Serial,
    pub sound: Sound,
    pub interrupts: InterruptController,
    oam_dma: OamDma,
    hdma: HdmaState,
    /// Speed switch armed by KEY1 bit 0
    key1: u8,
    double_speed: bool,
    /// CPU cycles owed to VRAM DMA, collected by the CPU after each step
    stall_cycles: u32,
    /// A new button press arrived since the last check
    joypad_wake: bool,
    cgb: bool,
}

impl Mmu {
    pub fn new(cart: Cartridge, cgb: bool) -> Self {
        let mut ppu = Ppu::new(cgb);
        ppu.apply_boot_state();
        let mut interrupts = InterruptController::new();
        interrupts.write_if(0x01);

        Self {
            wram: [[0; WRAM_BANK_SIZE]; 8],
            wram_bank: 1,
            hram: [0; 0x7F],
            cart,
            ppu,
            timer: Timer::new(if cgb { CGB_BOOT_DIV } else { DMG_BOOT_DIV }),
            joypad: Joypad::new(),
            serial: Serial::new(cgb),
            sound: Sound::new(),
            interrupts,
            oam_dma: OamDma::default(),
            hdma: HdmaState {
                src: 0,
                dst: Self::sanitize_vram_dma_dest(0),
                blocks: 0,
                active: false,
                cancelled: false,
            },
            key1: 0,
            double_speed: false,
            stall_cycles: 0,
            joypad_wake: false,
            cgb,
        }
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    pub fn double_speed(&self) -> bool {
        self.double_speed
    }

    /// KEY1 bit 0 is set, so the next STOP switches speed.
    pub fn speed_switch_armed(&self) -> bool {
        self.cgb && self.key1 & 0x01 != 0
    }

    /// Flip CPU speed and disarm KEY1.
    pub fn switch_speed(&mut self) {
        self.double_speed = !self.double_speed;
        self.key1 &= !0x01;
        log::debug!(
            "speed switch: {} speed",
            if self.double_speed { "double" } else { "normal" }
        );
    }

    pub fn reset_div(&mut self) {
        self.timer.reset_div();
    }

    pub fn press(&mut self, button: Button) {
        if self.joypad.press(button, &mut self.interrupts) {
            self.joypad_wake = true;
        }
    }

    pub fn release(&mut self, button: Button) {
        self.joypad.release(button);
    }

    /// True once after a new button press, used to leave STOP.
    pub fn take_joypad_wake(&mut self) -> bool {
        std::mem::take(&mut self.joypad_wake)
    }

    pub fn take_serial(&mut self) -> Vec<u8> {
        self.serial.take_output()
    }

    /// CPU cycles VRAM DMA has claimed since the last call.
    pub fn take_stall(&mut self) -> u32 {
        std::mem::take(&mut self.stall_cycles)
    }

    pub fn oam_dma_active(&self) -> bool {
        self.oam_dma.active
    }

    fn wram_index(&self, addr: u16) -> (usize, usize) {
        let offset = (addr as usize - 0xC000) & 0x1FFF;
        if offset < WRAM_BANK_SIZE {
            (0, offset)
        } else {
            (self.wram_bank, offset - WRAM_BANK_SIZE)
        }
    }

    pub fn read_byte(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.read(addr),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.read_vram(addr)
                } else {
                    log::trace!("VRAM read blocked addr={addr:04X} mode={:?}", self.ppu.mode());
                    0xFF
                }
            }
            0xC000..=0xFDFF => {
                let (bank, idx) = self.wram_index(addr);
                self.wram[bank][idx]
            }
            0xFE00..=0xFE9F => {
                if self.oam_dma.active {
                    log::trace!("OAM read blocked by DMA addr={addr:04X}");
                    0xFF
                } else if !self.ppu.oam_accessible() {
                    log::trace!("OAM read blocked addr={addr:04X} mode={:?}", self.ppu.mode());
                    0xFF
                } else {
                    self.ppu.oam[(addr - 0xFE00) as usize]
                }
            }
            0xFEA0..=0xFEFF => 0xFF,
            0xFF00 => self.joypad.read(),
            0xFF01 | 0xFF02 => self.serial.read(addr),
            0xFF04..=0xFF07 => self.timer.read(addr),
            0xFF0F => self.interrupts.read_if(),
            0xFF10..=0xFF3F => self.sound.read(addr),
            0xFF40..=0xFF4B => self.ppu.read_reg(addr),
            0xFF4D if self.cgb => {
                0x7E | if self.double_speed { 0x80 } else { 0 } | (self.key1 & 0x01)
            }
            0xFF4F if self.cgb => 0xFE | self.ppu.vram_bank as u8,
            0xFF55 if self.cgb => self.hdma_status(),
            0xFF68..=0xFF6C => self.ppu.read_reg(addr),
            0xFF70 if self.cgb => 0xF8 | self.wram_bank as u8,
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize],
            0xFFFF => self.interrupts.ie,
            _ => 0xFF,
        }
    }

    pub fn write_byte(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.write(addr, val),
            0x8000..=0x9FFF => {
                if self.ppu.vram_accessible() {
                    self.ppu.write_vram(addr, val);
                } else {
                    log::trace!(
                        "VRAM write blocked addr={addr:04X} val={val:02X} mode={:?}",
                        self.ppu.mode()
                    );
                }
            }
            0xC000..=0xFDFF => {
                let (bank, idx) = self.wram_index(addr);
                self.wram[bank][idx] = val;
            }
            0xFE00..=0xFE9F => {
                if self.oam_dma.active || !self.ppu.oam_accessible() {
                    log::trace!("OAM write blocked addr={addr:04X} val={val:02X}");
                } else {
                    self.ppu.oam[(addr - 0xFE00) as usize] = val;
                }
            }
            0xFEA0..=0xFEFF => {}
            0xFF00 => self.joypad.write(val),
            0xFF01 | 0xFF02 => self.serial.write(addr, val, &mut self.interrupts),
            0xFF04..=0xFF07 => self.timer.write(addr, val),
            0xFF0F => self.interrupts.write_if(val),
            0xFF10..=0xFF3F => self.sound.write(addr, val),
            0xFF40 => {
                let lcd_was_on = self.ppu.lcd_enabled();
                self.ppu.write_reg(addr, val);
                if lcd_was_on && !self.ppu.lcd_enabled() {
                    self.complete_active_hdma();
                }
            }
            0xFF46 => self.start_oam_dma(val),
            0xFF41..=0xFF4B => self.ppu.write_reg(addr, val),
            0xFF4D if self.cgb => self.key1 = val & 0x01,
            0xFF4F if self.cgb => self.ppu.vram_bank = (val & 0x01) as usize,
            0xFF51 if self.cgb => self.hdma.src = ((val as u16) << 8) | (self.hdma.src & 0x00F0),
            0xFF52 if self.cgb => self.hdma.src = (self.hdma.src & 0xFF00) | (val & 0xF0) as u16,
            0xFF53 if self.cgb => {
                let raw = ((val as u16) << 8) | (self.hdma.dst & 0x00F0);
                self.hdma.dst = Self::sanitize_vram_dma_dest(raw);
            }
            0xFF54 if self.cgb => {
                let raw = (self.hdma.dst & 0x1F00) | (val & 0xF0) as u16;
                self.hdma.dst = Self::sanitize_vram_dma_dest(raw);
            }
            0xFF55 if self.cgb => self.write_hdma_control(val),
            0xFF68..=0xFF6C => self.ppu.write_reg(addr, val),
            0xFF70 if self.cgb => {
                let bank = (val & 0x07) as usize;
                self.wram_bank = bank.max(1);
            }
            0xFF80..=0xFFFE => self.hram[(addr - 0xFF80) as usize] = val,
            0xFFFF => self.interrupts.ie = val,
            _ => log::trace!("unmapped write addr={addr:04X} val={val:02X}"),
        }
    }

    /// Read on the DMA engines' path, which ignores PPU and DMA gating.
    fn dma_read_byte(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x7FFF | 0xA000..=0xBFFF => self.cart.read(addr),
            0x8000..=0x9FFF => self.ppu.read_vram(addr),
            0xC000..=0xFDFF => {
                let (bank, idx) = self.wram_index(addr);
                self.wram[bank][idx]
            }
            _ => 0xFF,
        }
    }

    fn start_oam_dma(&mut self, val: u8) {
        self.ppu.dma = val;
        let page = if val > 0xDF { val - 0x20 } else { val };
        self.oam_dma.source = (page as u16) << 8;
        self.oam_dma.start_delay = OAM_DMA_START_DELAY;
        log::debug!("OAM DMA scheduled from {:04X}", self.oam_dma.source);
    }

    fn step_oam_dma(&mut self) {
        if self.oam_dma.start_delay > 0 {
            self.oam_dma.start_delay -= 1;
            if self.oam_dma.start_delay == 0 {
                self.oam_dma.index = 0;
                self.oam_dma.active = true;
            }
            return;
        }
        if !self.oam_dma.active {
            return;
        }
        let src = self.oam_dma.source + self.oam_dma.index;
        self.ppu.oam[self.oam_dma.index as usize] = self.dma_read_byte(src);
        self.ppu.dma = (src >> 8) as u8;
        self.oam_dma.index += 1;
        if self.oam_dma.index == OAM_DMA_LEN {
            self.oam_dma.active = false;
        }
    }

    #[inline]
    fn sanitize_vram_dma_dest(addr: u16) -> u16 {
        0x8000 | (addr & 0x1FF0)
    }

    fn hdma_status(&self) -> u8 {
        let remaining = self.hdma.blocks.wrapping_sub(1) & 0x7F;
        if self.hdma.active {
            remaining
        } else if self.hdma.cancelled {
            0x80 | remaining
        } else {
            0xFF
        }
    }

    fn write_hdma_control(&mut self, val: u8) {
        let blocks = (val & 0x7F) + 1;
        if self.hdma.active && val & 0x80 == 0 {
            log::debug!("HDMA cancelled with {} blocks left", self.hdma.blocks);
            self.hdma.active = false;
            self.hdma.cancelled = true;
        } else if val & 0x80 == 0 {
            log::debug!(
                "GDMA {:04X} -> {:04X}, {} blocks",
                self.hdma.src,
                self.hdma.dst,
                blocks
            );
            self.hdma.cancelled = false;
            self.hdma.blocks = blocks;
            while self.hdma.blocks > 0 {
                self.transfer_vram_block();
            }
        } else {
            log::debug!(
                "HDMA {:04X} -> {:04X}, {} blocks",
                self.hdma.src,
                self.hdma.dst,
                blocks
            );
            self.hdma.blocks = blocks;
            self.hdma.active = true;
            self.hdma.cancelled = false;
            if self.ppu.in_hblank() || !self.ppu.lcd_enabled() {
                self.transfer_vram_block();
            }
        }
    }

    /// Copy one 16-byte block and charge the CPU for it.
    fn transfer_vram_block(&mut self) {
        for _ in 0..HDMA_BLOCK_LEN {
            let byte = self.dma_read_byte(self.hdma.src);
            let bank = self.ppu.vram_bank;
            self.ppu.vram[bank][(self.hdma.dst & 0x1FFF) as usize] = byte;
            self.hdma.src = self.hdma.src.wrapping_add(1);
            self.hdma.dst = 0x8000 | (self.hdma.dst.wrapping_add(1) & 0x1FFF);
        }
        self.hdma.blocks = self.hdma.blocks.saturating_sub(1);
        if self.hdma.blocks == 0 {
            self.hdma.active = false;
        }
        self.stall_cycles += if self.double_speed { 16 } else { 8 };
    }

    fn complete_active_hdma(&mut self) {
        while self.hdma.active {
            self.transfer_vram_block();
        }
    }

    /// Advance every peripheral by `m_cycles` machine cycles: RTC, timer,
    /// PPU (running an HDMA block on HBlank entry), then OAM DMA.
    pub fn tick(&mut self, m_cycles: u32) {
        let dots = if self.double_speed { 2 } else { 4 };
        for _ in 0..m_cycles {
            self.cart.step_rtc(dots);
            self.timer.step(4, &mut self.interrupts);
            if self.ppu.step(dots, &mut self.interrupts) && self.hdma.active {
                self.transfer_vram_block();
            }
            self.step_oam_dma();
        }
    }
}
