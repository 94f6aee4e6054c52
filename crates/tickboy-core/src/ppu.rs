use crate::interrupts::{Interrupt, InterruptController};

mod fetcher;

use fetcher::{Fetcher, PixelFifo};

pub const SCREEN_WIDTH: usize = 160;
pub const SCREEN_HEIGHT: usize = 144;

// LCD timing in dots (gbdev.io/pandocs/Rendering.html)
pub const DOTS_PER_LINE: u16 = 456;
const OAM_SCAN_DOTS: u16 = 80;
const VBLANK_LINES: u8 = 10;
const LINES_PER_FRAME: u8 = SCREEN_HEIGHT as u8 + VBLANK_LINES;
pub const DOTS_PER_FRAME: u32 = DOTS_PER_LINE as u32 * LINES_PER_FRAME as u32;

// OAM limits
const MAX_SPRITES_PER_LINE: usize = 10;
const TOTAL_SPRITES: usize = 40;

// Memory sizes
const VRAM_BANK_SIZE: usize = 0x2000;
const OAM_SIZE: usize = 0xA0;
const PAL_RAM_SIZE: usize = 0x40;
const PAL_INDEX_MASK: u8 = 0x3F;
const PAL_UNUSED_BIT: u8 = 0x40;
const PAL_AUTO_INCREMENT_BIT: u8 = 0x80;

// Window X position limit (gbdev.io/pandocs/Window.html)
const WINDOW_X_MAX: u8 = 166;

/// Default DMG palette colors in 0x00RRGGBB order.
pub const DMG_PALETTE: [u32; 4] = [0x009BBC0F, 0x008BAC0F, 0x00306230, 0x000F380F];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    HBlank = 0,
    VBlank = 1,
    OamScan = 2,
    Transfer = 3,
}

#[derive(Copy, Clone, Default, Debug)]
struct Sprite {
    /// Screen X of the leftmost column; OAM X minus 8.
    x: i16,
    /// Screen Y of the top row; OAM Y minus 16.
    y: i16,
    tile: u8,
    flags: u8,
    oam_index: usize,
}

pub struct Ppu {
    pub vram: [[u8; VRAM_BANK_SIZE]; 2],
    pub vram_bank: usize,
    pub oam: [u8; OAM_SIZE],

    cgb: bool,

    lcdc: u8,
    stat: u8,
    scy: u8,
    scx: u8,
    ly: u8,
    lyc: u8,
    lyc_eq_ly: bool,
    pub dma: u8,
    bgp: u8,
    obp0: u8,
    obp1: u8,
    wy: u8,
    wx: u8,

    /// Internal window line counter
    win_line_counter: u8,
    /// WY matched LY at some point this frame
    wy_triggered: bool,
    /// Fetcher switched to the window on this line
    window_active: bool,

    bgpi: u8,
    bgpd: [u8; PAL_RAM_SIZE],
    obpi: u8,
    obpd: [u8; PAL_RAM_SIZE],
    /// Object priority mode register (OPRI)
    opri: u8,

    mode: Mode,
    /// Dot within the current line, 0..456
    dot: u16,

    fetcher: Fetcher,
    fifo: PixelFifo,
    /// Next screen column to be written this line
    lx: u8,
    /// Pixels still to drop from the FIFO before output starts
    discard: u8,

    pub framebuffer: [u32; SCREEN_WIDTH * SCREEN_HEIGHT],
    /// Latched sprites for the current scanline
    line_sprites: [Sprite; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    frame_ready: bool,
    stat_irq_line: bool,
    frame_counter: u64,
}

impl Ppu {
    pub fn new(cgb: bool) -> Self {
        Self {
            vram: [[0; VRAM_BANK_SIZE]; 2],
            vram_bank: 0,
            oam: [0; OAM_SIZE],
            cgb,
            lcdc: 0,
            stat: 0,
            scy: 0,
            scx: 0,
            ly: 0,
            lyc: 0,
            lyc_eq_ly: false,
            dma: 0,
            bgp: 0,
            obp0: 0,
            obp1: 0,
            wy: 0,
            wx: 0,
            win_line_counter: 0,
            wy_triggered: false,
            window_active: false,
            bgpi: PAL_UNUSED_BIT,
            bgpd: [0; PAL_RAM_SIZE],
            obpi: PAL_UNUSED_BIT,
            obpd: [0; PAL_RAM_SIZE],
            opri: 0,
            mode: Mode::HBlank,
            dot: 0,
            fetcher: Fetcher::default(),
            fifo: PixelFifo::default(),
            lx: 0,
            discard: 0,
            framebuffer: [0; SCREEN_WIDTH * SCREEN_HEIGHT],
            line_sprites: [Sprite::default(); MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            frame_ready: false,
            stat_irq_line: false,
            frame_counter: 0,
        }
    }

    /// Register state left by the boot ROM: LCD on, at the top of a frame.
    pub fn apply_boot_state(&mut self) {
        self.lcdc = 0x91;
        self.dma = 0xFF;
        self.bgp = 0xFC;
        self.ly = 0;
        self.dot = 0;
        self.mode = Mode::OamScan;
        self.begin_frame();
        self.lyc_eq_ly = self.ly == self.lyc;
        self.stat_irq_line = false;
        if self.cgb {
            // white BG palette 0, as the CGB boot ROM leaves it
            for chunk in self.bgpd.chunks_mut(2) {
                chunk[0] = 0xFF;
                chunk[1] = 0x7F;
            }
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn ly(&self) -> u8 {
        self.ly
    }

    pub fn lcd_enabled(&self) -> bool {
        self.lcdc & 0x80 != 0
    }

    pub fn in_hblank(&self) -> bool {
        self.mode == Mode::HBlank
    }

    /// CPU may touch VRAM outside pixel transfer.
    pub fn vram_accessible(&self) -> bool {
        self.mode != Mode::Transfer
    }

    /// CPU may touch OAM during HBlank and VBlank only.
    pub fn oam_accessible(&self) -> bool {
        matches!(self.mode, Mode::HBlank | Mode::VBlank)
    }

    pub fn read_vram(&self, addr: u16) -> u8 {
        self.vram[self.vram_bank][(addr as usize - 0x8000) & 0x1FFF]
    }

    pub fn write_vram(&mut self, addr: u16, val: u8) {
        self.vram[self.vram_bank][(addr as usize - 0x8000) & 0x1FFF] = val;
    }

    /// True once per frame, set on entry to VBlank.
    pub fn frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn clear_frame_flag(&mut self) {
        self.frame_ready = false;
    }

    pub fn framebuffer(&self) -> &[u32; SCREEN_WIDTH * SCREEN_HEIGHT] {
        &self.framebuffer
    }

    /// Frames completed since power on.
    pub fn frames(&self) -> u64 {
        self.frame_counter
    }

    pub fn window_line_counter(&self) -> u8 {
        self.win_line_counter
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    fn decode_cgb_color(lo: u8, hi: u8) -> u32 {
        let raw = u16::from_le_bytes([lo, hi]);
        let expand = |c: u16| {
            let c = (c & 0x1F) as u32;
            (c << 3) | (c >> 2)
        };
        (expand(raw) << 16) | (expand(raw >> 5) << 8) | expand(raw >> 10)
    }

    pub fn bg_palette_color(&self, palette: usize, color_id: usize) -> u32 {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.bgpd[off], self.bgpd[off + 1])
    }

    pub fn ob_palette_color(&self, palette: usize, color_id: usize) -> u32 {
        let off = palette * 8 + color_id * 2;
        Self::decode_cgb_color(self.obpd[off], self.obpd[off + 1])
    }

    fn dmg_shade(palette: u8, color_id: u8) -> u8 {
        (palette >> (color_id * 2)) & 0x03
    }

    fn sanitize_palette_index(value: u8) -> u8 {
        (value & (PAL_AUTO_INCREMENT_BIT | PAL_INDEX_MASK)) | PAL_UNUSED_BIT
    }

    fn palette_ram_index(index: u8) -> usize {
        (index & PAL_INDEX_MASK) as usize
    }

    fn step_palette_index(index: &mut u8) {
        let current = *index;
        let auto = current & PAL_AUTO_INCREMENT_BIT;
        let mut idx = current & PAL_INDEX_MASK;
        if auto != 0 {
            idx = idx.wrapping_add(1) & PAL_INDEX_MASK;
        }
        *index = auto | PAL_UNUSED_BIT | idx;
    }

    fn update_lyc_compare(&mut self) {
        if self.lcd_enabled() {
            self.lyc_eq_ly = self.ly == self.lyc;
        }
    }

    pub fn read_reg(&mut self, addr: u16) -> u8 {
        match addr {
            0xFF40 => self.lcdc,
            0xFF41 => {
                (self.stat & 0x78)
                    | 0x80
                    | if self.lcd_enabled() { self.mode as u8 } else { 0 }
                    | if self.lyc_eq_ly { 0x04 } else { 0 }
            }
            0xFF42 => self.scy,
            0xFF43 => self.scx,
            0xFF44 => self.ly,
            0xFF45 => self.lyc,
            0xFF46 => self.dma,
            0xFF47 => self.bgp,
            0xFF48 => self.obp0,
            0xFF49 => self.obp1,
            0xFF4A => self.wy,
            0xFF4B => self.wx,
            0xFF68 if self.cgb => self.bgpi,
            0xFF69 if self.cgb => {
                let val = self.bgpd[Self::palette_ram_index(self.bgpi)];
                Self::step_palette_index(&mut self.bgpi);
                val
            }
            0xFF6A if self.cgb => self.obpi,
            0xFF6B if self.cgb => {
                let val = self.obpd[Self::palette_ram_index(self.obpi)];
                Self::step_palette_index(&mut self.obpi);
                val
            }
            0xFF6C if self.cgb => self.opri | 0xFE,
            _ => 0xFF,
        }
    }

    pub fn write_reg(&mut self, addr: u16, val: u8) {
        match addr {
            0xFF40 => {
                let was_on = self.lcd_enabled();
                self.lcdc = val;
                let now_on = self.lcd_enabled();
                if was_on && !now_on {
                    log::debug!("LCD off at LY {}", self.ly);
                    self.mode = Mode::HBlank;
                    self.dot = 0;
                    self.ly = 0;
                    self.fifo.clear();
                    self.begin_frame();
                } else if !was_on && now_on {
                    log::debug!("LCD on");
                    self.mode = Mode::OamScan;
                    self.dot = 0;
                    self.ly = 0;
                    self.begin_frame();
                    self.update_lyc_compare();
                }
            }
            0xFF41 => self.stat = (self.stat & 0x07) | (val & 0x78),
            0xFF42 => self.scy = val,
            0xFF43 => self.scx = val,
            0xFF44 => {}
            0xFF45 => {
                self.lyc = val;
                self.update_lyc_compare();
            }
            0xFF46 => self.dma = val,
            0xFF47 => self.bgp = val,
            0xFF48 => self.obp0 = val,
            0xFF49 => self.obp1 = val,
            0xFF4A => self.wy = val,
            0xFF4B => self.wx = val,
            0xFF68 if self.cgb => self.bgpi = Self::sanitize_palette_index(val),
            0xFF69 if self.cgb => {
                let idx = Self::palette_ram_index(self.bgpi);
                self.bgpd[idx] = val;
                Self::step_palette_index(&mut self.bgpi);
            }
            0xFF6A if self.cgb => self.obpi = Self::sanitize_palette_index(val),
            0xFF6B if self.cgb => {
                let idx = Self::palette_ram_index(self.obpi);
                self.obpd[idx] = val;
                Self::step_palette_index(&mut self.obpi);
            }
            0xFF6C if self.cgb => self.opri = val & 0x01,
            _ => {}
        }
    }

    fn begin_frame(&mut self) {
        self.win_line_counter = 0;
        self.wy_triggered = false;
    }

    /// Collect up to 10 sprites visible on the current scanline, in the
    /// order they win priority.
    fn oam_scan(&mut self) {
        let height: i16 = if self.lcdc & 0x04 != 0 { 16 } else { 8 };
        let ly = self.ly as i16;
        self.sprite_count = 0;
        for i in 0..TOTAL_SPRITES {
            if self.sprite_count >= MAX_SPRITES_PER_LINE {
                break;
            }
            let base = i * 4;
            let y = self.oam[base] as i16 - 16;
            if ly >= y && ly < y + height {
                self.line_sprites[self.sprite_count] = Sprite {
                    x: self.oam[base + 1] as i16 - 8,
                    y,
                    tile: self.oam[base + 2],
                    flags: self.oam[base + 3],
                    oam_index: i,
                };
                self.sprite_count += 1;
            }
        }
        let sprites = &mut self.line_sprites[..self.sprite_count];
        if self.cgb && self.opri & 0x01 == 0 {
            sprites.sort_by_key(|s| s.oam_index);
        } else {
            sprites.sort_by_key(|s| (s.x, s.oam_index));
        }
    }

    fn start_transfer(&mut self) {
        self.oam_scan();
        self.mode = Mode::Transfer;
        self.fifo.clear();
        self.lx = 0;
        self.discard = self.scx & 0x07;
        self.window_active = false;
        self.fetcher.restart(false, -((self.scx & 0x07) as i16));
        #[cfg(feature = "ppu-trace")]
        log::trace!("LY {} transfer, {} sprites", self.ly, self.sprite_count);
    }

    fn window_triggers(&self) -> bool {
        !self.window_active
            && self.lcdc & 0x20 != 0
            && self.wy_triggered
            && self.wx <= WINDOW_X_MAX
            && self.lx as u16 + 7 >= self.wx as u16
    }

    /// One dot of pixel transfer: advance the fetcher, then shift at most
    /// one pixel out to the LCD. Returns true when the line is complete.
    fn transfer_dot(&mut self) -> bool {
        if self.window_triggers() {
            self.window_active = true;
            self.fifo.clear();
            self.discard = 7u8.saturating_sub(self.wx);
            self.fetcher.restart(true, self.wx as i16 - 7);
            return false;
        }

        self.fetch_step();

        if self.fifo.len() <= 8 {
            return false;
        }
        let Some(color) = self.fifo.pop() else {
            return false;
        };
        if self.discard > 0 {
            self.discard -= 1;
            return false;
        }
        let idx = self.ly as usize * SCREEN_WIDTH + self.lx as usize;
        self.framebuffer[idx] = color;
        self.lx += 1;
        self.lx as usize == SCREEN_WIDTH
    }

    fn enter_hblank(&mut self) {
        self.mode = Mode::HBlank;
        if self.window_active {
            self.win_line_counter = self.win_line_counter.wrapping_add(1);
        }
    }

    /// Advance by `dots` ticks of the dot clock. Returns true if HBlank was
    /// entered during the call.
    pub fn step(&mut self, dots: u32, irq: &mut InterruptController) -> bool {
        let mut hblank_entered = false;
        if !self.lcd_enabled() {
            return false;
        }
        for _ in 0..dots {
            match self.mode {
                Mode::OamScan => {
                    if self.dot == 0 && self.ly == self.wy {
                        self.wy_triggered = true;
                    }
                    if self.dot + 1 == OAM_SCAN_DOTS {
                        self.start_transfer();
                    }
                }
                Mode::Transfer => {
                    if self.transfer_dot() {
                        self.enter_hblank();
                        hblank_entered = true;
                    }
                }
                Mode::HBlank | Mode::VBlank => {}
            }

            self.dot += 1;
            if self.dot == DOTS_PER_LINE {
                self.dot = 0;
                if self.mode == Mode::Transfer {
                    log::warn!("pixel transfer overran line {}", self.ly);
                    self.enter_hblank();
                }
                self.next_line(irq);
            }

            self.update_lyc_compare();
            self.update_stat_irq(irq);
        }
        hblank_entered
    }

    fn next_line(&mut self, irq: &mut InterruptController) {
        self.ly += 1;
        if self.ly == SCREEN_HEIGHT as u8 {
            self.mode = Mode::VBlank;
            self.frame_ready = true;
            self.frame_counter = self.frame_counter.wrapping_add(1);
            irq.request(Interrupt::VBlank);
        } else if self.ly == LINES_PER_FRAME {
            self.ly = 0;
            self.mode = Mode::OamScan;
            self.begin_frame();
        } else if self.ly < SCREEN_HEIGHT as u8 {
            self.mode = Mode::OamScan;
        }
    }

    fn update_stat_irq(&mut self, irq: &mut InterruptController) {
        let coincidence = self.lyc_eq_ly && self.stat & 0x40 != 0;
        let mode_signal = match self.mode {
            Mode::HBlank => self.stat & 0x08 != 0,
            Mode::VBlank => self.stat & 0x10 != 0,
            Mode::OamScan => self.stat & 0x20 != 0,
            Mode::Transfer => false,
        };
        let current = coincidence || mode_signal;
        if current && !self.stat_irq_line {
            irq.request(Interrupt::LcdStat);
        }
        self.stat_irq_line = current;
    }
}
