use crate::{
    cartridge::Cartridge,
    cpu::Cpu,
    error::EmuError,
    joypad::Button,
    mmu::Mmu,
    ppu::{DOTS_PER_FRAME, SCREEN_HEIGHT, SCREEN_WIDTH},
};

/// Hardware to emulate for a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeSelect {
    /// Color hardware when the header advertises CGB support.
    #[default]
    Auto,
    /// Monochrome hardware, even for CGB-enhanced cartridges.
    Dmg,
}

/// A complete machine: CPU plus the bus that owns every peripheral.
pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    cgb: bool,
}

impl GameBoy {
    pub fn new(cart: Cartridge, mode: ModeSelect) -> Result<Self, EmuError> {
        let cgb = match mode {
            ModeSelect::Auto => cart.header.cgb_supported(),
            ModeSelect::Dmg if cart.header.cgb_only() => {
                return Err(EmuError::InvalidMode(format!(
                    "{:?} only runs on CGB hardware",
                    cart.title()
                )));
            }
            ModeSelect::Dmg => false,
        };
        log::debug!(
            "powering on {:?} in {} mode",
            cart.title(),
            if cgb { "CGB" } else { "DMG" }
        );
        Ok(Self {
            cpu: Cpu::new(cgb),
            mmu: Mmu::new(cart, cgb),
            cgb,
        })
    }

    pub fn is_cgb(&self) -> bool {
        self.cgb
    }

    /// Execute one instruction (or one idle cycle) and return the machine
    /// cycles it took.
    pub fn step(&mut self) -> Result<u32, EmuError> {
        self.cpu.step(&mut self.mmu)
    }

    /// Run until the PPU finishes a frame. With the LCD off no frame is ever
    /// published, so this returns after one frame's worth of dots instead.
    pub fn run_frame(&mut self) -> Result<(), EmuError> {
        self.mmu.ppu.clear_frame_flag();
        let mut dots: u32 = 0;
        while !self.mmu.ppu.frame_ready() {
            let cycles = self.step()?;
            let per_cycle = if self.mmu.double_speed() { 2 } else { 4 };
            dots = dots.saturating_add(cycles * per_cycle);
            if !self.mmu.ppu.lcd_enabled() && dots >= DOTS_PER_FRAME {
                break;
            }
        }
        Ok(())
    }

    /// Last completed frame, 0x00RRGGBB, row-major.
    pub fn framebuffer(&self) -> &[u32; SCREEN_WIDTH * SCREEN_HEIGHT] {
        self.mmu.ppu.framebuffer()
    }

    pub fn frame_count(&self) -> u64 {
        self.mmu.ppu.frames()
    }

    pub fn press(&mut self, button: Button) {
        self.mmu.press(button);
    }

    pub fn release(&mut self, button: Button) {
        self.mmu.release(button);
    }

    /// Bytes the guest shifted out over the link port since the last call.
    pub fn take_serial(&mut self) -> Vec<u8> {
        self.mmu.take_serial()
    }

    pub fn title(&self) -> &str {
        self.mmu.cart.title()
    }

    pub fn has_battery(&self) -> bool {
        self.mmu.cart.has_battery()
    }

    /// Battery RAM, if it changed since the last call.
    pub fn take_dirty_save(&mut self) -> Option<Vec<u8>> {
        self.mmu.cart.take_dirty_save()
    }

    /// Battery RAM, unconditionally.
    pub fn save_image(&self) -> Option<Vec<u8>> {
        self.mmu.cart.save_image()
    }

    pub fn load_battery(&mut self, data: &[u8]) {
        self.mmu.cart.load_battery(data);
    }

    pub fn rtc_image(&mut self) -> Option<Vec<u8>> {
        self.mmu.cart.rtc_image()
    }

    pub fn load_rtc(&mut self, data: &[u8]) -> bool {
        self.mmu.cart.load_rtc_image(data)
    }

    /// Power-cycle the machine. Cartridge RAM and RTC are kept.
    pub fn reset(&mut self) {
        let mut cart = self.mmu.cart.clone();
        cart.power_cycle();
        log::debug!("reset {:?}", cart.title());
        self.cpu = Cpu::new(self.cgb);
        self.mmu = Mmu::new(cart, self.cgb);
    }
}
