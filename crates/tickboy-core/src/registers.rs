// CPU flag bits as documented in gbdev.io/pandocs/The_CPU_Flags.html
pub const FLAG_Z: u8 = 0x80; // Zero
pub const FLAG_N: u8 = 0x40; // Subtract
pub const FLAG_H: u8 = 0x20; // Half Carry
pub const FLAG_C: u8 = 0x10; // Carry

// Post-boot CPU state from gbdev.io/pandocs/Power_Up_State.html
const BOOT_PC: u16 = 0x0100;
const BOOT_SP: u16 = 0xFFFE;

const DMG_BOOT: [u8; 8] = [0x01, 0xB0, 0x00, 0x13, 0x00, 0xD8, 0x01, 0x4D];
const CGB_BOOT: [u8; 8] = [0x11, 0x80, 0x00, 0x00, 0x00, 0x08, 0x00, 0x7C];

/// 8-bit register names, in opcode encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg8 {
    A,
    F,
    B,
    C,
    D,
    E,
    H,
    L,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg16 {
    AF,
    BC,
    DE,
    HL,
    SP,
}

/// The LR35902 register file. Pairs are views over the 8-bit halves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub sp: u16,
    pub pc: u16,
}

impl Registers {
    /// Register contents left behind by the boot ROM.
    pub fn post_boot(cgb: bool) -> Self {
        let [a, f, b, c, d, e, h, l] = if cgb { CGB_BOOT } else { DMG_BOOT };
        Self {
            a,
            f,
            b,
            c,
            d,
            e,
            h,
            l,
            sp: BOOT_SP,
            pc: BOOT_PC,
        }
    }

    pub fn get8(&self, r: Reg8) -> u8 {
        match r {
            Reg8::A => self.a,
            Reg8::F => self.f,
            Reg8::B => self.b,
            Reg8::C => self.c,
            Reg8::D => self.d,
            Reg8::E => self.e,
            Reg8::H => self.h,
            Reg8::L => self.l,
        }
    }

    pub fn set8(&mut self, r: Reg8, val: u8) {
        match r {
            Reg8::A => self.a = val,
            Reg8::F => self.f = val & 0xF0,
            Reg8::B => self.b = val,
            Reg8::C => self.c = val,
            Reg8::D => self.d = val,
            Reg8::E => self.e = val,
            Reg8::H => self.h = val,
            Reg8::L => self.l = val,
        }
    }

    pub fn get16(&self, r: Reg16) -> u16 {
        match r {
            Reg16::AF => self.af(),
            Reg16::BC => self.bc(),
            Reg16::DE => self.de(),
            Reg16::HL => self.hl(),
            Reg16::SP => self.sp,
        }
    }

    pub fn set16(&mut self, r: Reg16, val: u16) {
        match r {
            Reg16::AF => self.set_af(val),
            Reg16::BC => self.set_bc(val),
            Reg16::DE => self.set_de(val),
            Reg16::HL => self.set_hl(val),
            Reg16::SP => self.sp = val,
        }
    }

    pub fn af(&self) -> u16 {
        u16::from_be_bytes([self.a, self.f])
    }

    pub fn bc(&self) -> u16 {
        u16::from_be_bytes([self.b, self.c])
    }

    pub fn de(&self) -> u16 {
        u16::from_be_bytes([self.d, self.e])
    }

    pub fn hl(&self) -> u16 {
        u16::from_be_bytes([self.h, self.l])
    }

    pub fn set_af(&mut self, val: u16) {
        let [a, f] = val.to_be_bytes();
        self.a = a;
        self.f = f & 0xF0;
    }

    pub fn set_bc(&mut self, val: u16) {
        [self.b, self.c] = val.to_be_bytes();
    }

    pub fn set_de(&mut self, val: u16) {
        [self.d, self.e] = val.to_be_bytes();
    }

    pub fn set_hl(&mut self, val: u16) {
        [self.h, self.l] = val.to_be_bytes();
    }

    pub fn flag(&self, mask: u8) -> bool {
        self.f & mask != 0
    }

    pub fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.f |= mask;
        } else {
            self.f &= !mask;
        }
        self.f &= 0xF0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_writes_reach_halves() {
        let mut r = Registers::default();
        r.set_bc(0x1234);
        assert_eq!((r.b, r.c), (0x12, 0x34));
        r.l = 0xCD;
        r.h = 0xAB;
        assert_eq!(r.hl(), 0xABCD);
        r.set16(Reg16::DE, 0xBEEF);
        assert_eq!(r.get8(Reg8::D), 0xBE);
        assert_eq!(r.get8(Reg8::E), 0xEF);
    }

    #[test]
    fn flag_low_nibble_is_always_zero() {
        let mut r = Registers::default();
        r.set_af(0x12FF);
        assert_eq!(r.f, 0xF0);
        assert_eq!(r.af(), 0x12F0);
        r.set8(Reg8::F, 0x0F);
        assert_eq!(r.f, 0x00);
    }

    #[test]
    fn post_boot_values() {
        let dmg = Registers::post_boot(false);
        assert_eq!(dmg.af(), 0x01B0);
        assert_eq!(dmg.bc(), 0x0013);
        assert_eq!(dmg.de(), 0x00D8);
        assert_eq!(dmg.hl(), 0x014D);
        assert_eq!(dmg.sp, 0xFFFE);
        assert_eq!(dmg.pc, 0x0100);
        let cgb = Registers::post_boot(true);
        assert_eq!(cgb.af(), 0x1180);
        assert_eq!(cgb.hl(), 0x007C);
    }
}
