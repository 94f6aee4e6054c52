use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::LoadError;

const HEADER_END: usize = 0x0150;
const ROM_BANK_SIZE: usize = 0x4000;
const RAM_BANK_SIZE: usize = 0x2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbcType {
    NoMbc,
    Mbc1,
    Mbc3,
}

/// Decoded cartridge header (0x0134..=0x014F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub cgb_flag: u8,
    pub new_licensee: [u8; 2],
    pub sgb_flag: u8,
    pub cart_type: u8,
    pub rom_size_code: u8,
    pub ram_size_code: u8,
    pub destination: u8,
    pub old_licensee: u8,
    pub version: u8,
    pub header_checksum: u8,
    pub global_checksum: u16,
}

impl Header {
    /// Parse and verify the header. Fails on short images and on a header
    /// checksum that does not match the bytes it covers.
    pub fn parse(data: &[u8]) -> Result<Self, LoadError> {
        if data.len() < HEADER_END {
            return Err(LoadError::Truncated { len: data.len() });
        }
        let computed = header_checksum(data);
        let expected = data[0x014D];
        if computed != expected {
            return Err(LoadError::ChecksumMismatch { expected, computed });
        }

        // 0x0143 doubles as the last title byte on pre-CGB carts.
        let title_end = if data[0x0143] & 0x80 != 0 { 0x0143 } else { 0x0144 };
        let mut title = &data[0x0134..title_end];
        if let Some(pos) = title.iter().position(|&b| b == 0) {
            title = &title[..pos];
        }
        Ok(Self {
            title: String::from_utf8_lossy(title).trim().to_string(),
            cgb_flag: data[0x0143],
            new_licensee: [data[0x0144], data[0x0145]],
            sgb_flag: data[0x0146],
            cart_type: data[0x0147],
            rom_size_code: data[0x0148],
            ram_size_code: data[0x0149],
            destination: data[0x014A],
            old_licensee: data[0x014B],
            version: data[0x014C],
            header_checksum: expected,
            global_checksum: u16::from_be_bytes([data[0x014E], data[0x014F]]),
        })
    }

    pub fn cgb_supported(&self) -> bool {
        self.cgb_flag & 0x80 != 0
    }

    pub fn cgb_only(&self) -> bool {
        self.cgb_flag == 0xC0
    }

    pub fn mbc_type(&self) -> Result<MbcType, LoadError> {
        match self.cart_type {
            0x00 | 0x08 | 0x09 => Ok(MbcType::NoMbc),
            0x01..=0x03 => Ok(MbcType::Mbc1),
            0x0F..=0x13 => Ok(MbcType::Mbc3),
            other => Err(LoadError::UnsupportedController(other)),
        }
    }

    pub fn has_battery(&self) -> bool {
        matches!(
            self.cart_type,
            0x03 | 0x06 | 0x09 | 0x0D | 0x0F | 0x10 | 0x13 | 0x1B | 0x1E | 0x22 | 0xFF
        )
    }

    pub fn has_rtc(&self) -> bool {
        matches!(self.cart_type, 0x0F | 0x10)
    }

    /// ROM size advertised by the header, in 16 KiB banks.
    pub fn rom_banks(&self) -> usize {
        2usize << self.rom_size_code.min(8)
    }

    pub fn ram_size(&self) -> usize {
        match self.ram_size_code {
            0x00 => 0,
            0x01 => 0x0800,
            0x02 => 0x2000,
            0x03 => 4 * 0x2000,
            0x04 => 16 * 0x2000,
            0x05 => 8 * 0x2000,
            other => {
                log::warn!("unknown RAM size code {other:02X}, assuming 8 KiB");
                0x2000
            }
        }
    }
}

/// Rolling checksum over 0x0134..=0x014C.
pub fn header_checksum(data: &[u8]) -> u8 {
    data[0x0134..=0x014C]
        .iter()
        .fold(0u8, |x, &b| x.wrapping_sub(b).wrapping_sub(1))
}

#[derive(Debug, Clone)]
enum MbcState {
    NoMbc,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        mode: u8,
        ram_enable: bool,
    },
    Mbc3 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enable: bool,
        rtc: Option<Rtc>,
        latch_pending: bool,
    },
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    pub rom: Vec<u8>,
    pub ram: Vec<u8>,
    pub header: Header,
    pub mbc: MbcType,
    mbc_state: MbcState,
    dirty: bool,
}

impl Cartridge {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, LoadError> {
        let header = Header::parse(&data)?;
        let mbc = header.mbc_type()?;
        let mbc_state = match mbc {
            MbcType::NoMbc => MbcState::NoMbc,
            MbcType::Mbc1 => MbcState::Mbc1 {
                rom_bank: 1,
                ram_bank: 0,
                mode: 0,
                ram_enable: false,
            },
            MbcType::Mbc3 => MbcState::Mbc3 {
                rom_bank: 1,
                ram_bank: 0,
                ram_enable: false,
                rtc: header.has_rtc().then(|| Rtc::new(SystemTime::now())),
                latch_pending: false,
            },
        };
        let banks = data.len() / ROM_BANK_SIZE;
        if banks != header.rom_banks() {
            log::warn!(
                "ROM is {} banks but header declares {}",
                banks,
                header.rom_banks()
            );
        }
        log::debug!(
            "loaded cartridge {:?} (type {:02X}, {:?}, {} KiB RAM, CGB flag {:02X})",
            header.title,
            header.cart_type,
            mbc,
            header.ram_size() / 1024,
            header.cgb_flag
        );

        Ok(Self {
            rom: data,
            ram: vec![0; header.ram_size()],
            header,
            mbc,
            mbc_state,
            dirty: false,
        })
    }

    /// Return the controller registers to their power-on values. RAM and
    /// the RTC survive, as they would across a real power cycle.
    pub fn power_cycle(&mut self) {
        match &mut self.mbc_state {
            MbcState::NoMbc => {}
            MbcState::Mbc1 {
                rom_bank,
                ram_bank,
                mode,
                ram_enable,
            } => {
                *rom_bank = 1;
                *ram_bank = 0;
                *mode = 0;
                *ram_enable = false;
            }
            MbcState::Mbc3 {
                rom_bank,
                ram_bank,
                ram_enable,
                latch_pending,
                ..
            } => {
                *rom_bank = 1;
                *ram_bank = 0;
                *ram_enable = false;
                *latch_pending = false;
            }
        }
    }

    pub fn title(&self) -> &str {
        &self.header.title
    }

    pub fn has_battery(&self) -> bool {
        self.header.has_battery() && !self.ram.is_empty()
    }

    fn rom_bank_count(&self) -> usize {
        (self.rom.len() / ROM_BANK_SIZE).max(1)
    }

    fn ram_bank_count(&self) -> usize {
        self.ram.len().div_ceil(RAM_BANK_SIZE)
    }

    /// Bank currently mapped at 0x4000..=0x7FFF.
    pub fn rom_bank(&self) -> usize {
        let count = self.rom_bank_count();
        match &self.mbc_state {
            MbcState::NoMbc => 1,
            MbcState::Mbc1 {
                rom_bank, ram_bank, ..
            } => {
                let mut bank = ((*ram_bank as usize & 0x03) << 5) | (*rom_bank as usize & 0x1F);
                if bank & 0x1F == 0 {
                    bank += 1;
                }
                bank % count
            }
            MbcState::Mbc3 { rom_bank, .. } => {
                let bank = (*rom_bank as usize & 0x7F).max(1);
                bank % count
            }
        }
    }

    /// Bank currently mapped at 0x0000..=0x3FFF.
    fn low_rom_bank(&self) -> usize {
        match &self.mbc_state {
            MbcState::Mbc1 {
                ram_bank, mode: 1, ..
            } => ((*ram_bank as usize & 0x03) << 5) % self.rom_bank_count(),
            _ => 0,
        }
    }

    fn ram_index(&self, addr: u16) -> Option<usize> {
        let offset = addr as usize - 0xA000;
        let bank = match &self.mbc_state {
            MbcState::NoMbc => 0,
            MbcState::Mbc1 { ram_bank, mode, .. } => {
                if *mode == 0 || self.ram_bank_count() == 0 {
                    0
                } else {
                    *ram_bank as usize % self.ram_bank_count()
                }
            }
            MbcState::Mbc3 { ram_bank, .. } => *ram_bank as usize & 0x03,
        };
        let idx = bank * RAM_BANK_SIZE + offset;
        (idx < self.ram.len()).then_some(idx)
    }

    fn ram_enabled(&self) -> bool {
        match &self.mbc_state {
            MbcState::NoMbc => true,
            MbcState::Mbc1 { ram_enable, .. } | MbcState::Mbc3 { ram_enable, .. } => *ram_enable,
        }
    }

    pub fn read(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x3FFF => {
                let offset = self.low_rom_bank() * ROM_BANK_SIZE + addr as usize;
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            0x4000..=0x7FFF => {
                let offset = self.rom_bank() * ROM_BANK_SIZE + (addr as usize - 0x4000);
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            0xA000..=0xBFFF => {
                if !self.ram_enabled() {
                    return 0xFF;
                }
                if let MbcState::Mbc3 { ram_bank, rtc, .. } = &self.mbc_state
                    && (0x08..=0x0C).contains(ram_bank)
                {
                    return rtc.as_ref().map_or(0xFF, |r| r.read_latched(*ram_bank));
                }
                self.ram_index(addr)
                    .map_or(0xFF, |idx| self.ram[idx])
            }
            _ => 0xFF,
        }
    }

    pub fn write(&mut self, addr: u16, val: u8) {
        match (&mut self.mbc_state, addr) {
            (MbcState::Mbc1 { ram_enable, .. }, 0x0000..=0x1FFF)
            | (MbcState::Mbc3 { ram_enable, .. }, 0x0000..=0x1FFF) => {
                *ram_enable = val & 0x0F == 0x0A;
            }
            (MbcState::Mbc1 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x1F;
            }
            (MbcState::Mbc3 { rom_bank, .. }, 0x2000..=0x3FFF) => {
                *rom_bank = val & 0x7F;
            }
            (MbcState::Mbc1 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val & 0x03;
            }
            (MbcState::Mbc3 { ram_bank, .. }, 0x4000..=0x5FFF) => {
                *ram_bank = val;
            }
            (MbcState::Mbc1 { mode, .. }, 0x6000..=0x7FFF) => {
                *mode = val & 0x01;
            }
            (
                MbcState::Mbc3 {
                    latch_pending, rtc, ..
                },
                0x6000..=0x7FFF,
            ) => {
                if val == 1 && *latch_pending
                    && let Some(rtc) = rtc
                {
                    rtc.latch();
                }
                *latch_pending = val == 0;
            }
            (
                MbcState::Mbc3 {
                    ram_enable: true,
                    ram_bank: bank @ 0x08..=0x0C,
                    rtc: Some(rtc),
                    ..
                },
                0xA000..=0xBFFF,
            ) => {
                rtc.write_register(*bank, val);
                self.dirty = true;
            }
            (_, 0xA000..=0xBFFF) => {
                if !self.ram_enabled() {
                    return;
                }
                if let Some(idx) = self.ram_index(addr) {
                    self.ram[idx] = val;
                    self.dirty = true;
                }
            }
            _ => {}
        }
    }

    /// Advance the RTC by `cycles` ticks of the 4 MiHz reference clock.
    pub fn step_rtc(&mut self, cycles: u32) {
        if let Some(rtc) = self.rtc_mut() {
            rtc.step(cycles as u64);
        }
    }

    fn rtc_mut(&mut self) -> Option<&mut Rtc> {
        match &mut self.mbc_state {
            MbcState::Mbc3 { rtc: Some(rtc), .. } => Some(rtc),
            _ => None,
        }
    }

    pub fn has_rtc(&self) -> bool {
        matches!(&self.mbc_state, MbcState::Mbc3 { rtc: Some(_), .. })
    }

    /// Restore battery RAM from a previous save. Short images fill a prefix.
    pub fn load_battery(&mut self, data: &[u8]) {
        for (d, s) in self.ram.iter_mut().zip(data) {
            *d = *s;
        }
        if data.len() != self.ram.len() {
            log::warn!(
                "save image is {} bytes, cartridge RAM is {}",
                data.len(),
                self.ram.len()
            );
        }
        self.dirty = false;
    }

    /// True when battery RAM was written since the last flush.
    pub fn needs_flush(&self) -> bool {
        self.dirty && self.has_battery()
    }

    /// Battery RAM image if it changed since the last call, clearing the
    /// dirty flag.
    pub fn take_dirty_save(&mut self) -> Option<Vec<u8>> {
        if !self.needs_flush() {
            return None;
        }
        self.dirty = false;
        Some(self.ram.clone())
    }

    /// Battery RAM image regardless of the dirty flag.
    pub fn save_image(&self) -> Option<Vec<u8>> {
        self.has_battery().then(|| self.ram.clone())
    }

    /// RTC state in its on-disk format, stamped with the current time.
    pub fn rtc_image(&mut self) -> Option<Vec<u8>> {
        let rtc = self.rtc_mut()?;
        rtc.stamp(SystemTime::now());
        Some(rtc.to_bytes())
    }

    /// Restore RTC state and catch up on wall time since it was saved.
    pub fn load_rtc_image(&mut self, data: &[u8]) -> bool {
        let Some(rtc) = self.rtc_mut() else {
            return false;
        };
        if !rtc.restore(data) {
            return false;
        }
        rtc.catch_up(SystemTime::now());
        rtc.latch();
        true
    }
}

/// Clock reference: the RTC crystal is treated as running in lockstep with
/// the 4 MiHz system clock.
const RTC_CYCLES_PER_SECOND: u32 = 4_194_304;

const RTC_MAGIC: &[u8; 4] = b"TBRT";
const RTC_VERSION: u8 = 1;
/// magic, version, saved-at seconds, subsecond cycles, s/m/h, day, flags
const RTC_FILE_LEN: usize = 4 + 1 + 8 + 4 + 3 + 2 + 1;

const DAY_HIGH: u8 = 0x01;
const HALT: u8 = 0x40;
const DAY_CARRY: u8 = 0x80;

/// One copy of the five clock registers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClockRegs {
    sec: u8,
    min: u8,
    hour: u8,
    /// 9-bit day counter
    day: u16,
    halted: bool,
    day_carry: bool,
}

impl ClockRegs {
    fn read(&self, reg: u8) -> u8 {
        match reg {
            0x08 => self.sec,
            0x09 => self.min,
            0x0A => self.hour,
            0x0B => self.day as u8,
            0x0C => self.flags(),
            _ => 0xFF,
        }
    }

    fn flags(&self) -> u8 {
        let mut out = (self.day >> 8) as u8 & DAY_HIGH;
        if self.halted {
            out |= HALT;
        }
        if self.day_carry {
            out |= DAY_CARRY;
        }
        out
    }

    fn set_flags(&mut self, val: u8) {
        self.day = (self.day & 0x00FF) | (u16::from(val & DAY_HIGH) << 8);
        self.halted = val & HALT != 0;
        self.day_carry = val & DAY_CARRY != 0;
    }

    /// Add `secs` seconds. Whole minutes are taken in one step while the
    /// seconds register holds a real value.
    fn advance(&mut self, mut secs: u64) {
        while secs > 0 {
            if secs >= 60 && self.sec < 60 {
                secs -= 60;
                self.carry_minute();
            } else {
                secs -= 1;
                if roll(&mut self.sec, 59, 0x3F) {
                    self.carry_minute();
                }
            }
        }
    }

    fn carry_minute(&mut self) {
        if roll(&mut self.min, 59, 0x3F) && roll(&mut self.hour, 23, 0x1F) {
            if self.day >= 0x01FF {
                self.day = 0;
                self.day_carry = true;
            } else {
                self.day += 1;
            }
        }
    }
}

/// Count a register up by one. Only passing `last` carries; values the
/// guest wrote beyond it count on to the register width and wrap silently.
fn roll(reg: &mut u8, last: u8, mask: u8) -> bool {
    if *reg == last {
        *reg = 0;
        true
    } else {
        *reg = reg.wrapping_add(1) & mask;
        false
    }
}

/// MBC3 real-time clock: live counters, the latched copy the guest reads,
/// and the wall-clock stamp used to catch up across sessions.
#[derive(Debug, Clone)]
struct Rtc {
    live: ClockRegs,
    latched: ClockRegs,
    /// Cycles into the current second
    phase: u32,
    stamped_at: SystemTime,
}

impl Rtc {
    fn new(now: SystemTime) -> Self {
        Self {
            live: ClockRegs::default(),
            latched: ClockRegs::default(),
            phase: 0,
            stamped_at: now,
        }
    }

    fn latch(&mut self) {
        self.latched = self.live;
    }

    fn read_latched(&self, reg: u8) -> u8 {
        self.latched.read(reg)
    }

    /// Guest write. The latched copy follows immediately so the new value
    /// reads back without a latch sequence.
    fn write_register(&mut self, reg: u8, val: u8) {
        let live = &mut self.live;
        match reg {
            0x08 => {
                live.sec = val & 0x3F;
                self.phase = 0;
            }
            0x09 => live.min = val & 0x3F,
            0x0A => live.hour = val & 0x1F,
            0x0B => live.day = (live.day & 0x0100) | u16::from(val),
            0x0C => live.set_flags(val),
            _ => {}
        }
        self.latch();
    }

    fn step(&mut self, cycles: u64) {
        if self.live.halted {
            return;
        }
        let total = u64::from(self.phase) + cycles;
        let per_sec = u64::from(RTC_CYCLES_PER_SECOND);
        self.phase = (total % per_sec) as u32;
        self.live.advance(total / per_sec);
    }

    /// Run the clock forward by the wall time elapsed since the last stamp.
    fn catch_up(&mut self, now: SystemTime) {
        let elapsed = now.duration_since(self.stamped_at).unwrap_or_default();
        self.stamped_at = now;
        let per_sec = u64::from(RTC_CYCLES_PER_SECOND);
        let cycles = elapsed.as_secs().saturating_mul(per_sec)
            + u64::from(elapsed.subsec_nanos()) * per_sec / 1_000_000_000;
        self.step(cycles);
    }

    fn stamp(&mut self, now: SystemTime) {
        self.stamped_at = now;
    }

    fn to_bytes(&self) -> Vec<u8> {
        let saved_at = self
            .stamped_at
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let live = &self.live;
        let mut out = Vec::with_capacity(RTC_FILE_LEN);
        out.extend_from_slice(RTC_MAGIC);
        out.push(RTC_VERSION);
        out.extend_from_slice(&saved_at.to_le_bytes());
        out.extend_from_slice(&self.phase.to_le_bytes());
        out.extend_from_slice(&[live.sec, live.min, live.hour]);
        out.extend_from_slice(&live.day.to_le_bytes());
        out.push(live.flags());
        out
    }

    fn restore(&mut self, data: &[u8]) -> bool {
        let Some(body) = data
            .strip_prefix(RTC_MAGIC.as_slice())
            .and_then(|rest| rest.strip_prefix(&[RTC_VERSION]))
        else {
            return false;
        };
        if data.len() < RTC_FILE_LEN {
            return false;
        }
        let (saved_at, rest) = body.split_at(8);
        let (phase, regs) = rest.split_at(4);
        let saved_at = u64::from_le_bytes(saved_at.try_into().unwrap_or_default());
        let phase = u32::from_le_bytes(phase.try_into().unwrap_or_default());

        let mut live = ClockRegs {
            sec: regs[0] & 0x3F,
            min: regs[1] & 0x3F,
            hour: regs[2] & 0x1F,
            day: u16::from(regs[3]),
            ..ClockRegs::default()
        };
        live.set_flags(regs[5]);
        live.day |= u16::from(regs[4] & 0x01) << 8;

        self.live = live;
        self.phase = phase % RTC_CYCLES_PER_SECOND;
        self.stamped_at = UNIX_EPOCH + Duration::from_secs(saved_at);
        self.latch();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECOND: u64 = RTC_CYCLES_PER_SECOND as u64;

    #[test]
    fn out_of_range_values_wrap_without_carry() {
        let mut regs = ClockRegs {
            sec: 59,
            min: 60,
            ..ClockRegs::default()
        };
        regs.advance(1);
        assert_eq!((regs.sec, regs.min), (0, 61));

        regs.sec = 63;
        regs.min = 5;
        regs.advance(1);
        assert_eq!((regs.sec, regs.min), (0, 5));
    }

    #[test]
    fn whole_minute_skip_matches_ticking() {
        let start = ClockRegs {
            sec: 17,
            min: 58,
            hour: 23,
            day: 3,
            ..ClockRegs::default()
        };
        let mut fast = start;
        fast.advance(3 * 3600 + 125);
        let mut slow = start;
        for _ in 0..3 * 3600 + 125 {
            slow.advance(1);
        }
        assert_eq!(fast, slow);
        assert_eq!((fast.sec, fast.min, fast.hour, fast.day), (22, 0, 3, 4));
    }

    #[test]
    fn halt_freezes_counting() {
        let mut rtc = Rtc::new(UNIX_EPOCH);
        rtc.phase = RTC_CYCLES_PER_SECOND - 10_000;

        rtc.write_register(0x0C, HALT);
        rtc.step(SECOND * 2);
        assert_eq!(rtc.live.sec, 0);

        rtc.write_register(0x0C, 0x00);
        rtc.step(9_999);
        assert_eq!(rtc.live.sec, 0);
        rtc.step(1);
        assert_eq!(rtc.live.sec, 1);
    }

    #[test]
    fn seconds_write_restarts_the_second() {
        let mut rtc = Rtc::new(UNIX_EPOCH);
        rtc.phase = 1234;
        rtc.write_register(0x09, 0x01);
        assert_eq!(rtc.phase, 1234);
        rtc.write_register(0x08, 0x02);
        assert_eq!(rtc.phase, 0);
    }

    #[test]
    fn day_overflow_sets_carry() {
        let mut regs = ClockRegs {
            sec: 59,
            min: 59,
            hour: 23,
            day: 0x01FF,
            ..ClockRegs::default()
        };
        regs.advance(1);
        assert_eq!(regs.day, 0);
        assert!(regs.day_carry);
        assert_eq!(regs.flags() & DAY_CARRY, DAY_CARRY);
    }

    #[test]
    fn catch_up_uses_wall_time() {
        let mut rtc = Rtc::new(UNIX_EPOCH);
        rtc.catch_up(UNIX_EPOCH + Duration::from_secs(90));
        assert_eq!((rtc.live.min, rtc.live.sec), (1, 30));
    }

    #[test]
    fn saved_image_restores_registers() {
        let mut rtc = Rtc::new(UNIX_EPOCH);
        rtc.write_register(0x0A, 13);
        rtc.write_register(0x0B, 0x23);
        rtc.write_register(0x0C, HALT | DAY_HIGH);
        let image = rtc.to_bytes();
        assert_eq!(image.len(), RTC_FILE_LEN);

        let mut restored = Rtc::new(UNIX_EPOCH);
        assert!(restored.restore(&image));
        assert_eq!(restored.live, rtc.live);
        assert_eq!(restored.read_latched(0x0B), 0x23);
        assert_eq!(restored.read_latched(0x0C), HALT | DAY_HIGH);
        assert!(!restored.restore(b"nope"));
        assert!(!restored.restore(&image[..10]));
    }
}
