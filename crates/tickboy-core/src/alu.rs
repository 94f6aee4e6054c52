//! Flag arithmetic for the LR35902 ALU.
//!
//! Every function here is pure: it takes operands plus the incoming flag
//! byte and returns the result together with the new flag byte. The CPU
//! decides where results are stored.

use crate::registers::{FLAG_C, FLAG_H, FLAG_N, FLAG_Z};

fn z(val: u8) -> u8 {
    if val == 0 { FLAG_Z } else { 0 }
}

fn bit(cond: bool, mask: u8) -> u8 {
    if cond { mask } else { 0 }
}

/// ADD/ADC. `carry_in` is only honored for ADC.
pub fn add8(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as u16;
    let res = a as u16 + b as u16 + c;
    let half = (a & 0x0F) as u16 + (b & 0x0F) as u16 + c > 0x0F;
    let out = res as u8;
    (out, z(out) | bit(half, FLAG_H) | bit(res > 0xFF, FLAG_C))
}

/// SUB/SBC/CP. CP discards the result.
pub fn sub8(a: u8, b: u8, carry_in: bool) -> (u8, u8) {
    let c = carry_in as i16;
    let res = a as i16 - b as i16 - c;
    let half = (a & 0x0F) as i16 - (b & 0x0F) as i16 - c < 0;
    let out = res as u8;
    (out, z(out) | FLAG_N | bit(half, FLAG_H) | bit(res < 0, FLAG_C))
}

pub fn and8(a: u8, b: u8) -> (u8, u8) {
    let out = a & b;
    (out, z(out) | FLAG_H)
}

pub fn xor8(a: u8, b: u8) -> (u8, u8) {
    let out = a ^ b;
    (out, z(out))
}

pub fn or8(a: u8, b: u8) -> (u8, u8) {
    let out = a | b;
    (out, z(out))
}

/// 8-bit INC. Carry is preserved from `f`.
pub fn inc8(val: u8, f: u8) -> (u8, u8) {
    let out = val.wrapping_add(1);
    (out, (f & FLAG_C) | z(out) | bit(val & 0x0F == 0x0F, FLAG_H))
}

/// 8-bit DEC. Carry is preserved from `f`.
pub fn dec8(val: u8, f: u8) -> (u8, u8) {
    let out = val.wrapping_sub(1);
    (out, (f & FLAG_C) | FLAG_N | z(out) | bit(val & 0x0F == 0, FLAG_H))
}

/// ADD HL,rr: half-carry out of bit 11, carry out of bit 15, Z preserved.
pub fn add16(hl: u16, val: u16, f: u8) -> (u16, u8) {
    let res = hl as u32 + val as u32;
    let half = (hl & 0x0FFF) + (val & 0x0FFF) > 0x0FFF;
    (
        res as u16,
        (f & FLAG_Z) | bit(half, FLAG_H) | bit(res > 0xFFFF, FLAG_C),
    )
}

/// SP plus a signed offset, shared by ADD SP,e8 and LD HL,SP+e8. Flags come
/// from the unsigned low-byte addition; Z and N are cleared.
pub fn add_sp_e8(sp: u16, offset: u8) -> (u16, u8) {
    let val = offset as i8 as i16 as u16;
    let half = (sp & 0x0F) + (val & 0x0F) > 0x0F;
    let carry = (sp & 0xFF) + (val & 0xFF) > 0xFF;
    (
        sp.wrapping_add(val),
        bit(half, FLAG_H) | bit(carry, FLAG_C),
    )
}

/// Decimal adjust after a BCD add or subtract.
pub fn daa(a: u8, f: u8) -> (u8, u8) {
    let subtract = f & FLAG_N != 0;
    let mut correction = 0u8;
    let mut carry = false;
    if f & FLAG_H != 0 || (!subtract && (a & 0x0F) > 9) {
        correction |= 0x06;
    }
    if f & FLAG_C != 0 || (!subtract && a > 0x99) {
        correction |= 0x60;
        carry = true;
    }
    let out = if subtract {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };
    (out, z(out) | (f & FLAG_N) | bit(carry, FLAG_C))
}

/// The eight CB-space shift/rotate operations, in opcode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

/// Apply a shift or rotate. The bit shifted out lands in carry; SWAP
/// always clears carry.
pub fn shift(op: Shift, val: u8, f: u8) -> (u8, u8) {
    let carry_in = (f & FLAG_C != 0) as u8;
    let (out, carry) = match op {
        Shift::Rlc => (val.rotate_left(1), val & 0x80 != 0),
        Shift::Rrc => (val.rotate_right(1), val & 0x01 != 0),
        Shift::Rl => ((val << 1) | carry_in, val & 0x80 != 0),
        Shift::Rr => ((val >> 1) | (carry_in << 7), val & 0x01 != 0),
        Shift::Sla => (val << 1, val & 0x80 != 0),
        Shift::Sra => ((val >> 1) | (val & 0x80), val & 0x01 != 0),
        Shift::Swap => (val.rotate_left(4), false),
        Shift::Srl => (val >> 1, val & 0x01 != 0),
    };
    (out, z(out) | bit(carry, FLAG_C))
}

/// RLCA/RRCA/RLA/RRA: the CB form with Z forced clear.
pub fn shift_a(op: Shift, a: u8, f: u8) -> (u8, u8) {
    let (out, flags) = shift(op, a, f);
    (out, flags & FLAG_C)
}

/// BIT n: Z from the tested bit, H set, C untouched.
pub fn test_bit(val: u8, n: u8, f: u8) -> u8 {
    (f & FLAG_C) | FLAG_H | bit(val & (1 << n) == 0, FLAG_Z)
}
