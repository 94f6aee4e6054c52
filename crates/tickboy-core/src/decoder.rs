//! Table-driven instruction decoding.
//!
//! The instruction set lives in `opcodes.toml` next to this file. It is
//! parsed once per process and validated before first use; every
//! descriptor names its mnemonic, typed operands, byte length and dot cost.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::Deserialize;

use crate::error::{EmuError, RegisterDump};
use crate::registers::{Reg8, Reg16, Registers};

const OPCODE_TABLE_SRC: &str = include_str!("opcodes.toml");

/// Opcode byte that switches decoding to the CB table.
pub const CB_PREFIX: u8 = 0xCB;

const MAX_OPERANDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mnemonic {
    Nop,
    Ld,
    Ldh,
    Inc,
    Dec,
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Jr,
    Jp,
    Call,
    Ret,
    Reti,
    Rst,
    Push,
    Pop,
    Halt,
    Stop,
    Di,
    Ei,
    Prefix,
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
    Bit,
    Res,
    Set,
}

impl Mnemonic {
    fn takes_condition(self) -> bool {
        matches!(
            self,
            Mnemonic::Jp | Mnemonic::Jr | Mnemonic::Call | Mnemonic::Ret
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    NZ,
    Z,
    NC,
    C,
}

/// What an operand names, independent of how it is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Reg8(Reg8),
    Reg16(Reg16),
    /// `n8`: unsigned immediate byte.
    Imm8,
    /// `n16`: little-endian immediate word.
    Imm16,
    /// `a8`: high-page offset, used as `0xFF00 + n`.
    Addr8,
    /// `a16`: absolute address.
    Addr16,
    /// `e8`: signed displacement.
    Rel8,
    Cond(Cond),
    Bit(u8),
    Vector(u16),
}

/// Post-access adjustment of HL for `(HL+)` and `(HL-)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    None,
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub target: Target,
    /// True when the operand is dereferenced, as in `(HL)` or `(a16)`.
    pub indirect: bool,
    /// Number of trailing instruction bytes this operand consumes.
    pub bytes: u8,
    pub step: Step,
    /// Trailing bytes, little-endian, once decoded.
    pub value: u16,
}

const UNUSED_OPERAND: Operand = Operand {
    target: Target::Imm8,
    indirect: false,
    bytes: 0,
    step: Step::None,
    value: 0,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub opcode: u8,
    pub prefixed: bool,
    pub mnemonic: Mnemonic,
    pub operands: Vec<Operand>,
    pub bytes: u8,
    /// Dot cost. Conditional instructions list taken then not-taken.
    pub cycles: Vec<u16>,
}

impl Descriptor {
    /// Dot cost for the given branch outcome.
    pub fn cost(&self, taken: bool) -> u16 {
        match (taken, self.cycles.as_slice()) {
            (false, [_, not_taken]) => *not_taken,
            (_, [first, ..]) => *first,
            (_, []) => 0,
        }
    }
}

/// A descriptor plus the operand values read from the instruction stream.
#[derive(Debug, Clone, Copy)]
pub struct Decoded {
    pub desc: &'static Descriptor,
    operands: [Operand; MAX_OPERANDS],
}

impl Decoded {
    pub fn mnemonic(&self) -> Mnemonic {
        self.desc.mnemonic
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands[..self.desc.operands.len()]
    }
}

#[derive(Debug, Deserialize)]
struct RawTable {
    unprefixed: BTreeMap<String, RawEntry>,
    cbprefixed: BTreeMap<String, RawEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    mnemonic: Mnemonic,
    bytes: u8,
    cycles: Vec<u16>,
    #[serde(default)]
    operands: Vec<RawOperand>,
}

#[derive(Debug, Deserialize)]
struct RawOperand {
    name: String,
    #[serde(default = "default_immediate")]
    immediate: bool,
    #[serde(default)]
    bytes: u8,
    #[serde(default)]
    increment: bool,
    #[serde(default)]
    decrement: bool,
}

fn default_immediate() -> bool {
    true
}

/// Both opcode spaces, indexed by opcode byte.
#[derive(Debug)]
pub struct OpcodeTable {
    unprefixed: Vec<Option<Descriptor>>,
    cbprefixed: Vec<Option<Descriptor>>,
}

static TABLE: OnceLock<Result<OpcodeTable, String>> = OnceLock::new();

/// The process-wide opcode table, parsed on first use.
pub fn table() -> Result<&'static OpcodeTable, EmuError> {
    TABLE
        .get_or_init(|| OpcodeTable::parse(OPCODE_TABLE_SRC).map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|msg| EmuError::MalformedOpcodeTable(msg.clone()))
}

impl OpcodeTable {
    /// Parse and validate a table in the `opcodes.toml` format.
    pub fn parse(src: &str) -> Result<Self, EmuError> {
        let raw: RawTable =
            toml::from_str(src).map_err(|e| EmuError::MalformedOpcodeTable(e.to_string()))?;
        let unprefixed = build_space(raw.unprefixed, false)?;
        let cbprefixed = build_space(raw.cbprefixed, true)?;
        if cbprefixed.iter().any(Option::is_none) {
            return Err(malformed("CB table must define all 256 opcodes"));
        }
        match &unprefixed[CB_PREFIX as usize] {
            Some(d) if d.mnemonic == Mnemonic::Prefix => {}
            _ => return Err(malformed("0xCB must be the PREFIX entry")),
        }
        log::debug!(
            "opcode table loaded: {} unprefixed, {} CB-prefixed",
            unprefixed.iter().flatten().count(),
            cbprefixed.len()
        );
        Ok(Self {
            unprefixed,
            cbprefixed,
        })
    }

    pub fn lookup(&self, opcode: u8, prefixed: bool) -> Option<&Descriptor> {
        let space = if prefixed {
            &self.cbprefixed
        } else {
            &self.unprefixed
        };
        space[opcode as usize].as_ref()
    }

    /// Opcodes with no entry in the unprefixed space.
    pub fn holes(&self) -> Vec<u8> {
        (0..=255u8)
            .filter(|&op| self.unprefixed[op as usize].is_none())
            .collect()
    }

    /// Decode one instruction. `fetch` yields successive instruction bytes
    /// and is expected to charge one machine cycle per call. `at` is the
    /// register state before the opcode fetch, used for diagnostics.
    pub fn decode(
        &'static self,
        at: Registers,
        mut fetch: impl FnMut() -> u8,
    ) -> Result<Decoded, EmuError> {
        let mut opcode = fetch();
        let mut prefixed = false;
        if opcode == CB_PREFIX {
            opcode = fetch();
            prefixed = true;
        }
        let desc = self
            .lookup(opcode, prefixed)
            .ok_or_else(|| EmuError::UnknownOpcode {
                opcode,
                prefixed,
                pc: at.pc,
                regs: RegisterDump(at),
            })?;

        let mut operands = [UNUSED_OPERAND; MAX_OPERANDS];
        for (slot, op) in operands.iter_mut().zip(&desc.operands) {
            *slot = *op;
            slot.value = match op.bytes {
                0 => 0,
                1 => fetch() as u16,
                _ => {
                    let lo = fetch() as u16;
                    let hi = fetch() as u16;
                    (hi << 8) | lo
                }
            };
        }
        Ok(Decoded { desc, operands })
    }
}

fn malformed(msg: impl Into<String>) -> EmuError {
    EmuError::MalformedOpcodeTable(msg.into())
}

fn build_space(
    entries: BTreeMap<String, RawEntry>,
    prefixed: bool,
) -> Result<Vec<Option<Descriptor>>, EmuError> {
    let mut space: Vec<Option<Descriptor>> = vec![None; 256];
    for (key, entry) in entries {
        let opcode = key
            .strip_prefix("0x")
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| malformed(format!("bad opcode key {key:?}")))?;
        let desc = build_descriptor(opcode, prefixed, entry)
            .map_err(|msg| malformed(format!("{key}: {msg}")))?;
        space[opcode as usize] = Some(desc);
    }
    Ok(space)
}

fn build_descriptor(opcode: u8, prefixed: bool, entry: RawEntry) -> Result<Descriptor, String> {
    let count = entry.operands.len();
    if count > MAX_OPERANDS {
        return Err(format!("{count} operands"));
    }
    let operands = entry
        .operands
        .iter()
        .enumerate()
        .map(|(i, raw)| build_operand(raw, entry.mnemonic, i, count))
        .collect::<Result<Vec<_>, _>>()?;

    let trailing: u8 = operands.iter().map(|op| op.bytes).sum();
    let expected = if prefixed { 2 } else { 1 + trailing };
    if prefixed && trailing != 0 {
        return Err("CB instructions take no immediate bytes".into());
    }
    if entry.bytes != expected {
        return Err(format!(
            "length {} disagrees with operands ({expected})",
            entry.bytes
        ));
    }

    let conditional = operands
        .iter()
        .any(|op| matches!(op.target, Target::Cond(_)));
    let want = if conditional { 2 } else { 1 };
    if entry.cycles.len() != want {
        return Err(format!("expected {want} cycle costs"));
    }
    if entry.cycles.iter().any(|c| *c == 0 || c % 4 != 0) {
        return Err("cycle costs must be whole machine cycles".into());
    }

    Ok(Descriptor {
        opcode,
        prefixed,
        mnemonic: entry.mnemonic,
        operands,
        bytes: entry.bytes,
        cycles: entry.cycles,
    })
}

fn build_operand(
    raw: &RawOperand,
    mnemonic: Mnemonic,
    index: usize,
    count: usize,
) -> Result<Operand, String> {
    let target = parse_target(&raw.name, mnemonic, index, count)?;
    let want_bytes = match target {
        Target::Imm8 | Target::Addr8 | Target::Rel8 => 1,
        Target::Imm16 | Target::Addr16 => 2,
        _ => 0,
    };
    if raw.bytes != want_bytes {
        return Err(format!("operand {} needs {want_bytes} bytes", raw.name));
    }
    let step = match (raw.increment, raw.decrement) {
        (false, false) => Step::None,
        (true, false) => Step::Inc,
        (false, true) => Step::Dec,
        (true, true) => return Err(format!("operand {} both increments and decrements", raw.name)),
    };
    if step != Step::None && (target != Target::Reg16(Reg16::HL) || raw.immediate) {
        return Err("only (HL) may auto-step".into());
    }
    Ok(Operand {
        target,
        indirect: !raw.immediate,
        bytes: raw.bytes,
        step,
        value: 0,
    })
}

fn parse_target(name: &str, mnemonic: Mnemonic, index: usize, count: usize) -> Result<Target, String> {
    // "C" is the carry condition only in the leading slot of a branch.
    let branch_slot =
        mnemonic.takes_condition() && index == 0 && (mnemonic == Mnemonic::Ret || count == 2);
    let target = match name {
        "A" => Target::Reg8(Reg8::A),
        "B" => Target::Reg8(Reg8::B),
        "C" if branch_slot => Target::Cond(Cond::C),
        "C" => Target::Reg8(Reg8::C),
        "D" => Target::Reg8(Reg8::D),
        "E" => Target::Reg8(Reg8::E),
        "H" => Target::Reg8(Reg8::H),
        "L" => Target::Reg8(Reg8::L),
        "AF" => Target::Reg16(Reg16::AF),
        "BC" => Target::Reg16(Reg16::BC),
        "DE" => Target::Reg16(Reg16::DE),
        "HL" => Target::Reg16(Reg16::HL),
        "SP" => Target::Reg16(Reg16::SP),
        "n8" => Target::Imm8,
        "n16" => Target::Imm16,
        "a8" => Target::Addr8,
        "a16" => Target::Addr16,
        "e8" => Target::Rel8,
        "NZ" => Target::Cond(Cond::NZ),
        "Z" => Target::Cond(Cond::Z),
        "NC" => Target::Cond(Cond::NC),
        _ => {
            if let Some(hex) = name.strip_prefix('$') {
                let vector = u16::from_str_radix(hex, 16).map_err(|_| format!("bad vector {name}"))?;
                if vector > 0x38 || vector % 8 != 0 {
                    return Err(format!("bad vector {name}"));
                }
                Target::Vector(vector)
            } else {
                match name.parse::<u8>() {
                    Ok(n) if n < 8 => Target::Bit(n),
                    _ => return Err(format!("unknown operand {name}")),
                }
            }
        }
    };
    if matches!(target, Target::Cond(_)) && !branch_slot {
        return Err(format!("condition {name} outside a branch"));
    }
    Ok(target)
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = match self.target {
            Target::Reg8(r) => format!("{r:?}"),
            Target::Reg16(r) => match self.step {
                Step::None => format!("{r:?}"),
                Step::Inc => format!("{r:?}+"),
                Step::Dec => format!("{r:?}-"),
            },
            Target::Imm8 => format!("${:02X}", self.value),
            Target::Imm16 | Target::Addr16 => format!("${:04X}", self.value),
            Target::Addr8 => format!("$FF{:02X}", self.value),
            Target::Rel8 => format!("{:+}", self.value as u8 as i8),
            Target::Cond(c) => format!("{c:?}"),
            Target::Bit(n) => n.to_string(),
            Target::Vector(v) => format!("${v:02X}"),
        };
        if self.indirect {
            write!(f, "({body})")
        } else {
            f.write_str(&body)
        }
    }
}

impl fmt::Display for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{:?}", self.desc.mnemonic).to_uppercase())?;
        let ops = self.operands();
        // LD HL,SP+e8 is stored as three operands.
        if let [hl, sp, e8] = ops {
            return write!(f, " {hl},{sp}{e8}");
        }
        for (i, op) in ops.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { "," })?;
            write!(f, "{op}")?;
        }
        Ok(())
    }
}
