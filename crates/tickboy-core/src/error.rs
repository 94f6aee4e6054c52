use std::fmt;

use thiserror::Error;

use crate::registers::Registers;

/// Failures that stop a cartridge image from being loaded at all.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read ROM image: {0}")]
    Io(#[from] std::io::Error),

    #[error("ROM image is truncated ({len} bytes, header needs at least 0x150)")]
    Truncated { len: usize },

    #[error("header checksum mismatch: header says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch { expected: u8, computed: u8 },

    #[error("unsupported cartridge controller type {0:02X}")]
    UnsupportedController(u8),
}

/// Fatal conditions raised while the machine is running.
#[derive(Debug, Error)]
pub enum EmuError {
    #[error("unknown opcode {}{opcode:02X} at {pc:04X}\n{regs}", cb_prefix(*.prefixed))]
    UnknownOpcode {
        opcode: u8,
        prefixed: bool,
        pc: u16,
        regs: RegisterDump,
    },

    #[error("malformed opcode table: {0}")]
    MalformedOpcodeTable(String),

    #[error("invalid machine mode: {0}")]
    InvalidMode(String),

    #[error("guest halted at {pc:04X} with no interrupt source enabled\n{regs}")]
    GuestHang { pc: u16, regs: RegisterDump },
}

impl EmuError {
    /// True when the guest program locked the machine up, as opposed to the
    /// emulator hitting one of its own invariants.
    pub fn is_guest_hang(&self) -> bool {
        matches!(self, EmuError::GuestHang { .. })
    }
}

fn cb_prefix(prefixed: bool) -> &'static str {
    if prefixed { "CB " } else { "" }
}

/// Register snapshot attached to fatal errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDump(pub Registers);

impl fmt::Display for RegisterDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.0;
        write!(
            f,
            "A:{:02X} F:{:02X} B:{:02X} C:{:02X} D:{:02X} E:{:02X} H:{:02X} L:{:02X} SP:{:04X} PC:{:04X}",
            r.a, r.f, r.b, r.c, r.d, r.e, r.h, r.l, r.sp, r.pc
        )
    }
}
