//! Lockstep Game Boy / Game Boy Color emulation core.
//!
//! The machine is a plain owned value: [`gameboy::GameBoy`] holds the CPU
//! and the [`mmu::Mmu`], which in turn owns every peripheral. Each bus
//! access the CPU makes advances the rest of the hardware by one machine
//! cycle, so emulation is fully deterministic. Frontends drive the core
//! through the [`gameboy`] facade.

/// Pure flag arithmetic shared by the CPU's instruction handlers.
pub mod alu;

/// Cartridge header parsing, bank controllers, battery RAM and the RTC.
pub mod cartridge;

/// LR35902 CPU core.
pub mod cpu;

/// Table-driven instruction decoding from `opcodes.toml`.
pub mod decoder;

/// Load-time and run-time error types.
pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// IE/IF registers and the master enable.
pub mod interrupts;

/// Joypad input register and edge-triggered interrupt behavior.
pub mod joypad;

/// Memory map, DMA engines and the per-cycle scheduler.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// CPU register file.
pub mod registers;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Sound register storage.
pub mod sound;

/// Divider/timer unit.
pub mod timer;

pub use error::{EmuError, LoadError};
pub use gameboy::{GameBoy, ModeSelect};
