//! Battery RAM and RTC files kept next to the ROM.

use anyhow::Context;
use log::{debug, info, warn};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tickboy_core::GameBoy;

pub struct SaveFiles {
    ram: PathBuf,
    rtc: PathBuf,
}

impl SaveFiles {
    /// `game.gb` saves to `game.sav` and `game.rtc`.
    pub fn for_rom(rom: &Path) -> Self {
        Self {
            ram: rom.with_extension("sav"),
            rtc: rom.with_extension("rtc"),
        }
    }

    pub fn ram_path(&self) -> &Path {
        &self.ram
    }

    pub fn rtc_path(&self) -> &Path {
        &self.rtc
    }

    /// Load whatever save files exist. Absent files are not an error.
    pub fn restore(&self, gb: &mut GameBoy) -> anyhow::Result<()> {
        if !gb.has_battery() {
            return Ok(());
        }
        if let Some(data) = read_optional(&self.ram)? {
            info!("Loaded {} bytes from {}", data.len(), self.ram.display());
            gb.load_battery(&data);
        }
        if let Some(data) = read_optional(&self.rtc)? {
            if gb.load_rtc(&data) {
                debug!("Restored RTC from {}", self.rtc.display());
            } else {
                warn!("Ignoring unreadable RTC file {}", self.rtc.display());
            }
        }
        Ok(())
    }

    /// Write battery RAM if the guest changed it. Failures are logged and
    /// retried on the next call.
    pub fn flush_dirty(&self, gb: &mut GameBoy) {
        if let Some(data) = gb.take_dirty_save() {
            self.write(&self.ram, &data);
            if let Some(rtc) = gb.rtc_image() {
                self.write(&self.rtc, &rtc);
            }
        }
    }

    /// Write everything unconditionally, on shutdown.
    pub fn flush_all(&self, gb: &mut GameBoy) {
        if let Some(data) = gb.save_image() {
            self.write(&self.ram, &data);
        }
        if let Some(rtc) = gb.rtc_image() {
            self.write(&self.rtc, &rtc);
        }
    }

    fn write(&self, path: &Path, data: &[u8]) {
        match fs::write(path, data) {
            Ok(()) => debug!("Wrote {} bytes to {}", data.len(), path.display()),
            Err(e) => warn!("Failed to write {}: {e}", path.display()),
        }
    }
}

fn read_optional(path: &Path) -> anyhow::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}
