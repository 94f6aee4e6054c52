use log::warn;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tickboy_core::ModeSelect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmulationMode {
    #[default]
    Auto,
    Dmg,
}

impl From<EmulationMode> for ModeSelect {
    fn from(mode: EmulationMode) -> Self {
        match mode {
            EmulationMode::Auto => ModeSelect::Auto,
            EmulationMode::Dmg => ModeSelect::Dmg,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: EmulationMode,
    /// Sleep between frames to hold real-time speed.
    pub pacing: bool,
    /// How often dirty battery RAM is written back while running.
    pub save_interval_ms: u64,
    /// Echo bytes the guest sends over the link port to stdout.
    pub print_serial: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: EmulationMode::Auto,
            pacing: true,
            save_interval_ms: 1000,
            print_serial: false,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("tickboy").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("tickboy")
            .join("config.toml");
    }

    PathBuf::from("config.toml")
}

/// Missing or unparsable files fall back to the defaults.
pub fn load_from_file(path: &Path) -> Config {
    let text = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(_) => return Config::default(),
    };

    match toml::from_str::<Config>(&text) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                "Failed to parse config {}: {e}; using defaults",
                path.display()
            );
            Config::default()
        }
    }
}

pub fn save_to_file(path: &Path, cfg: &Config) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(cfg)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_from_file(&dir.path().join("nope.toml"));
        assert_eq!(cfg, Config::default());
        assert!(cfg.pacing);
        assert_eq!(cfg.save_interval_ms, 1000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = \"dmg\"\nprint_serial = true\n").unwrap();
        let cfg = load_from_file(&path);
        assert_eq!(cfg.mode, EmulationMode::Dmg);
        assert!(cfg.print_serial);
        assert!(cfg.pacing);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = 7").unwrap();
        assert_eq!(load_from_file(&path), Config::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            mode: EmulationMode::Dmg,
            pacing: false,
            save_interval_ms: 250,
            print_serial: true,
        };
        save_to_file(&path, &cfg).unwrap();
        assert_eq!(load_from_file(&path), cfg);
    }
}
