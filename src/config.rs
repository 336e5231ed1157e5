use std::{
    io,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use gbcc_core::serial::LinkState;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read config: {0}")]
    Io(#[from] io::Error),
    #[error("couldn't parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// What to plug into the link port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LinkCable {
    #[default]
    Disconnected,
    Loopback,
    Printer,
}

impl From<LinkCable> for LinkState {
    fn from(cable: LinkCable) -> Self {
        match cable {
            LinkCable::Disconnected => LinkState::Disconnected,
            LinkCable::Loopback => LinkState::Loopback,
            LinkCable::Printer => LinkState::Printer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// DMG palette name.
    pub palette: Option<String>,
    pub turbo: bool,
    /// Speed multiplier while in turbo, 0 for unlimited.
    pub turbo_speed: f32,
    pub sync_to_video: bool,
    /// Where `.sav` and savestate files live. Defaults to the ROM's directory.
    pub save_dir: Option<PathBuf>,
    pub cheats: Vec<String>,
    pub link_cable: LinkCable,
    pub hide_background: bool,
    pub hide_window: bool,
    pub hide_sprites: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            palette: None,
            turbo: false,
            turbo_speed: 0.0,
            sync_to_video: false,
            save_dir: None,
            cheats: Vec::new(),
            link_cable: LinkCable::default(),
            hide_background: false,
            hide_window: false,
            hide_sprites: false,
        }
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("gbcc").join("config.toml");
    }

    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join("gbcc")
            .join("config.toml");
    }

    PathBuf::from("config.toml")
}

impl Config {
    /// Read a config file. A missing file gives the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No config at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(toml::from_str(&text)?)
    }

    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!("{} ({}); using defaults", e, path.display());
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).unwrap_or_default();
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "palette = \"Dark-Green\"\ncheats = [\"01FF16D0\"]\nlink_cable = \"printer\"\n",
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.palette.as_deref(), Some("Dark-Green"));
        assert_eq!(cfg.cheats, ["01FF16D0"]);
        assert_eq!(cfg.link_cable, LinkCable::Printer);
        assert!(!cfg.turbo);
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "turbo = \"very\"").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        assert_eq!(Config::load_or_default(&path), Config::default());
    }

    #[test]
    fn save_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            turbo: true,
            turbo_speed: 4.0,
            hide_window: true,
            ..Config::default()
        };
        cfg.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), cfg);
    }
}
