//! Numpad backlight control and persisted brightness state.
//!
//! The backlight lives behind the touchpad's i2c controller and is driven
//! by a fixed 13-byte write in which only the level byte varies. Both the
//! bus command and the state file are best-effort: failures are logged by
//! the callers and never stop the translation loop.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Level byte that powers the backlight on at its firmware default.
pub const POWER_ON_LEVEL: &str = "0x01";
/// Level byte that powers the backlight off.
pub const POWER_OFF_LEVEL: &str = "0x00";

/// Opaque hardware command channel: writes one backlight level.
pub trait BacklightBus: Send + Sync {
    fn send_level(&self, level: &str) -> io::Result<()>;
}

/// Sends backlight levels through `i2ctransfer` on the touchpad's i2c bus.
pub struct I2cBacklight {
    bus_id: String,
}

impl I2cBacklight {
    pub fn new(bus_id: impl Into<String>) -> Self {
        Self {
            bus_id: bus_id.into(),
        }
    }
}

impl BacklightBus for I2cBacklight {
    fn send_level(&self, level: &str) -> io::Result<()> {
        let status = Command::new("i2ctransfer")
            .args(["-f", "-y", &self.bus_id, "w13@0x15"])
            .args([
                "0x05", "0x00", "0x3d", "0x03", "0x06", "0x00", "0x07", "0x00", "0x0d", "0x14",
                "0x03",
            ])
            .arg(level)
            .arg("0xad")
            .status()?;
        if !status.success() {
            return Err(io::Error::other(format!(
                "i2ctransfer exited with {status}"
            )));
        }
        debug!("Sent backlight level {level} to i2c bus {}", self.bus_id);
        Ok(())
    }
}

/// Accessor for the single persisted value: the last used backlight level.
pub trait BrightnessStore: Send + Sync {
    fn get(&self) -> Option<String>;
    fn set(&self, level: &str);
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct PersistedBrightness {
    last_brightness: Option<String>,
}

/// Stores the last brightness level in a small TOML state file.
pub struct FileBrightnessStore {
    path: PathBuf,
}

impl FileBrightnessStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BrightnessStore for FileBrightnessStore {
    fn get(&self) -> Option<String> {
        let text = fs::read_to_string(&self.path).ok()?;
        let persisted: PersistedBrightness = toml::from_str(&text).ok()?;
        persisted.last_brightness
    }

    fn set(&self, level: &str) {
        let persisted = PersistedBrightness {
            last_brightness: Some(level.to_string()),
        };
        let Ok(text) = toml::to_string(&persisted) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(e) = fs::write(&self.path, text) {
            warn!(
                "Cannot persist brightness level to {}: {e}",
                self.path.display()
            );
        }
    }
}
