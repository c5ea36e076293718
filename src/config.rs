//! Layout configuration data structures and TOML parsing.
//!
//! A layout file describes one touchpad model: the key grid printed on the
//! pad, the two gesture icons, backlight levels and the daemon behaviour
//! flags. Example:
//!
//! ```toml
//! [daemon]
//! log_level = "info"
//!
//! [layout]
//! keys = [
//!     ["KEY_KP7", "KEY_KP8", "KEY_KP9", "KEY_KPSLASH", "KEY_BACKSPACE"],
//!     ["KEY_KP4", "KEY_KP5", "KEY_KP6", "KEY_KPASTERISK", "KEY_BACKSPACE"],
//!     ["KEY_KP1", "KEY_KP2", "KEY_KP3", "KEY_KPMINUS", "KEY_KPENTER"],
//!     ["KEY_KP0", "KEY_KPDOT", "%", "KEY_KPPLUS", "KEY_KPENTER"],
//! ]
//! multitouch = true
//! inactivity_timeout = 60.0
//!
//! [layout.numlock_icon]
//! width = 250
//! height = 250
//!
//! [layout.backlight]
//! levels = ["0x41", "0x42", "0x43", "0x44", "0x45", "0x46", "0x47", "0x48"]
//! ```
//!
//! Grid entries starting with `KEY_` resolve to evdev keycodes; any other
//! non-empty entry is a literal string typed via the Unicode compose
//! sequence; the empty string leaves a gap in the grid.

use std::fs;
use std::path::{Path, PathBuf};

use evdev::Key;
use serde::Deserialize;
use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Top-level error type for the fatal startup class. Runtime failures are
/// logged and swallowed at their call sites instead.
#[derive(Debug, Error)]
pub enum NumpadError {
    #[error("Failed to read layout file {path}: {source}")]
    LayoutRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse layout file {path}: {message}")]
    LayoutParse { path: PathBuf, message: String },

    #[error("Layout validation error: {0}")]
    LayoutInvalid(String),

    #[error("Unknown key name '{0}' in layout")]
    UnknownKey(String),

    #[error("Touchpad not found after {attempts} attempts")]
    TouchpadNotFound { attempts: u32 },

    #[error("Touchpad i2c bus id not found in /proc/bus/input/devices")]
    I2cIdNotFound,

    #[error("Failed to open input device {path}: {source}")]
    DeviceOpen {
        path: String,
        source: std::io::Error,
    },

    #[error("Touchpad reports an unusable key area: {0}")]
    BadDimensions(String),

    #[error("Failed to create virtual keypad: {0}")]
    VirtualKeypad(std::io::Error),

    #[error("Touchpad event stream failed: {0}")]
    EventStream(std::io::Error),
}

/// A resolved grid entry: a plain keycode, a literal string that has to be
/// typed through the Unicode compose sequence, or one of the two reserved
/// icon pseudo-keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyRef {
    Code(Key),
    Literal(String),
    Icon(IconId),
}

/// The two gesture icons in the touchpad corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum IconId {
    /// Brightness icon (top-left corner).
    #[strum(serialize = "brightness")]
    Brightness,
    /// Numlock icon (top-right corner, mirrorable to the left).
    #[strum(serialize = "numlock")]
    Numlock,
}

// -- Raw TOML shapes ------------------------------------------

/// Root of the layout TOML file.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawLayoutFile {
    daemon: RawDaemon,
    layout: RawLayout,
}

/// The `[daemon]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawDaemon {
    log_level: Option<String>,
    log_file: Option<String>,
    brightness_state_file: Option<String>,
    probe_attempts: Option<u32>,
    probe_interval: Option<f64>,
}

/// The `[layout]` section.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawLayout {
    keys: Vec<Vec<String>>,
    left_margin: Option<i32>,
    right_margin: Option<i32>,
    top_margin: Option<i32>,
    bottom_margin: Option<i32>,
    multitouch: Option<bool>,
    one_touch_key_rotation: Option<bool>,
    key_repetitions: Option<bool>,
    physical_buttons_inside_numpad: Option<bool>,
    inactivity_timeout: Option<f64>,
    sys_numlock_enables_numpad: Option<bool>,
    touchpad_disables_numpad: Option<bool>,
    numlock_icon: RawNumlockIcon,
    brightness_icon: RawBrightnessIcon,
    backlight: RawBacklight,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawNumlockIcon {
    width: Option<i32>,
    height: Option<i32>,
    activation_time: Option<f64>,
    slide_x_ratio: Option<f64>,
    slide_y_ratio: Option<f64>,
    on_top_left: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawBrightnessIcon {
    width: Option<i32>,
    height: Option<i32>,
    activation_time: Option<f64>,
    slide_x_ratio: Option<f64>,
    slide_y_ratio: Option<f64>,
    brightness_func_disabled: Option<bool>,
    slide_activates_numpad: Option<bool>,
    slide_deactivates_numpad: Option<bool>,
    slide_keys: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawBacklight {
    levels: Vec<String>,
    default_level: Option<String>,
}

// -- Validated configuration ----------------------------------

/// Daemon plumbing knobs, all defaulted.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_level: String,
    pub log_file: Option<String>,
    pub brightness_state_file: PathBuf,
    pub probe_attempts: u32,
    pub probe_interval: f64,
}

/// Numlock icon geometry and gesture timing.
#[derive(Debug, Clone)]
pub struct NumlockIconConfig {
    pub width: i32,
    pub height: i32,
    pub activation_time: f64,
    pub slide_x_ratio: f64,
    pub slide_y_ratio: f64,
    pub on_top_left: bool,
}

/// Brightness icon geometry, gesture timing and slide bindings. A zero
/// width or height disables the icon entirely.
#[derive(Debug, Clone)]
pub struct BrightnessIconConfig {
    pub width: i32,
    pub height: i32,
    pub activation_time: f64,
    pub slide_x_ratio: f64,
    pub slide_y_ratio: f64,
    pub brightness_func_disabled: bool,
    pub slide_activates_numpad: bool,
    pub slide_deactivates_numpad: bool,
    pub slide_keys: Vec<Key>,
}

/// Fully validated layout for one touchpad model.
#[derive(Debug, Clone)]
pub struct LayoutConfig {
    pub daemon: DaemonConfig,
    /// Ragged grid of key references; `None` is a gap under the overlay.
    pub keys: Vec<Vec<Option<KeyRef>>>,
    pub left_margin: i32,
    pub right_margin: i32,
    pub top_margin: i32,
    pub bottom_margin: i32,
    pub multitouch: bool,
    pub one_touch_key_rotation: bool,
    pub key_repetitions: bool,
    pub physical_buttons_inside_numpad: bool,
    /// Seconds without touchpad events before auto-deactivation; 0 disables.
    pub inactivity_timeout: f64,
    pub sys_numlock_enables_numpad: bool,
    pub touchpad_disables_numpad: bool,
    pub numlock_icon: NumlockIconConfig,
    pub brightness_icon: BrightnessIconConfig,
    pub backlight_levels: Vec<String>,
    pub default_backlight_level: String,
}

impl LayoutConfig {
    /// Slot capacity of the slot table: hardware may track five contacts,
    /// but only multitouch layouts make use of them.
    pub fn slot_capacity(&self) -> usize {
        if self.multitouch { 5 } else { 1 }
    }
}

/// Generate the keycode lookup used for grid entries and slide bindings.
macro_rules! key_names {
    ($($name:ident),+ $(,)?) => {
        /// Resolve a `KEY_*` name from a layout file to an evdev keycode.
        pub fn key_from_name(name: &str) -> Option<Key> {
            match name {
                $(stringify!($name) => Some(Key::$name),)+
                _ => None,
            }
        }
    };
}

key_names!(
    KEY_KP0,
    KEY_KP1,
    KEY_KP2,
    KEY_KP3,
    KEY_KP4,
    KEY_KP5,
    KEY_KP6,
    KEY_KP7,
    KEY_KP8,
    KEY_KP9,
    KEY_KPDOT,
    KEY_KPCOMMA,
    KEY_KPENTER,
    KEY_KPPLUS,
    KEY_KPMINUS,
    KEY_KPASTERISK,
    KEY_KPSLASH,
    KEY_KPEQUAL,
    KEY_KPLEFTPAREN,
    KEY_KPRIGHTPAREN,
    KEY_BACKSPACE,
    KEY_TAB,
    KEY_ENTER,
    KEY_EQUAL,
    KEY_MINUS,
    KEY_DELETE,
    KEY_INSERT,
    KEY_NUMLOCK,
    KEY_CALC,
    KEY_0,
    KEY_1,
    KEY_2,
    KEY_3,
    KEY_4,
    KEY_5,
    KEY_6,
    KEY_7,
    KEY_8,
    KEY_9,
);

/// Parse a single grid entry. Empty string is a gap; `KEY_*` must resolve
/// to a keycode; anything else becomes a compose literal.
fn parse_key_ref(entry: &str) -> Result<Option<KeyRef>, NumpadError> {
    if entry.is_empty() {
        return Ok(None);
    }
    if entry.starts_with("KEY_") {
        return key_from_name(entry)
            .map(|key| Some(KeyRef::Code(key)))
            .ok_or_else(|| NumpadError::UnknownKey(entry.to_string()));
    }
    Ok(Some(KeyRef::Literal(entry.to_string())))
}

/// Parse a TOML layout file and return the fully resolved [`LayoutConfig`].
pub fn parse_layout_file(path: &Path) -> Result<LayoutConfig, NumpadError> {
    let raw: RawLayoutFile =
        toml::from_str(
            &fs::read_to_string(path).map_err(|e| NumpadError::LayoutRead {
                path: path.to_path_buf(),
                source: e,
            })?,
        )
        .map_err(|e| NumpadError::LayoutParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let layout = raw.layout;

    let mut keys = Vec::with_capacity(layout.keys.len());
    for row in &layout.keys {
        let mut out_row = Vec::with_capacity(row.len());
        for entry in row {
            out_row.push(parse_key_ref(entry)?);
        }
        keys.push(out_row);
    }

    if keys.is_empty() || keys[0].is_empty() {
        return Err(NumpadError::LayoutInvalid(
            "keys must contain at least one non-empty row".to_string(),
        ));
    }

    let numlock_icon = NumlockIconConfig {
        width: layout.numlock_icon.width.unwrap_or(0),
        height: layout.numlock_icon.height.unwrap_or(0),
        activation_time: layout.numlock_icon.activation_time.unwrap_or(1.0),
        slide_x_ratio: layout.numlock_icon.slide_x_ratio.unwrap_or(0.05),
        slide_y_ratio: layout.numlock_icon.slide_y_ratio.unwrap_or(0.05),
        on_top_left: layout.numlock_icon.on_top_left.unwrap_or(false),
    };
    if numlock_icon.width <= 0 || numlock_icon.height <= 0 {
        return Err(NumpadError::LayoutInvalid(
            "numlock_icon width and height must be set > 0".to_string(),
        ));
    }

    let raw_bi = layout.brightness_icon;
    let mut slide_keys = Vec::new();
    for name in raw_bi
        .slide_keys
        .unwrap_or_else(|| vec!["KEY_CALC".to_string()])
    {
        slide_keys.push(key_from_name(&name).ok_or(NumpadError::UnknownKey(name))?);
    }
    let brightness_icon = BrightnessIconConfig {
        width: raw_bi.width.unwrap_or(0),
        height: raw_bi.height.unwrap_or(0),
        activation_time: raw_bi.activation_time.unwrap_or(1.0),
        slide_x_ratio: raw_bi.slide_x_ratio.unwrap_or(0.05),
        slide_y_ratio: raw_bi.slide_y_ratio.unwrap_or(0.05),
        brightness_func_disabled: raw_bi.brightness_func_disabled.unwrap_or(false),
        slide_activates_numpad: raw_bi.slide_activates_numpad.unwrap_or(true),
        slide_deactivates_numpad: raw_bi.slide_deactivates_numpad.unwrap_or(true),
        slide_keys,
    };

    Ok(LayoutConfig {
        daemon: DaemonConfig {
            log_level: raw.daemon.log_level.unwrap_or_else(|| "info".to_string()),
            log_file: raw.daemon.log_file,
            brightness_state_file: raw
                .daemon
                .brightness_state_file
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/var/lib/numpadd/brightness.toml")),
            probe_attempts: raw.daemon.probe_attempts.unwrap_or(5),
            probe_interval: raw.daemon.probe_interval.unwrap_or(0.1),
        },
        keys,
        left_margin: layout.left_margin.unwrap_or(0),
        right_margin: layout.right_margin.unwrap_or(0),
        top_margin: layout.top_margin.unwrap_or(0),
        bottom_margin: layout.bottom_margin.unwrap_or(0),
        multitouch: layout.multitouch.unwrap_or(false),
        one_touch_key_rotation: layout.one_touch_key_rotation.unwrap_or(false),
        key_repetitions: layout.key_repetitions.unwrap_or(false),
        physical_buttons_inside_numpad: layout.physical_buttons_inside_numpad.unwrap_or(true),
        inactivity_timeout: layout.inactivity_timeout.unwrap_or(60.0),
        sys_numlock_enables_numpad: layout.sys_numlock_enables_numpad.unwrap_or(false),
        touchpad_disables_numpad: layout.touchpad_disables_numpad.unwrap_or(true),
        numlock_icon,
        brightness_icon,
        backlight_levels: layout.backlight.levels,
        default_backlight_level: layout
            .backlight
            .default_level
            .unwrap_or_else(|| "0x01".to_string()),
    })
}
