//! Physical device discovery and the thin hardware wrappers (I/O layer).
//!
//! Discovery runs once at startup: `/proc/bus/input/devices` is scanned for
//! the touchpad (name, event handler, i2c bus id) and for a keyboard that
//! exposes a numlock LED, with a bounded retry loop for devices that are
//! slow to register after boot.

use std::io;
use std::process::{Command, ExitCode};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{AbsoluteAxisType, AttributeSet, Device, InputEvent, Key, LedType};
use log::{debug, error, info, warn};

use crate::activation::{NumlockLed, PointerGrab};
use crate::config::{DaemonConfig, KeyRef, LayoutConfig, NumpadError};
use crate::emit::KeySink;

const DEV_INPUT_PREFIX: &str = "/dev/input/";
const PROC_INPUT_DEVICES: &str = "/proc/bus/input/devices";
const VIRTUAL_KEYPAD_NAME: &str = "numpadd virtual keypad";

// -- /proc/bus/input/devices parsing --------------------------

/// Raw findings from one pass over the proc devices file.
#[derive(Debug, Default, PartialEq)]
pub struct ProcDevices {
    pub touchpad_event: Option<String>,
    pub touchpad_name: Option<String>,
    pub i2c_id: Option<String>,
    /// All keyboard candidates; the caller picks the first with a numlock
    /// LED.
    pub keyboard_events: Vec<String>,
}

fn quoted_name(line: &str) -> Option<&str> {
    line.split('"').nth(1)
}

/// Pull the bus number out of an `i2c-<n>/` segment of a sysfs path.
fn i2c_bus_id(sysfs_line: &str) -> Option<String> {
    for segment in sysfs_line.split('/') {
        if let Some(id) = segment.strip_prefix("i2c-") {
            if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
                return Some(id.to_string());
            }
        }
    }
    None
}

fn event_handler(handlers_line: &str) -> Option<String> {
    handlers_line
        .split_whitespace()
        .find(|token| token.starts_with("event"))
        .map(str::to_string)
}

/// Scan the contents of `/proc/bus/input/devices` for the touchpad and any
/// keyboard candidates. Pure text processing, testable without hardware.
pub fn parse_proc_devices(text: &str) -> ProcDevices {
    let mut found = ProcDevices::default();
    // 0 = searching, 1 = inside the matched block, 2 = done
    let mut touchpad_state = 0;
    let mut keyboard_pending = false;

    for line in text.lines() {
        if touchpad_state == 0
            && line.contains("Name=")
            && (line.contains("ASUE") || line.contains("ELAN"))
            && line.contains("Touchpad")
        {
            debug!("Detecting touchpad from string: \"{}\"", line.trim());
            found.touchpad_name = quoted_name(line).map(str::to_string);
            touchpad_state = 1;
            continue;
        }

        if touchpad_state == 1 {
            if line.starts_with("S: ") {
                if let Some(id) = i2c_bus_id(line) {
                    debug!("Set touchpad i2c id {id} from {}", line.trim());
                    found.i2c_id = Some(id);
                }
            }
            if line.starts_with("H: ") {
                found.touchpad_event = event_handler(line);
                touchpad_state = 2;
                debug!("Set touchpad handler from {}", line.trim());
                continue;
            }
        }

        if line.contains("Name=")
            && (line.contains("AT Translated Set 2 keyboard")
                || (line.contains("ASUE") && line.contains("Keyboard")))
        {
            debug!("Detecting keyboard from string: \"{}\"", line.trim());
            keyboard_pending = true;
            continue;
        }
        if keyboard_pending && line.starts_with("H: ") {
            if let Some(handler) = event_handler(line) {
                found.keyboard_events.push(handler);
            }
            keyboard_pending = false;
        }
    }

    found
}

// -- Discovery ------------------------------------------------

/// Everything the manager needs to start translating.
pub struct DiscoveredDevices {
    pub touchpad: Device,
    pub touchpad_path: String,
    pub touchpad_name: String,
    pub i2c_id: String,
    /// Keyboard with a numlock LED, when one exists. Optional: without it
    /// the host-numlock monitor never starts.
    pub keyboard: Option<Device>,
}

fn open_device(event: &str) -> Result<Device, NumpadError> {
    let path = format!("{DEV_INPUT_PREFIX}{event}");
    Device::open(&path).map_err(|e| NumpadError::DeviceOpen { path, source: e })
}

fn open_numlock_keyboard(candidates: &[String]) -> Option<Device> {
    for event in candidates {
        let path = format!("{DEV_INPUT_PREFIX}{event}");
        match Device::open(&path) {
            Ok(device) => {
                let has_numlock_led = device
                    .supported_leds()
                    .is_some_and(|leds| leds.contains(LedType::LED_NUML));
                if has_numlock_led {
                    debug!("Set keyboard {path}");
                    return Some(device);
                }
            }
            Err(e) => debug!("Skipping keyboard candidate {path}: {e}"),
        }
    }
    None
}

/// Locate and open the touchpad (and keyboard, when present), retrying for
/// devices that register late. Exhausting the attempts without a touchpad
/// is fatal; a missing keyboard only degrades the host-numlock monitor.
pub fn find_devices(daemon: &DaemonConfig) -> Result<DiscoveredDevices, NumpadError> {
    let interval = Duration::from_secs_f64(daemon.probe_interval);
    let mut saw_touchpad_without_i2c = false;

    for attempt in 1..=daemon.probe_attempts {
        let text = match std::fs::read_to_string(PROC_INPUT_DEVICES) {
            Ok(text) => text,
            Err(e) => {
                warn!("Cannot read {PROC_INPUT_DEVICES}: {e}");
                thread::sleep(interval);
                continue;
            }
        };
        let found = parse_proc_devices(&text);

        if let (Some(event), Some(name)) = (&found.touchpad_event, &found.touchpad_name) {
            let Some(i2c_id) = found.i2c_id.clone() else {
                saw_touchpad_without_i2c = true;
                thread::sleep(interval);
                continue;
            };

            let keyboard = open_numlock_keyboard(&found.keyboard_events);
            if keyboard.is_none() {
                // keyboard is optional, the LED monitor simply never starts
                error!("Can't find keyboard with a numlock LED");
            }

            let touchpad = open_device(event)?;
            info!("Found touchpad {name} at {DEV_INPUT_PREFIX}{event} (i2c bus {i2c_id})");
            return Ok(DiscoveredDevices {
                touchpad,
                touchpad_path: format!("{DEV_INPUT_PREFIX}{event}"),
                touchpad_name: name.clone(),
                i2c_id,
                keyboard,
            });
        }

        debug!(
            "Touchpad not present yet (attempt {attempt}/{})",
            daemon.probe_attempts
        );
        thread::sleep(interval);
    }

    if saw_touchpad_without_i2c {
        return Err(NumpadError::I2cIdNotFound);
    }
    Err(NumpadError::TouchpadNotFound {
        attempts: daemon.probe_attempts,
    })
}

// -- Hardware wrappers ----------------------------------------

/// Numlock LED state read from the discovered keyboard.
pub struct KeyboardLed {
    device: Device,
}

impl KeyboardLed {
    pub fn new(device: Device) -> Self {
        Self { device }
    }
}

impl NumlockLed for KeyboardLed {
    fn is_lit(&self) -> Option<bool> {
        match self.device.get_led_state() {
            Ok(leds) => Some(leds.contains(LedType::LED_NUML)),
            Err(e) => {
                debug!("Cannot read keyboard LED state: {e}");
                None
            }
        }
    }
}

/// Exclusive grab of the physical touchpad, shared with the dispatcher's
/// event loop through the same device mutex.
pub struct EvdevGrab {
    device: Arc<Mutex<Device>>,
}

impl EvdevGrab {
    pub fn new(device: Arc<Mutex<Device>>) -> Self {
        Self { device }
    }
}

impl PointerGrab for EvdevGrab {
    fn grab(&self) -> io::Result<()> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .grab()
    }

    fn ungrab(&self) -> io::Result<()> {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .ungrab()
    }
}

// -- Touchpad enabled query -----------------------------------

/// Asks the host whether the touchpad is still enabled (e.g. after an OS
/// hotkey toggle). A failed or unparseable query is an `Err`; callers
/// degrade to assuming "enabled".
pub trait EnabledQuery: Send + Sync {
    fn is_enabled(&self) -> io::Result<bool>;
}

/// `xinput --list-props`-backed query, keyed by the touchpad device name.
pub struct XinputQuery {
    device_name: String,
}

impl XinputQuery {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
        }
    }
}

impl EnabledQuery for XinputQuery {
    fn is_enabled(&self) -> io::Result<bool> {
        let output = Command::new("xinput")
            .args(["--list-props", &self.device_name])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "xinput exited with {}",
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        for line in stdout.lines() {
            if line.contains("Device Enabled") {
                return Ok(line.trim_end().ends_with('1'));
            }
        }
        Err(io::Error::other("no Device Enabled property in xinput output"))
    }
}

// -- Virtual keypad -------------------------------------------

/// Keys every layout needs: the numlock tap and the Unicode compose
/// alphabet (ctrl+shift+U plus hex digits).
const BASE_KEYS: [Key; 20] = [
    Key::KEY_NUMLOCK,
    Key::KEY_LEFTSHIFT,
    Key::KEY_LEFTCTRL,
    Key::KEY_U,
    Key::KEY_0,
    Key::KEY_1,
    Key::KEY_2,
    Key::KEY_3,
    Key::KEY_4,
    Key::KEY_5,
    Key::KEY_6,
    Key::KEY_7,
    Key::KEY_8,
    Key::KEY_9,
    Key::KEY_A,
    Key::KEY_B,
    Key::KEY_C,
    Key::KEY_D,
    Key::KEY_E,
    Key::KEY_F,
];

/// Create the uinput keyboard that carries every synthetic key event:
/// the base set plus all grid keycodes and icon slide bindings.
pub fn build_virtual_keypad(layout: &LayoutConfig) -> Result<VirtualDevice, NumpadError> {
    let mut keys: Vec<Key> = BASE_KEYS.to_vec();
    for row in &layout.keys {
        for entry in row.iter().flatten() {
            if let KeyRef::Code(key) = entry {
                keys.push(*key);
            }
        }
    }
    keys.extend(&layout.brightness_icon.slide_keys);

    let key_set = AttributeSet::from_iter(keys);
    VirtualDeviceBuilder::new()
        .and_then(|builder| builder.name(VIRTUAL_KEYPAD_NAME).with_keys(&key_set))
        .and_then(|builder| builder.build())
        .map_err(NumpadError::VirtualKeypad)
}

impl KeySink for VirtualDevice {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        VirtualDevice::emit(self, events)
    }
}

// -- Device listing (CLI helper) ------------------------------

/// Check if a device has multi-touch capabilities.
fn is_touch_device(device: &Device) -> bool {
    let Some(abs_axes) = device.supported_absolute_axes() else {
        return false;
    };
    abs_axes.contains(AbsoluteAxisType::ABS_MT_POSITION_X)
        && abs_axes.contains(AbsoluteAxisType::ABS_MT_POSITION_Y)
}

/// List all multi-touch capable devices, for `--list-devices`.
pub fn list_touch_devices() -> ExitCode {
    println!("\n=== numpadd: Available Touchpad Devices ===\n");
    let mut touch_count = 0;

    for (path, device) in evdev::enumerate() {
        if !is_touch_device(&device) {
            continue;
        }

        touch_count += 1;
        println!(
            "Device {touch_count}:\n\
             \x20 Path:      {}\n\
             \x20 Name:      {}\n\
             \x20 Phys:      {}\n",
            path.display(),
            device.name().unwrap_or("unknown"),
            device.physical_path().unwrap_or("N/A"),
        );
    }

    if touch_count == 0 {
        println!(
            "No multi-touch devices found.\n\n\
             Troubleshooting:\n\
             \x20 - Check /proc/bus/input/devices for the touchpad entry\n\
             \x20 - Run as root if devices are not visible"
        );
        return ExitCode::FAILURE;
    }

    println!("Found {touch_count} touch device(s).");
    ExitCode::SUCCESS
}
