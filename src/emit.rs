//! Key emission engine: builds the synthetic event sequences written to the
//! virtual keypad.
//!
//! Sequence builders are plain functions returning event vectors so tests
//! can inspect them without a uinput device; the [`Emitter`] wrapper does
//! the actual writing and swallows transient device errors.

use std::sync::{Arc, Mutex, PoisonError};

use evdev::{EventType, InputEvent, Key, MiscType};
use log::warn;

/// Scancode carried alongside the synthetic numlock tap, matching what a
/// real keyboard reports for that key.
const NUMLOCK_SCANCODE: i32 = 70053;

/// Destination for synthetic key events. Implemented by the uinput virtual
/// keypad and by recording sinks in tests.
pub trait KeySink {
    fn emit(&mut self, events: &[InputEvent]) -> std::io::Result<()>;
}

fn key_event(key: Key, value: i32) -> InputEvent {
    InputEvent::new(EventType::KEY, key.code(), value)
}

fn scan_event(value: i32) -> InputEvent {
    InputEvent::new(EventType::MISC, MiscType::MSC_SCAN.0, value)
}

/// Synchronization marker; one follows every synthetic sub-event so the
/// host treats each as a complete input report.
pub fn syn_event() -> InputEvent {
    InputEvent::new(EventType::SYNCHRONIZATION, 0, 0)
}

/// Press burst for a direct keycode.
pub fn press_events(key: Key) -> Vec<InputEvent> {
    vec![key_event(key, 1), syn_event()]
}

/// Release burst for a direct keycode.
pub fn release_events(key: Key) -> Vec<InputEvent> {
    vec![key_event(key, 0), syn_event()]
}

/// Numlock press+release tap used to flip the host numlock state.
pub fn numlock_tap_events() -> Vec<InputEvent> {
    let mut events = Vec::with_capacity(6);
    for value in [1, 0] {
        events.push(scan_event(NUMLOCK_SCANCODE));
        events.push(key_event(Key::KEY_NUMLOCK, value));
        events.push(syn_event());
    }
    events
}

/// Press+release bursts for a configured icon slide binding.
pub fn tap_sequence(keys: &[Key]) -> Vec<InputEvent> {
    let mut events = Vec::with_capacity(keys.len() * 4);
    for &key in keys {
        events.extend(press_events(key));
        events.extend(release_events(key));
    }
    events
}

fn hex_digit_key(digit: char) -> Key {
    match digit {
        '0' => Key::KEY_0,
        '1' => Key::KEY_1,
        '2' => Key::KEY_2,
        '3' => Key::KEY_3,
        '4' => Key::KEY_4,
        '5' => Key::KEY_5,
        '6' => Key::KEY_6,
        '7' => Key::KEY_7,
        '8' => Key::KEY_8,
        '9' => Key::KEY_9,
        'A' => Key::KEY_A,
        'B' => Key::KEY_B,
        'C' => Key::KEY_C,
        'D' => Key::KEY_D,
        'E' => Key::KEY_E,
        // `{:X}` formatting only ever produces 0-9A-F
        _ => Key::KEY_F,
    }
}

/// Modifier chord bracketing a composed code point:
/// leftctrl + leftshift + U pressed (value 1) or released (value 0).
fn compose_chord_events(value: i32) -> Vec<InputEvent> {
    let mut events = Vec::with_capacity(9);
    for key in [Key::KEY_LEFTCTRL, Key::KEY_LEFTSHIFT, Key::KEY_U] {
        events.push(scan_event(i32::from(key.code())));
        events.push(key_event(key, value));
        events.push(syn_event());
    }
    events
}

/// Full Unicode compose sequence for a literal string: per character,
/// ctrl+shift+U down, the hex digits of the code point tapped one by one,
/// then the chord released. Every sub-event is followed by a sync marker
/// so the host processes the burst as atomic input.
pub fn compose_sequence(text: &str) -> Vec<InputEvent> {
    let mut events = Vec::new();
    for ch in text.chars() {
        events.extend(compose_chord_events(1));
        for digit in format!("{:X}", u32::from(ch)).chars() {
            let key = hex_digit_key(digit);
            events.push(scan_event(i32::from(key.code())));
            events.push(key_event(key, 1));
            events.push(syn_event());
            events.push(scan_event(i32::from(key.code())));
            events.push(key_event(key, 0));
            events.push(syn_event());
        }
        events.extend(compose_chord_events(0));
    }
    events
}

/// Shared writer over the virtual keypad. Write failures are transient
/// (device momentarily busy) and must never escape the dispatcher loop, so
/// they are logged and dropped here.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<Mutex<dyn KeySink + Send>>,
}

impl Emitter {
    pub fn new(sink: Arc<Mutex<dyn KeySink + Send>>) -> Self {
        Self { sink }
    }

    pub fn send(&self, events: &[InputEvent]) {
        if events.is_empty() {
            return;
        }
        let mut sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = sink.emit(events) {
            warn!("Cannot send event, {e}");
        }
    }
}
