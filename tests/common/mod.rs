//! Shared test doubles: recording sinks and fake hardware collaborators.
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};

use evdev::{InputEvent, InputEventKind, Key};

use numpadd::activation::{Activator, NumlockLed, PointerGrab};
use numpadd::backlight::{BacklightBus, BrightnessStore};
use numpadd::config::{
    BrightnessIconConfig, DaemonConfig, KeyRef, LayoutConfig, NumlockIconConfig,
};
use numpadd::devices::EnabledQuery;
use numpadd::dispatcher::{Dispatcher, SlotTable};
use numpadd::emit::{Emitter, KeySink};
use numpadd::geometry::{KeyGrid, UsableRect};

pub const PAD_MAX: i32 = 300;

// -- Test doubles ---------------------------------------------

/// Records every event written to the virtual keypad.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<InputEvent>,
}

impl KeySink for RecordingSink {
    fn emit(&mut self, events: &[InputEvent]) -> io::Result<()> {
        self.events.extend_from_slice(events);
        Ok(())
    }
}

/// Records backlight levels sent over the fake bus.
#[derive(Default, Clone)]
pub struct RecordingBacklight {
    levels: Arc<Mutex<Vec<String>>>,
}

impl RecordingBacklight {
    pub fn sent(&self) -> Vec<String> {
        self.levels.lock().unwrap().clone()
    }
}

impl BacklightBus for RecordingBacklight {
    fn send_level(&self, level: &str) -> io::Result<()> {
        self.levels.lock().unwrap().push(level.to_string());
        Ok(())
    }
}

/// In-memory brightness store counting writes.
#[derive(Default, Clone)]
pub struct RecordingStore {
    level: Arc<Mutex<Option<String>>>,
    writes: Arc<Mutex<u32>>,
}

impl RecordingStore {
    pub fn preload(&self, level: &str) {
        *self.level.lock().unwrap() = Some(level.to_string());
    }

    pub fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }
}

impl BrightnessStore for RecordingStore {
    fn get(&self) -> Option<String> {
        self.level.lock().unwrap().clone()
    }

    fn set(&self, level: &str) {
        *self.level.lock().unwrap() = Some(level.to_string());
        *self.writes.lock().unwrap() += 1;
    }
}

/// Settable host numlock LED.
#[derive(Clone)]
pub struct FakeLed {
    lit: Arc<Mutex<Option<bool>>>,
}

impl Default for FakeLed {
    fn default() -> Self {
        Self {
            lit: Arc::new(Mutex::new(Some(false))),
        }
    }
}

impl FakeLed {
    pub fn set(&self, lit: Option<bool>) {
        *self.lit.lock().unwrap() = lit;
    }
}

impl NumlockLed for FakeLed {
    fn is_lit(&self) -> Option<bool> {
        *self.lit.lock().unwrap()
    }
}

/// Counts grab/ungrab calls.
#[derive(Default, Clone)]
pub struct RecordingGrab {
    grabs: Arc<Mutex<u32>>,
    ungrabs: Arc<Mutex<u32>>,
}

impl RecordingGrab {
    pub fn grabs(&self) -> u32 {
        *self.grabs.lock().unwrap()
    }

    pub fn ungrabs(&self) -> u32 {
        *self.ungrabs.lock().unwrap()
    }
}

impl PointerGrab for RecordingGrab {
    fn grab(&self) -> io::Result<()> {
        *self.grabs.lock().unwrap() += 1;
        Ok(())
    }

    fn ungrab(&self) -> io::Result<()> {
        *self.ungrabs.lock().unwrap() += 1;
        Ok(())
    }
}

/// Settable touchpad-enabled query; `None` simulates a failing query.
#[derive(Default, Clone)]
pub struct FakeQuery {
    enabled: Arc<Mutex<Option<bool>>>,
}

impl FakeQuery {
    pub fn set(&self, enabled: Option<bool>) {
        *self.enabled.lock().unwrap() = enabled;
    }
}

impl EnabledQuery for FakeQuery {
    fn is_enabled(&self) -> io::Result<bool> {
        let enabled: Option<bool> = *self.enabled.lock().unwrap();
        enabled.ok_or_else(|| io::Error::other("query unavailable"))
    }
}

// -- Layout and harness ---------------------------------------

fn kp(name: &str) -> Option<KeyRef> {
    Some(KeyRef::Code(
        numpadd::config::key_from_name(name).expect("known key"),
    ))
}

/// Layout used across the tests: a 3x3 grid over a 0-300 pad, numlock
/// icon 50x50 top-right, brightness icon disabled by default.
pub fn test_layout() -> LayoutConfig {
    LayoutConfig {
        daemon: DaemonConfig {
            log_level: "info".to_string(),
            log_file: None,
            brightness_state_file: "/tmp/numpadd-test-brightness.toml".into(),
            probe_attempts: 1,
            probe_interval: 0.0,
        },
        keys: vec![
            vec![kp("KEY_KP7"), kp("KEY_KP8"), kp("KEY_KP9")],
            vec![kp("KEY_KP4"), kp("KEY_KP5"), kp("KEY_KP6")],
            vec![kp("KEY_KP1"), kp("KEY_KP2"), kp("KEY_KP3")],
        ],
        left_margin: 0,
        right_margin: 0,
        top_margin: 0,
        bottom_margin: 0,
        multitouch: false,
        one_touch_key_rotation: false,
        key_repetitions: false,
        physical_buttons_inside_numpad: true,
        inactivity_timeout: 60.0,
        sys_numlock_enables_numpad: false,
        touchpad_disables_numpad: true,
        numlock_icon: NumlockIconConfig {
            width: 50,
            height: 50,
            activation_time: 1.0,
            slide_x_ratio: 0.05,
            slide_y_ratio: 0.05,
            on_top_left: false,
        },
        brightness_icon: BrightnessIconConfig {
            width: 0,
            height: 0,
            activation_time: 1.0,
            slide_x_ratio: 0.05,
            slide_y_ratio: 0.05,
            brightness_func_disabled: false,
            slide_activates_numpad: true,
            slide_deactivates_numpad: true,
            slide_keys: vec![Key::KEY_CALC],
        },
        backlight_levels: vec!["0x41".to_string(), "0x42".to_string()],
        default_backlight_level: "0x01".to_string(),
    }
}

/// A dispatcher wired to recording doubles.
pub struct Harness {
    pub dispatcher: Dispatcher,
    pub sink: Arc<Mutex<RecordingSink>>,
    pub activator: Arc<Activator>,
    pub backlight: RecordingBacklight,
    pub store: RecordingStore,
    pub led: FakeLed,
    pub grab: RecordingGrab,
    pub query: FakeQuery,
    pub slots: Arc<Mutex<SlotTable>>,
}

pub fn harness(layout: LayoutConfig) -> Harness {
    let sink = Arc::new(Mutex::new(RecordingSink::default()));
    let emitter = Emitter::new(sink.clone() as Arc<Mutex<dyn KeySink + Send>>);

    let backlight = RecordingBacklight::default();
    let store = RecordingStore::default();
    let led = FakeLed::default();
    let grab = RecordingGrab::default();
    let query = FakeQuery::default();

    let slots = Arc::new(Mutex::new(SlotTable::new(layout.slot_capacity())));
    let activator = Arc::new(Activator::new(
        &layout,
        Box::new(grab.clone()),
        Some(Box::new(led.clone())),
        Box::new(backlight.clone()),
        Box::new(store.clone()),
        emitter.clone(),
        Arc::clone(&slots),
    ));

    let rect = UsableRect {
        min_x: layout.left_margin,
        max_x: PAD_MAX - layout.right_margin,
        min_y: layout.top_margin,
        max_y: PAD_MAX - layout.bottom_margin,
    };
    let grid = KeyGrid::new(layout.keys.clone(), rect).expect("valid grid");
    let dispatcher = Dispatcher::new(
        &layout,
        grid,
        PAD_MAX,
        PAD_MAX,
        Arc::clone(&slots),
        emitter,
        Arc::clone(&activator),
        Arc::new(query.clone()),
    );

    Harness {
        dispatcher,
        sink,
        activator,
        backlight,
        store,
        led,
        grab,
        query,
        slots,
    }
}

// -- Event inspection helpers ---------------------------------

/// All `(key, value)` pairs of EV_KEY events in emission order.
pub fn key_events(events: &[InputEvent]) -> Vec<(Key, i32)> {
    events
        .iter()
        .filter_map(|event| match event.kind() {
            InputEventKind::Key(key) => Some((key, event.value())),
            _ => None,
        })
        .collect()
}

/// The values emitted for one key, in order.
pub fn values_for(events: &[InputEvent], key: Key) -> Vec<i32> {
    key_events(events)
        .into_iter()
        .filter(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .collect()
}

/// Drain the recorded events out of the sink.
pub fn drain(sink: &Arc<Mutex<RecordingSink>>) -> Vec<InputEvent> {
    std::mem::take(&mut sink.lock().unwrap().events)
}
