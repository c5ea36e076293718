//! Core event loop: per-contact slot tracking, key press/release logic and
//! icon gesture detection.
//!
//! The dispatcher is the single consumer of the classified touchpad event
//! stream. It owns the slot-select cursor and the icon hold/slide state;
//! the slot table itself is shared with the activation state machine, which
//! clears it on deactivation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use evdev::Key;
use log::{debug, info};

use crate::activation::Activator;
use crate::config::{IconId, KeyRef, LayoutConfig};
use crate::devices::EnabledQuery;
use crate::emit::{Emitter, compose_sequence, press_events, release_events, tap_sequence};
use crate::event::TouchEvent;
use crate::geometry::{Corner, IconRect, KeyGrid};

/// Sentinel for a slot position that has never been reported. Outside the
/// device axis range, so it can never be confused with coordinate 0.
pub const NO_POSITION: i32 = -1;

/// State of one tracked multi-touch contact.
#[derive(Debug, Clone)]
pub struct TouchSlot {
    /// Hardware tracking id; present while a contact occupies this slot.
    pub tracking_id: Option<i32>,
    pub x: i32,
    pub y: i32,
    /// The logical key currently considered pressed in this slot.
    pub key: Option<KeyRef>,
    /// Whether a keycode is physically down on the virtual keypad, so the
    /// matching release is guaranteed exactly once.
    pub key_down: bool,
}

impl Default for TouchSlot {
    fn default() -> Self {
        Self {
            tracking_id: None,
            x: NO_POSITION,
            y: NO_POSITION,
            key: None,
            key_down: false,
        }
    }
}

/// Fixed-capacity table of contact slots, indexed by the hardware slot id.
#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<TouchSlot>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![TouchSlot::default(); capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> &TouchSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut TouchSlot {
        &mut self.slots[index]
    }

    /// Clear every slot's key assignment, returning the keycodes that were
    /// still physically down and need a release.
    pub fn take_pressed(&mut self) -> Vec<Key> {
        let mut pressed = Vec::new();
        for slot in &mut self.slots {
            if slot.key_down {
                if let Some(KeyRef::Code(key)) = slot.key {
                    pressed.push(key);
                }
            }
            slot.key = None;
            slot.key_down = false;
        }
        pressed
    }
}

/// Hold/slide recognizer state for one icon.
///
/// `touch_start` is public so tests can move it backwards to simulate an
/// elapsed hold without sleeping.
#[derive(Debug, Default)]
pub struct IconState {
    pub touch_start: Option<Instant>,
}

/// Behaviour flags copied out of the layout so the dispatcher owns its
/// configuration.
struct DispatchSettings {
    pad_max_x: i32,
    pad_max_y: i32,
    one_touch_key_rotation: bool,
    key_repetitions: bool,
    buttons_inside_numpad: bool,
    touchpad_disables_numpad: bool,
    numlock_corner: Corner,
    numlock_hold: Duration,
    numlock_slide_x_ratio: f64,
    numlock_slide_y_ratio: f64,
    brightness_hold: Duration,
    brightness_slide_x_ratio: f64,
    brightness_slide_y_ratio: f64,
    brightness_enabled: bool,
    slide_activates_numpad: bool,
    slide_deactivates_numpad: bool,
    slide_keys: Vec<Key>,
}

/// The core loop: consumes classified touch events and drives key emission
/// and activation transitions.
pub struct Dispatcher {
    grid: KeyGrid,
    numlock_rect: IconRect,
    brightness_rect: IconRect,
    settings: DispatchSettings,
    slots: Arc<Mutex<SlotTable>>,
    emitter: Emitter,
    activator: Arc<Activator>,
    enabled_query: Arc<dyn EnabledQuery>,
    current_slot: usize,
    unsupported_slot: bool,
    /// Icon recognizer state - public for direct manipulation in tests.
    pub numlock_icon: IconState,
    pub brightness_icon: IconState,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layout: &LayoutConfig,
        grid: KeyGrid,
        pad_max_x: i32,
        pad_max_y: i32,
        slots: Arc<Mutex<SlotTable>>,
        emitter: Emitter,
        activator: Arc<Activator>,
        enabled_query: Arc<dyn EnabledQuery>,
    ) -> Self {
        let numlock_corner = if layout.numlock_icon.on_top_left {
            Corner::TopLeft
        } else {
            Corner::TopRight
        };
        let settings = DispatchSettings {
            pad_max_x,
            pad_max_y,
            one_touch_key_rotation: layout.one_touch_key_rotation,
            key_repetitions: layout.key_repetitions,
            buttons_inside_numpad: layout.physical_buttons_inside_numpad,
            touchpad_disables_numpad: layout.touchpad_disables_numpad,
            numlock_corner,
            numlock_hold: Duration::from_secs_f64(layout.numlock_icon.activation_time),
            numlock_slide_x_ratio: layout.numlock_icon.slide_x_ratio,
            numlock_slide_y_ratio: layout.numlock_icon.slide_y_ratio,
            brightness_hold: Duration::from_secs_f64(layout.brightness_icon.activation_time),
            brightness_slide_x_ratio: layout.brightness_icon.slide_x_ratio,
            brightness_slide_y_ratio: layout.brightness_icon.slide_y_ratio,
            brightness_enabled: !layout.backlight_levels.is_empty()
                && !layout.brightness_icon.brightness_func_disabled,
            slide_activates_numpad: layout.brightness_icon.slide_activates_numpad,
            slide_deactivates_numpad: layout.brightness_icon.slide_deactivates_numpad,
            slide_keys: layout.brightness_icon.slide_keys.clone(),
        };

        Self {
            grid,
            numlock_rect: IconRect::new(
                layout.numlock_icon.width,
                layout.numlock_icon.height,
                numlock_corner,
                pad_max_x,
            ),
            brightness_rect: IconRect::new(
                layout.brightness_icon.width,
                layout.brightness_icon.height,
                Corner::TopLeft,
                pad_max_x,
            ),
            settings,
            slots,
            emitter,
            activator,
            enabled_query,
            current_slot: 0,
            unsupported_slot: false,
            numlock_icon: IconState::default(),
            brightness_icon: IconState::default(),
        }
    }

    /// Feed one classified event through the dispatch logic.
    pub fn handle(&mut self, event: TouchEvent) {
        match event {
            TouchEvent::SlotSelect(index) => self.on_slot_select(index),
            // hardware reported more contacts than the layout supports;
            // drop everything until a supported slot is selected again
            _ if self.unsupported_slot => {}
            TouchEvent::PositionX(x) => self.on_position_x(x),
            TouchEvent::PositionY(y) => self.on_position_y(y),
            TouchEvent::TrackingId(id) => self.on_tracking_id(id),
            TouchEvent::Touch(value) => self.on_touch(value),
            TouchEvent::Timestamp => self.on_timestamp(),
            TouchEvent::Button => {
                if self.settings.buttons_inside_numpad && self.activator.is_active() {
                    // the buttons sit under the overlay; a click there is
                    // spurious while the numpad is on
                    debug!("Swallowing physical button event");
                }
            }
        }
    }

    fn on_slot_select(&mut self, index: i32) {
        let capacity = {
            let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.capacity()
        };
        if index >= 0 && (index as usize) < capacity {
            self.current_slot = index as usize;
            self.unsupported_slot = false;
        } else {
            debug!("Contact slot {index} beyond supported capacity {capacity}");
            self.unsupported_slot = true;
        }
    }

    fn on_position_x(&mut self, x: i32) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.slot_mut(self.current_slot).x = x;
        }
        self.check_finger_moved();
    }

    fn on_position_y(&mut self, y: i32) {
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.slot_mut(self.current_slot).y = y;
        }
        self.check_finger_moved();
    }

    /// After a position update, re-resolve the key under a held contact and
    /// rotate or release when it changed.
    fn check_finger_moved(&mut self) {
        let (x, y, key) = self.current_snapshot();
        let Some(key) = key else {
            return;
        };
        if matches!(key, KeyRef::Icon(_)) {
            return;
        }
        if !self.activator.is_active() {
            return;
        }

        let touched_now = self.grid.map(x, y).cloned();
        if touched_now.as_ref() == Some(&key) {
            return;
        }

        if self.settings.one_touch_key_rotation {
            if let Some(new_key) = touched_now {
                self.press_current(new_key);
                return;
            }
        }
        // moved off the key without rotation: release, the finger has to
        // lift and press again to register a new key
        self.release_current();
    }

    fn on_tracking_id(&mut self, id: i32) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot_mut(self.current_slot);
        if id > 0 {
            debug!("Started new contact in slot {}", self.current_slot);
            slot.tracking_id = Some(id);
        } else {
            debug!("Ended contact in slot {}", self.current_slot);
            slot.tracking_id = None;
        }
    }

    fn on_touch(&mut self, value: i32) {
        let (x, y, key) = self.current_snapshot();
        debug!("Finger transition {value} at x {x} y {y}");

        if self.numlock_rect.contains(x, y) {
            self.on_icon_touch(IconId::Numlock, value);
            return;
        }
        if self.brightness_rect.contains(x, y) {
            self.on_icon_touch(IconId::Brightness, value);
            return;
        }

        // a contact that began inside an icon never reaches the grid logic
        if let Some(KeyRef::Icon(icon)) = key {
            if value == 0 {
                self.on_icon_release_away(icon, x, y);
            }
            return;
        }

        if !self.activator.is_active() {
            return;
        }
        if !self.grid.rect().contains(x, y) {
            return;
        }

        if value == 0 {
            // spurious release-without-press is dropped by release_current
            // finding no assigned key
            self.release_current();
            return;
        }

        let Some(touched) = self.grid.map(x, y).cloned() else {
            return;
        };
        self.press_current(touched);
    }

    /// Finger transition inside an icon rectangle: arm the hold recognizer
    /// on contact-down, reset on release.
    fn on_icon_touch(&mut self, icon: IconId, value: i32) {
        if value != 0 {
            info!("Touched {icon} icon");
            self.icon_state_mut(icon).touch_start = Some(Instant::now());
            self.assign_current(KeyRef::Icon(icon));
        } else {
            self.icon_state_mut(icon).touch_start = None;
            self.release_current();
        }
    }

    /// Release of an icon-originated contact outside the icon rectangle:
    /// fire the slide binding when it moved far enough, otherwise just
    /// reset.
    fn on_icon_release_away(&mut self, icon: IconId, x: i32, y: i32) {
        let armed = self.icon_state_mut(icon).touch_start.take().is_some();
        self.release_current();
        if !armed || !self.slid_away(icon, x, y) {
            return;
        }

        info!("Slid away from {icon} icon");
        match icon {
            IconId::Numlock => self.activator.toggle(),
            IconId::Brightness => {
                self.emitter.send(&tap_sequence(&self.settings.slide_keys));
                if self.settings.slide_activates_numpad && !self.activator.is_active() {
                    self.activator.toggle();
                } else if self.settings.slide_deactivates_numpad && self.activator.is_active() {
                    self.activator.toggle();
                }
            }
        }
    }

    /// Slide-away test: the release point must have moved past the
    /// configured ratio of the axis range on both axes, away from the
    /// icon's corner.
    fn slid_away(&self, icon: IconId, x: i32, y: i32) -> bool {
        let max_x = f64::from(self.settings.pad_max_x);
        let max_y = f64::from(self.settings.pad_max_y);
        let (x_ratio, y_ratio, corner) = match icon {
            IconId::Numlock => (
                self.settings.numlock_slide_x_ratio,
                self.settings.numlock_slide_y_ratio,
                self.settings.numlock_corner,
            ),
            IconId::Brightness => (
                self.settings.brightness_slide_x_ratio,
                self.settings.brightness_slide_y_ratio,
                Corner::TopLeft,
            ),
        };

        let x_moved = match corner {
            Corner::TopLeft => f64::from(x) > x_ratio * max_x,
            Corner::TopRight => f64::from(x) < max_x - x_ratio * max_x,
        };
        x_moved && f64::from(y) > y_ratio * max_y
    }

    fn on_timestamp(&mut self) {
        let (x, y, key) = self.current_snapshot();

        if self.numlock_rect.contains(x, y)
            && matches!(key, Some(KeyRef::Icon(IconId::Numlock)))
            && self.hold_expired(IconId::Numlock)
        {
            info!("Held numlock icon past its activation time");
            if self.numlock_toggle_allowed() {
                self.activator.toggle();
            }
            self.release_current();
            return;
        }

        if self.activator.is_active()
            && self.settings.brightness_enabled
            && self.brightness_rect.contains(x, y)
            && matches!(key, Some(KeyRef::Icon(IconId::Brightness)))
            && self.hold_expired(IconId::Brightness)
        {
            info!("Held brightness icon past its activation time");
            self.activator.advance_brightness();
        }
    }

    /// Check the hold recognizer for an icon; on expiry the numlock icon
    /// disarms (one toggle per touch) while the brightness icon re-arms so
    /// keeping it held cycles through the levels.
    fn hold_expired(&mut self, icon: IconId) -> bool {
        let duration = match icon {
            IconId::Numlock => self.settings.numlock_hold,
            IconId::Brightness => self.settings.brightness_hold,
        };
        let state = self.icon_state_mut(icon);
        let Some(start) = state.touch_start else {
            return false;
        };
        if start.elapsed() < duration {
            return false;
        }
        state.touch_start = match icon {
            IconId::Numlock => None,
            IconId::Brightness => Some(Instant::now()),
        };
        true
    }

    /// The hold-toggle respects an externally disabled touchpad: querying
    /// once at gesture time, and assuming "enabled" when the query fails.
    fn numlock_toggle_allowed(&self) -> bool {
        if !self.settings.touchpad_disables_numpad {
            return true;
        }
        match self.enabled_query.is_enabled() {
            Ok(enabled) => enabled,
            Err(e) => {
                debug!("Touchpad enabled query failed, assuming enabled: {e}");
                true
            }
        }
    }

    fn icon_state_mut(&mut self, icon: IconId) -> &mut IconState {
        match icon {
            IconId::Numlock => &mut self.numlock_icon,
            IconId::Brightness => &mut self.brightness_icon,
        }
    }

    fn current_snapshot(&self) -> (i32, i32, Option<KeyRef>) {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.slot(self.current_slot);
        (slot.x, slot.y, slot.key.clone())
    }

    /// Assign a key to the current slot without emitting anything (used for
    /// the icon pseudo-keys). Any previous assignment is released first.
    fn assign_current(&mut self, key: KeyRef) {
        self.release_current();
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.slot_mut(self.current_slot).key = Some(key);
    }

    /// Press a key in the current slot: release any previous assignment,
    /// then emit per the repetition policy. Without key repetition the
    /// matching release follows immediately so the host owns auto-repeat.
    fn press_current(&mut self, key: KeyRef) {
        self.release_current();

        let events = match &key {
            KeyRef::Code(code) => {
                let mut events = press_events(*code);
                if !self.settings.key_repetitions {
                    events.extend(release_events(*code));
                }
                events
            }
            KeyRef::Literal(text) => compose_sequence(text),
            KeyRef::Icon(_) => Vec::new(),
        };
        let stays_down = matches!(key, KeyRef::Code(_)) && self.settings.key_repetitions;

        debug!("Pressed numpad key {key:?}");
        {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.slot_mut(self.current_slot);
            slot.key = Some(key);
            slot.key_down = stays_down;
        }
        self.emitter.send(&events);
    }

    /// Release the current slot's key, emitting the paired "up" only when
    /// one is still physically down.
    fn release_current(&mut self) {
        let (key, was_down) = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.slot_mut(self.current_slot);
            let key = slot.key.take();
            let was_down = slot.key_down;
            slot.key_down = false;
            (key, was_down)
        };
        let Some(key) = key else {
            return;
        };

        debug!("Unpressed numpad key {key:?}");
        if was_down {
            if let KeyRef::Code(code) = key {
                self.emitter.send(&release_events(code));
            }
        }
    }
}
