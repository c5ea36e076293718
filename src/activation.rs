//! Activation state machine: the single authority on whether the numpad is
//! active.
//!
//! Every transition - from the dispatcher's icon gestures or from the
//! background monitors - runs under one mutex, together with all of its
//! side effects (touchpad grab, backlight bus command, host numlock sync,
//! slot cleanup), so no thread can observe a half-applied transition.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::backlight::{BacklightBus, BrightnessStore, POWER_OFF_LEVEL, POWER_ON_LEVEL};
use crate::config::LayoutConfig;
use crate::dispatcher::SlotTable;
use crate::emit::{Emitter, numlock_tap_events, release_events};

/// Exclusive claim on the physical touchpad, so the host stops treating it
/// as a pointer while it is a numpad.
pub trait PointerGrab: Send + Sync {
    fn grab(&self) -> io::Result<()>;
    fn ungrab(&self) -> io::Result<()>;
}

/// Host keyboard numlock indicator. `None` means the state cannot be read.
pub trait NumlockLed: Send + Sync {
    fn is_lit(&self) -> Option<bool>;
}

/// The lock-protected triple at the heart of the state machine.
#[derive(Debug)]
pub struct ActivationState {
    pub active: bool,
    /// Index into the configured backlight levels; `None` until a level has
    /// been selected.
    pub brightness: Option<usize>,
    pub last_activity: Instant,
}

/// Serializes all activate/deactivate transitions and their side effects.
pub struct Activator {
    state: Mutex<ActivationState>,
    grab: Box<dyn PointerGrab>,
    led: Option<Box<dyn NumlockLed>>,
    backlight: Box<dyn BacklightBus>,
    store: Box<dyn BrightnessStore>,
    emitter: Emitter,
    slots: Arc<Mutex<SlotTable>>,
    levels: Vec<String>,
    default_level: String,
    sys_numlock_enables_numpad: bool,
}

impl Activator {
    pub fn new(
        layout: &LayoutConfig,
        grab: Box<dyn PointerGrab>,
        led: Option<Box<dyn NumlockLed>>,
        backlight: Box<dyn BacklightBus>,
        store: Box<dyn BrightnessStore>,
        emitter: Emitter,
        slots: Arc<Mutex<SlotTable>>,
    ) -> Self {
        Self {
            state: Mutex::new(ActivationState {
                active: false,
                brightness: None,
                last_activity: Instant::now(),
            }),
            grab,
            led,
            backlight,
            store,
            emitter,
            slots,
            levels: layout.backlight_levels.clone(),
            default_level: layout.default_backlight_level.clone(),
            sys_numlock_enables_numpad: layout.sys_numlock_enables_numpad,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ActivationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn brightness_index(&self) -> Option<usize> {
        self.lock().brightness
    }

    pub fn has_host_led(&self) -> bool {
        self.led.is_some()
    }

    fn led_lit(&self) -> Option<bool> {
        self.led.as_ref().and_then(|led| led.is_lit())
    }

    /// Record touchpad traffic for the inactivity monitor.
    pub fn note_activity(&self) {
        self.lock().last_activity = Instant::now();
    }

    /// Activate unless already active.
    pub fn request_activate(&self) {
        let mut state = self.lock();
        self.activate_locked(&mut state);
    }

    /// Deactivate unless already inactive.
    pub fn request_deactivate(&self) {
        let mut state = self.lock();
        self.deactivate_locked(&mut state);
    }

    /// Flip the activation state; bound to the numlock icon gestures.
    pub fn toggle(&self) {
        let mut state = self.lock();
        if state.active {
            self.deactivate_locked(&mut state);
        } else {
            self.activate_locked(&mut state);
        }
    }

    fn activate_locked(&self, state: &mut ActivationState) {
        if state.active {
            return;
        }
        state.active = true;

        // The numlock tap has to sit as close as possible to the hardware
        // command, because the LED monitor compares the two.
        if self.led_lit() != Some(true) {
            self.emitter.send(&numlock_tap_events());
            info!("System numlock activated");
        }

        if let Err(e) = self.grab.grab() {
            warn!("Cannot grab touchpad: {e}");
        }

        let restore = self
            .store
            .get()
            .unwrap_or_else(|| self.default_level.clone());
        if let Err(e) = self.backlight.send_level(POWER_ON_LEVEL) {
            warn!("Cannot power on numpad backlight: {e}");
        }
        if restore != POWER_ON_LEVEL {
            if let Err(e) = self.backlight.send_level(&restore) {
                warn!("Cannot restore backlight level {restore}: {e}");
            }
        }
        state.brightness = self.levels.iter().position(|level| *level == restore);

        info!("Numpad activated");
    }

    fn deactivate_locked(&self, state: &mut ActivationState) {
        if !state.active {
            return;
        }
        state.active = false;

        if self.led_lit() == Some(true) {
            self.emitter.send(&numlock_tap_events());
            info!("System numlock deactivated");
        }

        if let Err(e) = self.grab.ungrab() {
            warn!("Cannot ungrab touchpad: {e}");
        }
        if let Err(e) = self.backlight.send_level(POWER_OFF_LEVEL) {
            warn!("Cannot power off numpad backlight: {e}");
        }
        state.brightness = Some(0);

        // Release whatever is still held down so no key stays stuck across
        // the deactivation.
        let pressed = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.take_pressed()
        };
        for key in pressed {
            self.emitter.send(&release_events(key));
        }

        info!("Numpad deactivated");
    }

    /// Advance to the next backlight level (wrapping), persist it and push
    /// it to the hardware. Lighting is best-effort: failures are logged and
    /// the translation loop keeps running.
    pub fn advance_brightness(&self) {
        let mut state = self.lock();
        if !state.active || self.levels.is_empty() {
            return;
        }

        let next = state
            .brightness
            .map_or(0, |index| (index + 1) % self.levels.len());
        state.brightness = Some(next);
        let level = &self.levels[next];
        info!("Increased backlight brightness to {level}");

        self.store.set(level);
        if let Err(e) = self.backlight.send_level(level) {
            warn!("Cannot set backlight level {level}: {e}");
        }
    }

    /// Numlock-LED monitor entry point: follow the host when it disagrees.
    pub fn reconcile_host_numlock(&self) {
        let mut state = self.lock();
        let Some(lit) = self.led_lit() else {
            return;
        };
        if !lit && state.active {
            self.deactivate_locked(&mut state);
        } else if lit && self.sys_numlock_enables_numpad && !state.active {
            self.activate_locked(&mut state);
        }
    }

    /// Touchpad-status monitor entry point, called when the touchpad was
    /// externally disabled.
    pub fn deactivate_for_disabled_touchpad(&self) {
        let mut state = self.lock();
        if state.active {
            info!("Touchpad disabled by host");
            self.deactivate_locked(&mut state);
        }
    }

    /// Inactivity monitor entry point: deactivate after a quiet period.
    pub fn deactivate_if_idle(&self, timeout: Duration) {
        let mut state = self.lock();
        if state.active && state.last_activity.elapsed() > timeout {
            info!("No touchpad events for {}s", timeout.as_secs());
            self.deactivate_locked(&mut state);
        }
    }
}
