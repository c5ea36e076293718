//! Top-level orchestrator: wires the discovered devices to the dispatcher
//! and monitors, and runs the touchpad event loop.
//!
//! Pure event-processing logic lives in [`crate::dispatcher`]; this module
//! is the I/O layer around it.

use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use evdev::{AbsoluteAxisType, Device, InputEvent};
use log::{debug, info, warn};

use crate::activation::{Activator, NumlockLed};
use crate::backlight::{FileBrightnessStore, I2cBacklight};
use crate::config::{LayoutConfig, NumpadError, parse_layout_file};
use crate::devices::{
    EnabledQuery, EvdevGrab, KeyboardLed, XinputQuery, build_virtual_keypad, find_devices,
};
use crate::dispatcher::{Dispatcher, SlotTable};
use crate::emit::{Emitter, KeySink};
use crate::event::classify_event;
use crate::geometry::{KeyGrid, UsableRect};
use crate::monitor::spawn_monitors;

/// Poll timeout for the event loop, so the running flag is re-checked
/// promptly after a shutdown signal.
const DISPATCH_POLL_MS: i32 = 500;

/// Manages one touchpad-to-numpad translation session.
pub struct NumpadManager {
    layout: LayoutConfig,
    running: Arc<AtomicBool>,
}

impl NumpadManager {
    pub fn new(layout_path: impl AsRef<std::path::Path>) -> Result<Self, NumpadError> {
        Ok(Self {
            layout: parse_layout_file(layout_path.as_ref())?,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get a reference to the running flag for signal handling.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Get the log level from the parsed layout.
    pub fn config_log_level(&self) -> &str {
        &self.layout.daemon.log_level
    }

    /// Get the optional log file path from the parsed layout.
    pub fn config_log_file(&self) -> Option<&str> {
        self.layout.daemon.log_file.as_deref()
    }

    /// Discover the hardware, spawn the monitors and run the dispatcher
    /// loop until shutdown or a device error.
    pub fn start(&mut self) -> Result<(), NumpadError> {
        self.running.store(true, Ordering::Relaxed);

        let discovered = find_devices(&self.layout.daemon)?;
        let (pad_max_x, pad_max_y, rect) = self.touchpad_geometry(&discovered.touchpad)?;
        let grid = KeyGrid::new(self.layout.keys.clone(), rect)?;

        let keypad = build_virtual_keypad(&self.layout)?;
        let sink: Arc<Mutex<dyn KeySink + Send>> = Arc::new(Mutex::new(keypad));
        let emitter = Emitter::new(sink);

        let touchpad = Arc::new(Mutex::new(discovered.touchpad));
        let slots = Arc::new(Mutex::new(SlotTable::new(self.layout.slot_capacity())));
        let led = discovered
            .keyboard
            .map(|device| Box::new(KeyboardLed::new(device)) as Box<dyn NumlockLed>);

        let activator = Arc::new(Activator::new(
            &self.layout,
            Box::new(EvdevGrab::new(Arc::clone(&touchpad))),
            led,
            Box::new(I2cBacklight::new(discovered.i2c_id)),
            Box::new(FileBrightnessStore::new(
                self.layout.daemon.brightness_state_file.clone(),
            )),
            emitter.clone(),
            Arc::clone(&slots),
        ));
        let enabled_query: Arc<dyn EnabledQuery> =
            Arc::new(XinputQuery::new(discovered.touchpad_name.clone()));

        let monitors = spawn_monitors(&self.layout, &activator, &enabled_query, &self.running);

        let mut dispatcher = Dispatcher::new(
            &self.layout,
            grid,
            pad_max_x,
            pad_max_y,
            slots,
            emitter,
            Arc::clone(&activator),
            enabled_query,
        );

        info!(
            "Listening for touchpad events on {} ({})",
            discovered.touchpad_path, discovered.touchpad_name
        );
        let result = self.event_loop(&touchpad, &mut dispatcher, &activator);

        self.running.store(false, Ordering::Relaxed);
        activator.request_deactivate();
        for handle in monitors {
            let _ = handle.join();
        }
        result
    }

    /// Read the axis ranges and derive the usable key rectangle from the
    /// configured margins.
    fn touchpad_geometry(
        &self,
        touchpad: &Device,
    ) -> Result<(i32, i32, UsableRect), NumpadError> {
        let abs = touchpad
            .get_abs_state()
            .map_err(|e| NumpadError::BadDimensions(format!("cannot read axis ranges: {e}")))?;
        let x = &abs[AbsoluteAxisType::ABS_X.0 as usize];
        let y = &abs[AbsoluteAxisType::ABS_Y.0 as usize];

        let rect = UsableRect {
            min_x: x.minimum + self.layout.left_margin,
            max_x: x.maximum - self.layout.right_margin,
            min_y: y.minimum + self.layout.top_margin,
            max_y: y.maximum - self.layout.bottom_margin,
        };
        debug!(
            "Touchpad min-max: x {}-{}, y {}-{}",
            x.minimum, x.maximum, y.minimum, y.maximum
        );
        debug!(
            "Numpad min-max: x {}-{}, y {}-{}",
            rect.min_x, rect.max_x, rect.min_y, rect.max_y
        );

        Ok((x.maximum, y.maximum, rect))
    }

    /// Blocking event loop. The wait happens in `poll` on the raw fd so the
    /// device mutex stays free for activation transitions to grab/ungrab
    /// while no events are pending.
    fn event_loop(
        &self,
        touchpad: &Arc<Mutex<Device>>,
        dispatcher: &mut Dispatcher,
        activator: &Arc<Activator>,
    ) -> Result<(), NumpadError> {
        let fd = touchpad
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_raw_fd();

        while self.running.load(Ordering::Relaxed) {
            let mut pollfd = libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            };
            let ready = unsafe { libc::poll(&mut pollfd, 1, DISPATCH_POLL_MS) };
            if ready < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(NumpadError::EventStream(err));
            }
            if ready == 0 {
                continue;
            }

            let events: Vec<InputEvent> = {
                let mut device = touchpad.lock().unwrap_or_else(PoisonError::into_inner);
                match device.fetch_events() {
                    Ok(fetched) => fetched.collect(),
                    Err(e) => {
                        warn!("Touchpad event stream failed: {e}");
                        return Err(NumpadError::EventStream(e));
                    }
                }
            };
            if events.is_empty() {
                continue;
            }

            activator.note_activity();
            for event in &events {
                if !self.running.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(touch_event) = classify_event(event) {
                    dispatcher.handle(touch_event);
                }
            }
        }
        Ok(())
    }
}
