//! Background monitors: periodic reconciliation of the activation state
//! with the host's truth sources.
//!
//! Each monitor is a long-lived thread that only ever requests transitions
//! from the [`Activator`]; the state machine's mutex does the serializing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::activation::Activator;
use crate::config::LayoutConfig;
use crate::devices::EnabledQuery;

const NUMLOCK_POLL: Duration = Duration::from_millis(500);
const TOUCHPAD_POLL: Duration = Duration::from_millis(500);
const INACTIVITY_POLL: Duration = Duration::from_secs(1);

/// Consecutive query failures after which the touchpad-status monitor gives
/// up and treats the feature as unavailable on this host.
const MAX_QUERY_FAILURES: u32 = 9;

fn spawn(name: &str, body: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .expect("Failed to spawn monitor thread")
}

/// Start the monitors that apply to this layout and host. Returns the join
/// handles; all loops stop once `running` is cleared.
pub fn spawn_monitors(
    layout: &LayoutConfig,
    activator: &Arc<Activator>,
    enabled_query: &Arc<dyn EnabledQuery>,
    running: &Arc<AtomicBool>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    // host numlock reconciliation, only when a keyboard LED was found
    if activator.has_host_led() {
        let activator = Arc::clone(activator);
        let running = Arc::clone(running);
        handles.push(spawn("numlock-monitor", move || {
            while running.load(Ordering::Relaxed) {
                activator.reconcile_host_numlock();
                thread::sleep(NUMLOCK_POLL);
            }
        }));
    }

    // external touchpad toggling, only when it is configured to matter
    if layout.touchpad_disables_numpad {
        let activator = Arc::clone(activator);
        let enabled_query = Arc::clone(enabled_query);
        let running = Arc::clone(running);
        handles.push(spawn("touchpad-monitor", move || {
            let mut failures = 0;
            while running.load(Ordering::Relaxed) {
                match enabled_query.is_enabled() {
                    Ok(enabled) => {
                        failures = 0;
                        if !enabled {
                            activator.deactivate_for_disabled_touchpad();
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        debug!(
                            "Touchpad enabled query failed \
                             ({failures}/{MAX_QUERY_FAILURES}): {e}"
                        );
                        if failures >= MAX_QUERY_FAILURES {
                            warn!(
                                "Touchpad status unavailable on this host, \
                                 monitor stopping"
                            );
                            return;
                        }
                    }
                }
                thread::sleep(TOUCHPAD_POLL);
            }
        }));
    }

    if layout.inactivity_timeout > 0.0 {
        let timeout = Duration::from_secs_f64(layout.inactivity_timeout);
        let activator = Arc::clone(activator);
        let running = Arc::clone(running);
        handles.push(spawn("inactivity-monitor", move || {
            while running.load(Ordering::Relaxed) {
                activator.deactivate_if_idle(timeout);
                thread::sleep(INACTIVITY_POLL);
            }
        }));
    }

    info!("Started {} background monitor(s)", handles.len());
    handles
}
