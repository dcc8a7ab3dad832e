//! Matching events against registrations and running callbacks
//!
//! A [`Dispatcher`] lives on the dispatch thread for one run of the loop.
//! It owns the held-key set, so hotkey state starts empty on every start.
//! Once the loop's running flag is cleared no further callback is invoked,
//! even for the rest of the event being dispatched.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{error, trace};

use crate::error::CallbackError;
use crate::events::{Event, Payload};
use crate::hotkey::HotkeyTracker;

use super::registry::{hotkey_specs, HandlerId, Registry, SpecId};

pub(crate) struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    tracker: HotkeyTracker<SpecId>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(registry: Arc<RwLock<Registry>>, running: Arc<AtomicBool>) -> Self {
        Self {
            registry,
            tracker: HotkeyTracker::new(),
            running,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Dispatch one event: hotkeys first, then plain registrations.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&mut self, event: &Event) -> usize {
        trace!(%event, "dispatching");
        let mut invoked = 0;

        match &event.payload {
            Payload::KeyPress { key, side } => {
                let hotkeys = self.read_registry().hotkeys();
                let fired = self.tracker.key_down(key, *side, hotkey_specs(&hotkeys));
                for (id, index) in fired {
                    if !self.is_running() {
                        return invoked;
                    }
                    let Some(handler) = hotkeys.iter().find(|h| h.id == id) else {
                        continue;
                    };
                    let hotkey = &handler.hotkeys[index];
                    let result = run_callback(|| (handler.callback)(hotkey));
                    report(id, event, result);
                    invoked += 1;
                }
            }
            Payload::KeyRelease { key, side } => {
                let hotkeys = self.read_registry().hotkeys();
                self.tracker.key_up(key, *side, hotkey_specs(&hotkeys));
            }
            _ => {}
        }

        let handlers = self.read_registry().handlers_for(event.kind());
        for handler in handlers.iter().filter(|h| h.admits(event)) {
            if !self.is_running() {
                break;
            }
            let result = run_callback(|| (handler.callback)(event));
            report(handler.id, event, result);
            invoked += 1;
        }

        invoked
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a callback, turning panics and errors into [`CallbackError`]
fn run_callback<F>(callback: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(CallbackError::Failed(e)),
        Err(payload) => Err(CallbackError::from_panic(payload)),
    }
}

fn report(id: HandlerId, event: &Event, result: Result<(), CallbackError>) {
    if let Err(e) = result {
        error!(handler = %id, %event, error = %e, "callback failed");
    }
}
