//! The public detector: registration API and dispatch thread lifecycle
//!
//! Lifecycle: `Idle --start--> Running --stop--> Stopped --start--> Running`.
//! Restarting after a stop is allowed; the source is reopened and the
//! held-key set starts empty.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::{Event, EventKind};
use crate::hotkey::{Hotkey, Key};
use crate::source::{EventSource, Polled, SystemSource};

use super::dispatcher::Dispatcher;
use super::registry::{event_callback, hotkey_callback, HandlerId, Registry, VolumeThreshold};

/// Lifecycle state of a [`Detector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatcherState {
    /// Constructed, never started
    #[default]
    Idle,
    /// Dispatch thread running, hook installed
    Running,
    /// Stopped; may be started again
    Stopped,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Idle => write!(f, "Idle"),
            DispatcherState::Running => write!(f, "Running"),
            DispatcherState::Stopped => write!(f, "Stopped"),
        }
    }
}

type SharedSource = Arc<Mutex<Box<dyn EventSource>>>;

/// The dispatch thread and its cancellation flag
struct Worker {
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn is_current_thread(&self) -> bool {
        self.thread.thread().id() == thread::current().id()
    }

    fn join(self) {
        if self.thread.join().is_err() {
            error!("dispatch thread panicked");
        }
    }
}

struct Lifecycle {
    state: DispatcherState,
    worker: Option<Worker>,
}

/// Subscribes callbacks to input events and dispatches them on a
/// background thread.
///
/// Callbacks run on the dispatch thread, one at a time, in registration
/// order. Registering from any thread is allowed at any time, including
/// from inside a callback.
pub struct Detector {
    registry: Arc<RwLock<Registry>>,
    source: SharedSource,
    poll_timeout: Duration,
    lifecycle: Mutex<Lifecycle>,
}

impl Detector {
    /// Create a detector over the system input hook with default settings
    pub fn new() -> Self {
        Self::with_config(DetectorConfig::default())
    }

    /// Create a detector over the system input hook
    pub fn with_config(config: DetectorConfig) -> Self {
        let poll_timeout = config.poll_timeout;
        Self::with_source(SystemSource::new(config)).poll_timeout(poll_timeout)
    }

    /// Create a detector over any event source
    pub fn with_source<S: EventSource + 'static>(mut source: S) -> Self {
        let registry = Registry::default();
        source.watch_volume_demand(registry.volume_wanted());
        Self {
            registry: Arc::new(RwLock::new(registry)),
            source: Arc::new(Mutex::new(Box::new(source))),
            poll_timeout: DetectorConfig::default().poll_timeout,
            lifecycle: Mutex::new(Lifecycle {
                state: DispatcherState::Idle,
                worker: None,
            }),
        }
    }

    /// Bound on each source poll, and so on how long `stop()` can take
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Call `callback` for every event of `kind`
    pub fn on<F>(&self, kind: EventKind, callback: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.try_on(kind, move |event| {
            callback(event);
            Ok(())
        })
    }

    /// Like [`on`](Self::on), for callbacks that can fail.
    ///
    /// Errors are logged with the event that caused them.
    pub fn try_on<F>(&self, kind: EventKind, callback: F) -> HandlerId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self
            .write_registry()
            .add_handler(kind, event_callback(callback), None);
        info!(handler = %id, %kind, "callback registered");
        id
    }

    /// Call `callback` once each time any of `key_sets` becomes fully held.
    ///
    /// Each set fires independently and re-arms when one of its keys is
    /// released.
    ///
    /// ```no_run
    /// let detector = keynet::Detector::new();
    /// detector.on_hotkey([["ctrl", "x"]], |hotkey| println!("{hotkey}"))?;
    /// # Ok::<(), keynet::DetectorError>(())
    /// ```
    pub fn on_hotkey<S, I, K, F>(&self, key_sets: S, callback: F) -> Result<HandlerId, DetectorError>
    where
        S: IntoIterator<Item = I>,
        I: IntoIterator<Item = K>,
        K: Into<Key>,
        F: Fn(&Hotkey) + Send + Sync + 'static,
    {
        let hotkeys = key_sets
            .into_iter()
            .map(Hotkey::new)
            .collect::<Result<Vec<_>, _>>()?;
        if hotkeys.is_empty() {
            return Err(DetectorError::EmptyHotkey);
        }

        let names: Vec<String> = hotkeys.iter().map(Hotkey::to_string).collect();
        let id = self.write_registry().add_hotkeys(
            hotkeys,
            hotkey_callback(move |hotkey| {
                callback(hotkey);
                Ok(())
            }),
        );
        info!(handler = %id, hotkeys = ?names, "hotkey registered");
        Ok(id)
    }

    /// Call `callback` on volume changes that cross `threshold` percent.
    ///
    /// The first reading always passes; after that only readings on the
    /// other side of the threshold from the previous one do.
    pub fn on_volume_threshold<F>(&self, threshold: u8, callback: F) -> HandlerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.write_registry().add_handler(
            EventKind::VolumeChange,
            event_callback(move |event| {
                callback(event);
                Ok(())
            }),
            Some(VolumeThreshold::new(threshold)),
        );
        info!(handler = %id, threshold, "volume threshold registered");
        id
    }

    /// Remove a registration; returns false if it was already gone
    pub fn off(&self, id: HandlerId) -> bool {
        let removed = self.write_registry().remove(id);
        if removed {
            info!(handler = %id, "callback removed");
        }
        removed
    }

    /// Start the dispatch thread.
    ///
    /// Returns once the source is open. If opening fails the error is
    /// returned and the state is left as it was.
    pub fn start(&self) -> Result<(), DetectorError> {
        // A loop told to stop from inside its own callback may still be
        // winding down; join it without holding the lifecycle lock
        let previous = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.state == DispatcherState::Running {
                // A loop that exited on its own because the source closed
                // counts as stopped
                match &lifecycle.worker {
                    Some(worker) if !worker.running.load(Ordering::SeqCst) => {
                        info!("dispatch loop exited on its own, restarting");
                        lifecycle.state = DispatcherState::Stopped;
                    }
                    _ => return Err(DetectorError::AlreadyRunning),
                }
            }
            match lifecycle.worker.take() {
                Some(worker) if worker.is_current_thread() => {
                    lifecycle.worker = Some(worker);
                    return Err(DetectorError::AlreadyRunning);
                }
                other => other,
            }
        };
        if let Some(previous) = previous {
            previous.join();
        }

        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state == DispatcherState::Running {
            return Err(DetectorError::AlreadyRunning);
        }

        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);

        let thread = {
            let source = Arc::clone(&self.source);
            let registry = Arc::clone(&self.registry);
            let running = Arc::clone(&running);
            let poll_timeout = self.poll_timeout;
            thread::Builder::new()
                .name("keynet-dispatch".to_string())
                .spawn(move || run_dispatch_loop(source, registry, running, poll_timeout, ready_tx))
                .map_err(|e| DetectorError::ThreadSpawn(e.to_string()))?
        };

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(DetectorError::HookInstall(
                "dispatch thread exited during startup".to_string(),
            ))
        });

        match opened {
            Ok(()) => {
                lifecycle.state = DispatcherState::Running;
                lifecycle.worker = Some(Worker { running, thread });
                info!("detector started");
                Ok(())
            }
            Err(e) => {
                Worker { running, thread }.join();
                error!(error = %e, "detector failed to start");
                Err(e)
            }
        }
    }

    /// Stop the dispatch thread and release the hook.
    ///
    /// No callback runs after this returns. A no-op unless running. When
    /// called from inside a callback the loop exits after that callback
    /// returns, without waiting.
    pub fn stop(&self) {
        let worker = {
            let mut lifecycle = self.lock_lifecycle();
            if lifecycle.state != DispatcherState::Running {
                return;
            }
            lifecycle.state = DispatcherState::Stopped;
            match lifecycle.worker.take() {
                Some(worker) => {
                    worker.running.store(false, Ordering::SeqCst);
                    if worker.is_current_thread() {
                        warn!("stop() called from a callback, not waiting for the dispatch thread");
                        lifecycle.worker = Some(worker);
                        return;
                    }
                    worker
                }
                None => return,
            }
        };

        worker.join();
        info!("detector stopped");
    }

    /// Current lifecycle state
    pub fn state(&self) -> DispatcherState {
        let lifecycle = self.lock_lifecycle();
        match (&lifecycle.state, &lifecycle.worker) {
            // The loop exits on its own when the source closes
            (DispatcherState::Running, Some(worker)) if !worker.running.load(Ordering::SeqCst) => {
                DispatcherState::Stopped
            }
            (state, _) => *state,
        }
    }

    /// Check if the dispatch loop is running
    pub fn is_running(&self) -> bool {
        self.state() == DispatcherState::Running
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the dispatch thread
fn run_dispatch_loop(
    source: SharedSource,
    registry: Arc<RwLock<Registry>>,
    running: Arc<AtomicBool>,
    poll_timeout: Duration,
    ready: mpsc::SyncSender<Result<(), DetectorError>>,
) {
    let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);

    if let Err(e) = source.open() {
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));
    info!("dispatch loop started");

    let mut dispatcher = Dispatcher::new(registry, Arc::clone(&running));

    while running.load(Ordering::SeqCst) {
        match source.poll(poll_timeout) {
            Polled::Event(event) => {
                // Checked again so nothing is dispatched once stop() began
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                dispatcher.dispatch(&event);
            }
            Polled::Timeout => {}
            Polled::Closed => {
                warn!("event source closed, dispatch loop exiting");
                break;
            }
        }
    }

    source.close();
    running.store(false, Ordering::SeqCst);
    info!("dispatch loop stopped");
}
