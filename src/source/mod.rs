//! Event sources: where the dispatch loop pulls events from
//!
//! [`SystemSource`] installs a system-wide input hook. It observes
//! keyboard and mouse input delivered to *every* application, not only
//! the host process; treat anything it reports as sensitive.
//!
//! [`ChannelSource`] is fed in-process through an [`EventInjector`] and
//! needs no OS permission.

mod volume;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "linux")]
use linux as platform;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "macos")]
use macos as platform;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod unsupported;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
use unsupported as platform;

use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{debug, info};

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::Event;

use self::volume::VolumeMonitor;

/// Outcome of a single [`EventSource::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum Polled {
    /// The next event
    Event(Event),
    /// Nothing arrived within the timeout
    Timeout,
    /// The source will never produce another event
    Closed,
}

/// A producer of [`Event`]s consumed by the dispatch loop
pub trait EventSource: Send {
    /// Install hooks and start producing events.
    ///
    /// Fails with [`DetectorError::HookInstall`] if the platform denies it.
    fn open(&mut self) -> Result<(), DetectorError>;

    /// Block until the next event or until `timeout` elapses
    fn poll(&mut self, timeout: Duration) -> Polled;

    /// Release hooks and OS resources; calling it again is a no-op
    fn close(&mut self);

    /// Share a flag that is set while anyone listens for volume changes.
    ///
    /// Sources that sample volume skip sampling while it is clear.
    fn watch_volume_demand(&mut self, _wanted: Arc<AtomicBool>) {}
}

/// Handle for pushing events into a [`ChannelSource`]
#[derive(Debug, Clone)]
pub struct EventInjector {
    tx: mpsc::Sender<Event>,
}

impl EventInjector {
    /// Queue an event; returns false if the source has been dropped
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// An in-process source fed by [`EventInjector`]s.
///
/// Like a real hook it only delivers events sent while it is open;
/// anything queued before `open()` or after `close()` is discarded.
#[derive(Debug)]
pub struct ChannelSource {
    // Keeps the channel connected even when every injector is dropped
    _tx: mpsc::Sender<Event>,
    rx: mpsc::Receiver<Event>,
    open: bool,
}

impl ChannelSource {
    pub fn new() -> (Self, EventInjector) {
        let (tx, rx) = mpsc::channel();
        let injector = EventInjector { tx: tx.clone() };
        (
            Self {
                _tx: tx,
                rx,
                open: false,
            },
            injector,
        )
    }

    fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }
}

impl EventSource for ChannelSource {
    fn open(&mut self) -> Result<(), DetectorError> {
        let stale = self.drain();
        if stale > 0 {
            debug!(stale, "discarded events queued before open");
        }
        self.open = true;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Polled {
        if !self.open {
            return Polled::Closed;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Polled::Event(event),
            Err(mpsc::RecvTimeoutError::Timeout) => Polled::Timeout,
            Err(mpsc::RecvTimeoutError::Disconnected) => Polled::Closed,
        }
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.drain();
        }
    }
}

/// The platform input hook plus the volume monitor, merged into one stream
pub struct SystemSource {
    config: DetectorConfig,
    rx: Option<mpsc::Receiver<Event>>,
    hook: Option<platform::Hook>,
    volume: Option<VolumeMonitor>,
    volume_wanted: Arc<AtomicBool>,
}

impl SystemSource {
    /// A source that samples volume whenever it is open, until a detector
    /// shares its demand flag
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            rx: None,
            hook: None,
            volume: None,
            volume_wanted: Arc::new(AtomicBool::new(true)),
        }
    }
}

impl EventSource for SystemSource {
    fn open(&mut self) -> Result<(), DetectorError> {
        if self.rx.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel();

        if self.config.keyboard || self.config.mouse {
            self.hook = Some(platform::Hook::install(tx.clone(), &self.config)?);
        }

        if let Some(interval) = self.config.volume_poll_interval {
            match VolumeMonitor::spawn(tx, interval, Arc::clone(&self.volume_wanted)) {
                Ok(monitor) => self.volume = Some(monitor),
                Err(e) => {
                    if let Some(hook) = self.hook.take() {
                        hook.uninstall();
                    }
                    return Err(e);
                }
            }
        }

        self.rx = Some(rx);
        info!(
            keyboard = self.config.keyboard,
            mouse = self.config.mouse,
            volume = self.volume.is_some(),
            "system event source opened"
        );
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Polled {
        let Some(rx) = &self.rx else {
            return Polled::Closed;
        };
        match rx.recv_timeout(timeout) {
            Ok(event) => Polled::Event(event),
            Err(mpsc::RecvTimeoutError::Timeout) => Polled::Timeout,
            Err(mpsc::RecvTimeoutError::Disconnected) => Polled::Closed,
        }
    }

    fn close(&mut self) {
        if let Some(hook) = self.hook.take() {
            hook.uninstall();
        }
        if let Some(volume) = self.volume.take() {
            volume.stop();
        }
        if self.rx.take().is_some() {
            info!("system event source closed");
        }
    }

    fn watch_volume_demand(&mut self, wanted: Arc<AtomicBool>) {
        self.volume_wanted = wanted;
    }
}

impl Drop for SystemSource {
    fn drop(&mut self) {
        self.close();
    }
}
