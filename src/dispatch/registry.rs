//! Callback registration table
//!
//! Handlers are stored behind `Arc` so the dispatch loop can take a cheap
//! snapshot under the read lock and run callbacks without holding it.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use crate::events::{Event, EventKind, Payload};
use crate::hotkey::Hotkey;

/// Identifies a registration; pass it to [`Detector::off`](crate::Detector::off)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) type EventCallback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;
pub(crate) type HotkeyCallback = Arc<dyn Fn(&Hotkey) -> anyhow::Result<()> + Send + Sync>;

pub(crate) fn event_callback<F>(callback: F) -> EventCallback
where
    F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

pub(crate) fn hotkey_callback<F>(callback: F) -> HotkeyCallback
where
    F: Fn(&Hotkey) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// A plain registration for one event kind
pub(crate) struct EventHandler {
    pub id: HandlerId,
    pub callback: EventCallback,
    pub threshold: Option<VolumeThreshold>,
}

impl EventHandler {
    /// Whether this handler should see `event`
    pub fn admits(&self, event: &Event) -> bool {
        match (&self.threshold, &event.payload) {
            (None, _) => true,
            (Some(threshold), Payload::VolumeChange { level, .. }) => threshold.crossed(*level),
            (Some(_), _) => false,
        }
    }
}

/// Passes a volume event only when `level >= threshold` changes
pub(crate) struct VolumeThreshold {
    threshold: u8,
    // 0 = nothing seen yet, 1 = below, 2 = at or above
    side: AtomicU8,
}

impl VolumeThreshold {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            side: AtomicU8::new(0),
        }
    }

    fn crossed(&self, level: u8) -> bool {
        let side = if level >= self.threshold { 2 } else { 1 };
        self.side.swap(side, Ordering::Relaxed) != side
    }
}

/// A registration for one or more hotkeys sharing a callback
pub(crate) struct HotkeyHandler {
    pub id: HandlerId,
    pub hotkeys: Vec<Hotkey>,
    pub callback: HotkeyCallback,
}

/// Identifies one hotkey within a [`HotkeyHandler`]
pub(crate) type SpecId = (HandlerId, usize);

#[derive(Default)]
pub(crate) struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<Arc<EventHandler>>>,
    hotkeys: Vec<Arc<HotkeyHandler>>,
    // Set while any volume handler is registered; shared with the source
    volume_wanted: Arc<AtomicBool>,
}

impl Registry {
    fn allocate_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    pub fn add_handler(
        &mut self,
        kind: EventKind,
        callback: EventCallback,
        threshold: Option<VolumeThreshold>,
    ) -> HandlerId {
        let id = self.allocate_id();
        self.handlers.entry(kind).or_default().push(Arc::new(EventHandler {
            id,
            callback,
            threshold,
        }));
        self.refresh_volume_wanted();
        id
    }

    pub fn add_hotkeys(&mut self, hotkeys: Vec<Hotkey>, callback: HotkeyCallback) -> HandlerId {
        let id = self.allocate_id();
        self.hotkeys.push(Arc::new(HotkeyHandler {
            id,
            hotkeys,
            callback,
        }));
        id
    }

    /// Remove a registration; returns false if it was not found
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.len();
        for handlers in self.handlers.values_mut() {
            handlers.retain(|h| h.id != id);
        }
        self.hotkeys.retain(|h| h.id != id);
        self.refresh_volume_wanted();
        self.len() != before
    }

    /// Flag tracking whether any volume handler is registered
    pub fn volume_wanted(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.volume_wanted)
    }

    fn refresh_volume_wanted(&self) {
        let wanted = self
            .handlers
            .get(&EventKind::VolumeChange)
            .is_some_and(|handlers| !handlers.is_empty());
        self.volume_wanted.store(wanted, Ordering::SeqCst);
    }

    /// Snapshot of the handlers for `kind`, in registration order
    pub fn handlers_for(&self, kind: EventKind) -> Vec<Arc<EventHandler>> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    /// Snapshot of the hotkey registrations, in registration order
    pub fn hotkeys(&self) -> Vec<Arc<HotkeyHandler>> {
        self.hotkeys.clone()
    }

    /// Total number of registrations
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum::<usize>() + self.hotkeys.len()
    }
}

/// Flatten hotkey registrations into `(SpecId, &Hotkey)` pairs
pub(crate) fn hotkey_specs(
    handlers: &[Arc<HotkeyHandler>],
) -> impl Iterator<Item = (SpecId, &Hotkey)> {
    handlers.iter().flat_map(|handler| {
        handler
            .hotkeys
            .iter()
            .enumerate()
            .map(move |(index, hotkey)| ((handler.id, index), hotkey))
    })
}
