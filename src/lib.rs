//! keynet: global keyboard, mouse and volume events, delivered to callbacks
//!
//! Register callbacks on a [`Detector`], start it, and the events the OS
//! reports are dispatched on a background thread:
//!
//! ```no_run
//! use keynet::{Detector, EventKind};
//!
//! let detector = Detector::new();
//! detector.on(EventKind::KeyPress, |event| println!("{event}"));
//! detector.on_hotkey([["ctrl", "x"]], |hotkey| println!("{hotkey} pressed"))?;
//! detector.start()?;
//! // ... the host keeps running ...
//! detector.stop();
//! # Ok::<(), keynet::DetectorError>(())
//! ```
//!
//! # Privacy
//!
//! The system source installs a global hook: it sees input typed into
//! every application, not only the host process. On macOS this needs the
//! Accessibility permission; on Linux read access to `/dev/input`.
//! Failing to get it surfaces as [`DetectorError::HookInstall`] from
//! [`Detector::start`].

mod config;
mod dispatch;
mod error;
mod events;
mod hotkey;
mod source;

pub use config::DetectorConfig;
pub use dispatch::{Detector, DispatcherState, HandlerId};
pub use error::{CallbackError, DetectorError};
pub use events::{Event, EventKind, MouseButton, Payload};
pub use hotkey::{HeldKeys, Hotkey, Key, Side};
pub use source::{ChannelSource, EventInjector, EventSource, Polled, SystemSource};
