//! Hotkey module: key identifiers and simultaneous key-set matching
//!
//! Keys reported by the platform backends are normalized into [`Key`]
//! names; a [`Hotkey`] is a set of them that must be held together.

mod keys;
mod tracker;

pub use keys::{HeldKeys, Hotkey, Key, Side};
pub(crate) use tracker::HotkeyTracker;
