//! Dispatch module: registration table, matching, and the dispatch thread
//!
//! [`Detector`] is the public entry point; the registry and per-run
//! dispatcher stay internal.

mod detector;
mod dispatcher;
mod registry;

pub use detector::{Detector, DispatcherState};
pub use registry::HandlerId;
