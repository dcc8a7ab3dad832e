//! Error types for the detector and its event sources

/// Errors returned by [`Detector`](crate::Detector) and event sources
#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("failed to install input hook: {0}")]
    HookInstall(String),

    #[error("detector is already running")]
    AlreadyRunning,

    #[error("failed to spawn dispatch thread: {0}")]
    ThreadSpawn(String),

    #[error("hotkey must contain at least one key")]
    EmptyHotkey,

    #[error("unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("invalid value {value:?} for {key}")]
    InvalidConfig { key: &'static str, value: String },
}

/// A registered callback failed while handling an event.
///
/// These never escape the dispatch loop; they are logged and the loop
/// moves on to the next callback.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback panicked: {0}")]
    Panicked(String),

    #[error("callback returned an error: {0:#}")]
    Failed(anyhow::Error),
}

impl CallbackError {
    /// Build from the payload of a caught panic
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }
}
