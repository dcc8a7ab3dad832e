//! Fallback for platforms without an input hook backend

use std::sync::mpsc;

use crate::config::DetectorConfig;
use crate::error::DetectorError;
use crate::events::Event;

pub(crate) struct Hook;

impl Hook {
    pub fn install(_event_tx: mpsc::Sender<Event>, _config: &DetectorConfig) -> Result<Self, DetectorError> {
        Err(DetectorError::HookInstall(format!(
            "no input hook backend for {}",
            std::env::consts::OS
        )))
    }

    pub fn uninstall(self) {}
}
