//! Signal handling for graceful shutdown

use std::fmt;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tracing::debug;

/// Which signal ended the wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Terminate,
    Interrupt,
}

impl fmt::Display for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shutdown::Terminate => write!(f, "SIGTERM"),
            Shutdown::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

impl ShutdownSignal {
    /// Register the signal handlers; must be called inside a Tokio runtime
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for a shutdown signal
    pub async fn wait(&mut self) -> Shutdown {
        let received = tokio::select! {
            _ = self.sigterm.recv() => Shutdown::Terminate,
            _ = self.sigint.recv() => Shutdown::Interrupt,
        };
        debug!(signal = %received, "received shutdown signal");
        received
    }
}
