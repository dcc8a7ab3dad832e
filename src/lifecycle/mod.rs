//! Process lifecycle for the monitor binary

mod shutdown;

pub use shutdown::ShutdownSignal;
