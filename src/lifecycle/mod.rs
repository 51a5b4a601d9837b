//! Process lifecycle management

mod shutdown;

pub use shutdown::{ShutdownSignal, ShutdownTrigger};
