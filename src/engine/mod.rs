//! Pedal correlation engine
//!
//! Provides the pieces that turn pedal reports into a held modifier:
//! - Clock: monotonic timestamps shared by both input streams
//! - Debounce: rejects noisy transitions
//! - Suppression window: drops the pedal's native keystroke
//! - Connection and press state machines
//! - Engine: the orchestrator owning all of the above
//! - Driver: serialized loop glue between the engine and the host

pub mod clock;
pub mod connection;
pub mod debounce;
mod driver;
mod machine;
pub mod press;
pub mod suppression;

pub use clock::{Clock, MonotonicClock, Timestamp};
pub use driver::{DeviceSignal, Driver, Flow, InjectError, Injector, LoopInput, LoopSender};
pub use machine::{Disposition, Engine, EngineSettings, EngineStatus};
pub use press::ModifierCommand;
