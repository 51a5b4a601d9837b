//! IPC module for daemon-UI communication
//!
//! Stands in for a menu bar UI: status queries, the enable toggle, quit,
//! and pushed pedal events.

mod protocol;
mod server;

pub use server::Server;
