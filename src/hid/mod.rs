//! Pedal HID access
//!
//! Decodes raw input reports and, on macOS, runs the reader thread that
//! finds, seizes, and polls the configured pedal via hidapi.

#[cfg(target_os = "macos")]
mod device;
mod report;

#[cfg(target_os = "macos")]
pub use device::{DeviceError, DeviceReader};
pub use report::{decode, DeviceReport, ReportFormat, UsageCategory};
