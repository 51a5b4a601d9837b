//! Pedal input reports and raw report decoding
//!
//! hidapi hands us raw report bytes rather than parsed HID elements, so the
//! footswitch firmware's report layouts are decoded here into usage-level
//! readings the engine understands.

use crate::engine::Timestamp;

/// HID usage pages the pedal is known to report on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageCategory {
    /// Keyboard/Keypad page (0x07)
    Keyboard,
    /// Button page (0x09)
    Button,
    /// Consumer page (0x0C)
    Consumer,
    /// Generic Desktop page (0x01)
    GenericDesktop,
}

/// One reading from the pedal's raw input channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceReport {
    pub usage_category: UsageCategory,
    pub usage_code: u32,
    pub raw_value: i64,
    pub timestamp: Timestamp,
}

/// Whether an interface prefixes its reports with a report id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// No report ids: the boot keyboard layout
    Unnumbered,
    /// Every report starts with its id
    Numbered,
    /// Descriptor unavailable: known ids first, boot keyboard otherwise
    Unknown,
}

impl ReportFormat {
    /// Classify an interface from its raw report descriptor
    pub fn from_descriptor(descriptor: &[u8]) -> Self {
        let mut rest = descriptor;
        while let Some((&prefix, tail)) = rest.split_first() {
            // Long item: [0xFE, size, tag, data...]
            let size = if prefix == LONG_ITEM_PREFIX {
                match tail.first() {
                    Some(&size) => usize::from(size) + 2,
                    None => break,
                }
            } else {
                match prefix & 0x03 {
                    3 => 4,
                    n => usize::from(n),
                }
            };

            if prefix != LONG_ITEM_PREFIX && prefix & 0xFC == REPORT_ID_TAG {
                return Self::Numbered;
            }
            rest = tail.get(size..).unwrap_or_default();
        }
        Self::Unnumbered
    }
}

/// Short item prefix of the Report ID global item, size bits masked
const REPORT_ID_TAG: u8 = 0x84;

const LONG_ITEM_PREFIX: u8 = 0xFE;

/// Length of a boot-protocol keyboard report
const BOOT_KEYBOARD_LEN: usize = 8;

/// Report ids used by the composite footswitch firmware
mod report_id {
    pub const KEYBOARD: u8 = 0x01;
    pub const MOUSE: u8 = 0x02;
    pub const CONSUMER: u8 = 0x03;
    pub const SYSTEM_CONTROL: u8 = 0x04;
}

/// First Keyboard page usage for the modifier byte (Left Control)
const KEYBOARD_MODIFIER_BASE: u32 = 0xE0;

/// First Generic Desktop system-control usage
const SYSTEM_CONTROL_BASE: u32 = 0x80;

/// Decode one raw input report.
///
/// Returns `None` for empty reports and layouts the pedal does not use.
pub fn decode(bytes: &[u8], format: ReportFormat, timestamp: Timestamp) -> Option<DeviceReport> {
    match format {
        ReportFormat::Unnumbered => decode_boot(bytes, timestamp),
        ReportFormat::Numbered => decode_numbered(bytes, timestamp),
        ReportFormat::Unknown => {
            decode_numbered(bytes, timestamp).or_else(|| decode_boot(bytes, timestamp))
        }
    }
}

fn decode_boot(bytes: &[u8], timestamp: Timestamp) -> Option<DeviceReport> {
    let report = bytes.get(..BOOT_KEYBOARD_LEN)?;
    Some(decode_keyboard(report, timestamp))
}

fn decode_numbered(bytes: &[u8], timestamp: Timestamp) -> Option<DeviceReport> {
    let (&id, body) = bytes.split_first()?;
    match id {
        report_id::KEYBOARD if body.len() >= BOOT_KEYBOARD_LEN => {
            Some(decode_keyboard(&body[..BOOT_KEYBOARD_LEN], timestamp))
        }
        report_id::MOUSE => {
            let buttons = *body.first()?;
            Some(DeviceReport {
                usage_category: UsageCategory::Button,
                usage_code: 1,
                raw_value: i64::from(buttons),
                timestamp,
            })
        }
        report_id::CONSUMER if body.len() >= 2 => {
            let usage = u16::from_le_bytes([body[0], body[1]]);
            Some(DeviceReport {
                usage_category: UsageCategory::Consumer,
                usage_code: u32::from(usage),
                raw_value: i64::from(usage != 0),
                timestamp,
            })
        }
        report_id::SYSTEM_CONTROL => {
            let code = *body.first()?;
            // A zero byte is the release of whatever control was held
            let usage_code = if code == 0 {
                SYSTEM_CONTROL_BASE
            } else {
                u32::from(code)
            };
            Some(DeviceReport {
                usage_category: UsageCategory::GenericDesktop,
                usage_code,
                raw_value: i64::from(code != 0),
                timestamp,
            })
        }
        _ => None,
    }
}

/// Decode a boot keyboard report: `[modifiers, reserved, key0..key5]`
fn decode_keyboard(bytes: &[u8], timestamp: Timestamp) -> DeviceReport {
    let modifiers = bytes[0];
    let first_key = bytes[2..].iter().copied().find(|&k| k != 0);

    let usage_code = match first_key {
        Some(key) => u32::from(key),
        None if modifiers != 0 => KEYBOARD_MODIFIER_BASE + modifiers.trailing_zeros(),
        None => 0,
    };
    let held = first_key.is_some() || modifiers != 0;

    DeviceReport {
        usage_category: UsageCategory::Keyboard,
        usage_code,
        raw_value: i64::from(held),
        timestamp,
    }
}
