//! Pedal device reader using hidapi
//!
//! Scans for the configured vendor/product id, seizes every matching
//! interface exclusively where the OS allows it, and forwards decoded
//! reports to the pedal loop. Each opened interface gets its own blocking
//! reader, so a report is stamped and sent as soon as it arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{Clock, DeviceSignal, LoopInput, LoopSender, MonotonicClock};

use super::{decode, ReportFormat};

/// Delay between scans while the pedal is absent
const RESCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Read timeout in milliseconds; bounds how long a stop request waits
const READ_TIMEOUT_MS: i32 = 250;

/// Large enough for any report the pedal sends
const REPORT_BUFFER_LEN: usize = 64;

/// Upper bound on a report descriptor (HID_API_MAX_REPORT_DESCRIPTOR_SIZE)
const DESCRIPTOR_BUFFER_LEN: usize = 4096;

/// Errors that can occur in the device reader
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device reader is already running")]
    AlreadyRunning,

    #[error("failed to initialize hidapi: {0}")]
    Init(#[source] hidapi::HidError),

    #[error("failed to spawn reader thread: {0}")]
    ThreadSpawn(String),
}

/// Background reader for the configured pedal
pub struct DeviceReader {
    vendor_id: u16,
    product_id: u16,
    clock: MonotonicClock,
    loop_tx: LoopSender,
    running: Arc<AtomicBool>,
}

/// One opened HID interface of the pedal
struct OpenInterface {
    device: HidDevice,
    exclusive: bool,
    format: ReportFormat,
}

/// Why polling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollEnd {
    Stopped,
    Removed,
    LoopClosed,
}

impl DeviceReader {
    pub fn new(
        vendor_id: u16,
        product_id: u16,
        clock: MonotonicClock,
        loop_tx: LoopSender,
    ) -> Self {
        Self {
            vendor_id,
            product_id,
            clock,
            loop_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the reader thread
    pub fn start(&self) -> Result<(), DeviceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DeviceError::AlreadyRunning);
        }

        let scanner = Scanner {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            clock: self.clock,
            loop_tx: self.loop_tx.clone(),
            running: Arc::clone(&self.running),
        };
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("pedal-device".to_string())
            .spawn(move || {
                info!(
                    vendor_id = format_args!("{:#06x}", scanner.vendor_id),
                    product_id = format_args!("{:#06x}", scanner.product_id),
                    "device reader thread started"
                );

                if let Err(e) = scanner.run() {
                    error!(?e, "device reader error");
                }

                running.store(false, Ordering::SeqCst);
                info!("device reader thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                DeviceError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Ask the reader thread to exit after its current read
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// State moved onto the reader thread
struct Scanner {
    vendor_id: u16,
    product_id: u16,
    clock: MonotonicClock,
    loop_tx: LoopSender,
    running: Arc<AtomicBool>,
}

impl Scanner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn send(&self, signal: DeviceSignal) -> bool {
        self.loop_tx.send(LoopInput::Device(signal)).is_ok()
    }

    fn run(self) -> Result<(), DeviceError> {
        let mut api = HidApi::new().map_err(DeviceError::Init)?;

        while self.is_running() {
            let interfaces = self.open_matching(&mut api);
            if interfaces.is_empty() {
                thread::sleep(RESCAN_INTERVAL);
                continue;
            }

            let exclusive = interfaces.iter().all(|i| i.exclusive);
            info!(interfaces = interfaces.len(), exclusive, "pedal opened");
            if !self.send(DeviceSignal::Matched { exclusive }) {
                break;
            }

            // Each reader closes its handle on exit, releasing the seize
            match self.poll(interfaces) {
                PollEnd::Removed => {
                    if !self.send(DeviceSignal::Removed) {
                        break;
                    }
                }
                PollEnd::Stopped => {
                    let _ = self.send(DeviceSignal::Removed);
                    break;
                }
                PollEnd::LoopClosed => break,
            }
        }

        Ok(())
    }

    /// Open every HID interface matching the configured ids
    fn open_matching(&self, api: &mut HidApi) -> Vec<OpenInterface> {
        if let Err(e) = api.refresh_devices() {
            warn!(?e, "failed to refresh HID device list");
            return Vec::new();
        }

        let paths: Vec<_> = api
            .device_list()
            .filter(|info| info.vendor_id() == self.vendor_id && info.product_id() == self.product_id)
            .map(|info| info.path().to_owned())
            .collect();

        let mut interfaces = Vec::with_capacity(paths.len());
        for path in paths {
            api.set_open_exclusive(true);
            let (device, exclusive) = match api.open_path(&path) {
                Ok(device) => (device, true),
                Err(e) => {
                    warn!(?e, ?path, "exclusive open failed, retrying shared");
                    api.set_open_exclusive(false);
                    match api.open_path(&path) {
                        Ok(device) => (device, false),
                        Err(e) => {
                            warn!(?e, ?path, "failed to open pedal interface");
                            continue;
                        }
                    }
                }
            };

            let format = report_format(&device);
            debug!(?path, exclusive, ?format, "pedal interface opened");
            interfaces.push(OpenInterface {
                device,
                exclusive,
                format,
            });
        }

        interfaces
    }

    /// Read reports on every interface until the pedal goes away or the
    /// reader is stopped
    fn poll(&self, interfaces: Vec<OpenInterface>) -> PollEnd {
        let session_over = AtomicBool::new(false);

        let ends: Vec<PollEnd> = thread::scope(|scope| {
            let readers: Vec<_> = interfaces
                .into_iter()
                .map(|interface| {
                    let session_over = &session_over;
                    scope.spawn(move || {
                        let end = self.read_interface(&interface, session_over);
                        // One interface ending ends the whole session
                        session_over.store(true, Ordering::SeqCst);
                        end
                    })
                })
                .collect();

            readers
                .into_iter()
                .map(|reader| reader.join().unwrap_or(PollEnd::Removed))
                .collect()
        });

        if ends.contains(&PollEnd::LoopClosed) {
            PollEnd::LoopClosed
        } else if ends.contains(&PollEnd::Removed) {
            PollEnd::Removed
        } else {
            PollEnd::Stopped
        }
    }

    fn read_interface(&self, interface: &OpenInterface, session_over: &AtomicBool) -> PollEnd {
        let mut buf = [0u8; REPORT_BUFFER_LEN];

        while self.is_running() && !session_over.load(Ordering::SeqCst) {
            match interface.device.read_timeout(&mut buf, READ_TIMEOUT_MS) {
                Ok(0) => {}
                Ok(len) => {
                    let now = self.clock.now();
                    match decode(&buf[..len], interface.format, now) {
                        Some(decoded) => {
                            trace!(?decoded, "pedal report");
                            if !self.send(DeviceSignal::Report(decoded)) {
                                return PollEnd::LoopClosed;
                            }
                        }
                        None => trace!(len, "unroutable pedal report ignored"),
                    }
                }
                Err(e) => {
                    debug!(?e, "pedal read failed, treating as removal");
                    return PollEnd::Removed;
                }
            }
        }

        PollEnd::Stopped
    }
}

/// Read the interface's report descriptor to learn its report layout
fn report_format(device: &HidDevice) -> ReportFormat {
    let mut descriptor = vec![0u8; DESCRIPTOR_BUFFER_LEN];
    match device.get_report_descriptor(&mut descriptor) {
        Ok(len) => ReportFormat::from_descriptor(&descriptor[..len]),
        Err(e) => {
            warn!(?e, "report descriptor unavailable, guessing report layout");
            ReportFormat::Unknown
        }
    }
}
