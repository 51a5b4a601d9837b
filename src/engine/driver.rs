//! Serialized pedal loop glue
//!
//! Everything that mutates the engine funnels through a `Driver` on one
//! thread: device signals and admin commands arrive as `LoopInput`s over a
//! channel, tap callbacks call `on_global_event` directly. Modifier commands
//! the engine emits are handed to the injector immediately.

use std::sync::mpsc::{Receiver, SendError, Sender, TryRecvError};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::hid::DeviceReport;
use crate::tap::GlobalInputEvent;

use super::machine::{Disposition, Engine, EngineStatus};
use super::press::ModifierCommand;

/// Signals from the device reader thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSignal {
    /// The configured pedal was opened
    Matched {
        /// Whether the device was seized exclusively
        exclusive: bool,
    },
    /// The pedal went away
    Removed,
    /// A decoded input report
    Report(DeviceReport),
}

/// Messages drained by the pedal loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopInput {
    Device(DeviceSignal),
    /// Administrative enable/disable
    SetEnabled(bool),
    /// Release everything and stop the loop
    Shutdown,
}

type WakeFn = Box<dyn Fn() + Send + Sync>;

/// Sending half of the pedal loop channel.
///
/// Every send also wakes the loop once it has registered a waker, so the loop
/// can sleep until there is work.
#[derive(Clone)]
pub struct LoopSender {
    tx: Sender<LoopInput>,
    waker: Arc<OnceLock<WakeFn>>,
}

impl LoopSender {
    pub fn new(tx: Sender<LoopInput>) -> Self {
        Self {
            tx,
            waker: Arc::new(OnceLock::new()),
        }
    }

    pub fn send(&self, input: LoopInput) -> Result<(), SendError<LoopInput>> {
        self.tx.send(input)?;
        if let Some(wake) = self.waker.get() {
            wake();
        }
        Ok(())
    }

    /// Register the loop's wake hook. Only the first registration sticks.
    pub fn set_waker(&self, wake: impl Fn() + Send + Sync + 'static) {
        if self.waker.set(Box::new(wake)).is_err() {
            warn!("pedal loop waker already registered");
        }
    }
}

/// Whether the loop should keep running after handling an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Errors from the synthetic event facility
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("failed to create event source")]
    EventSource,

    #[error("failed to create synthetic event")]
    EventCreation,
}

/// Synthetic modifier injection facility
pub trait Injector {
    fn inject(&mut self, command: ModifierCommand) -> Result<(), InjectError>;
}

/// Owns the engine and the injector for the lifetime of the pedal loop
pub struct Driver<I: Injector> {
    engine: Engine,
    injector: I,
}

impl<I: Injector> Driver<I> {
    pub fn new(engine: Engine, injector: I) -> Self {
        Self { engine, injector }
    }

    pub fn status(&self) -> EngineStatus {
        self.engine.status()
    }

    /// Handle one message from the loop channel
    pub fn handle(&mut self, input: LoopInput) -> Flow {
        let command = match input {
            LoopInput::Device(DeviceSignal::Matched { exclusive }) => {
                if !exclusive {
                    warn!("pedal opened without exclusive access, relying on keystroke suppression");
                }
                self.engine.on_device_matched();
                None
            }
            LoopInput::Device(DeviceSignal::Removed) => self.engine.on_device_removed(),
            LoopInput::Device(DeviceSignal::Report(report)) => self.engine.on_device_report(&report),
            LoopInput::SetEnabled(enabled) => self.engine.set_enabled(enabled),
            LoopInput::Shutdown => return Flow::Stop,
        };

        if let Some(command) = command {
            self.apply(command);
        }
        Flow::Continue
    }

    /// Apply every input already queued on the channel.
    ///
    /// Stops at a `Shutdown`, leaving later inputs queued, or when every
    /// sender is gone.
    pub fn drain_pending(&mut self, rx: &Receiver<LoopInput>) -> Flow {
        loop {
            match rx.try_recv() {
                Ok(input) => {
                    if self.handle(input) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
                Err(TryRecvError::Empty) => return Flow::Continue,
                Err(TryRecvError::Disconnected) => return Flow::Stop,
            }
        }
    }

    /// Decide the fate of an intercepted event
    pub fn on_global_event(&mut self, event: &mut GlobalInputEvent) -> Disposition {
        self.engine.on_global_event(event)
    }

    /// Stop the engine, releasing a held modifier
    pub fn shutdown(self) {
        let Self { engine, mut injector } = self;
        if let Some(command) = engine.shutdown() {
            if let Err(e) = injector.inject(command) {
                warn!(?e, "failed to release modifier on shutdown");
            }
        }
        info!("pedal driver stopped");
    }

    fn apply(&mut self, command: ModifierCommand) {
        debug!(?command, "injecting modifier");
        if let Err(e) = self.injector.inject(command) {
            warn!(?e, ?command, "modifier injection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    use tokio::sync::broadcast;

    use super::*;
    use crate::engine::{EngineSettings, Timestamp};
    use crate::hid::UsageCategory;
    use crate::tap::{EventKind, Modifiers, PEDAL_KEYSTROKE_KEY_CODE};

    /// Records every command instead of posting it
    #[derive(Clone, Default)]
    struct RecordingInjector {
        commands: Rc<RefCell<Vec<ModifierCommand>>>,
        fail: bool,
    }

    impl Injector for RecordingInjector {
        fn inject(&mut self, command: ModifierCommand) -> Result<(), InjectError> {
            if self.fail {
                return Err(InjectError::EventSource);
            }
            self.commands.borrow_mut().push(command);
            Ok(())
        }
    }

    fn create_driver() -> (Driver<RecordingInjector>, Rc<RefCell<Vec<ModifierCommand>>>) {
        let (tx, _) = broadcast::channel(16);
        let injector = RecordingInjector::default();
        let commands = Rc::clone(&injector.commands);
        (Driver::new(Engine::new(EngineSettings::default(), tx), injector), commands)
    }

    fn button(value: i64, at_ms: u64) -> LoopInput {
        LoopInput::Device(DeviceSignal::Report(DeviceReport {
            usage_category: UsageCategory::Button,
            usage_code: 1,
            raw_value: value,
            timestamp: Timestamp::from_millis(at_ms),
        }))
    }

    #[test]
    fn test_commands_reach_injector() {
        let (mut driver, commands) = create_driver();
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: true }));
        driver.handle(button(1, 0));
        driver.handle(button(1, 10));
        driver.handle(button(0, 300));

        assert_eq!(*commands.borrow(), vec![ModifierCommand::Down, ModifierCommand::Up]);
    }

    #[test]
    fn test_shared_access_still_connects() {
        let (mut driver, _) = create_driver();
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: false }));
        assert!(driver.status().connected);
    }

    #[test]
    fn test_removal_and_disable_release() {
        let (mut driver, commands) = create_driver();
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: true }));
        driver.handle(button(1, 0));
        driver.handle(LoopInput::SetEnabled(false));
        driver.handle(LoopInput::SetEnabled(true));
        driver.handle(button(1, 500));
        driver.handle(LoopInput::Device(DeviceSignal::Removed));

        assert_eq!(
            *commands.borrow(),
            vec![
                ModifierCommand::Down,
                ModifierCommand::Up,
                ModifierCommand::Down,
                ModifierCommand::Up,
            ]
        );
    }

    #[test]
    fn test_shutdown_flow_and_release() {
        let (mut driver, commands) = create_driver();
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: true }));
        driver.handle(button(1, 0));

        assert_eq!(driver.handle(LoopInput::Shutdown), Flow::Stop);
        driver.shutdown();
        assert_eq!(*commands.borrow(), vec![ModifierCommand::Down, ModifierCommand::Up]);
    }

    #[test]
    fn test_injection_failure_keeps_state() {
        let (tx, _) = broadcast::channel(16);
        let injector = RecordingInjector {
            fail: true,
            ..Default::default()
        };
        let mut driver = Driver::new(Engine::new(EngineSettings::default(), tx), injector);
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: true }));

        assert_eq!(driver.handle(button(1, 0)), Flow::Continue);
        assert!(driver.status().pressed);
    }

    #[test]
    fn test_global_events_pass_to_engine() {
        let (mut driver, _) = create_driver();
        driver.handle(LoopInput::Device(DeviceSignal::Matched { exclusive: true }));
        driver.handle(button(1, 0));

        let mut event = GlobalInputEvent {
            kind: EventKind::KeyDown,
            key_code: Some(PEDAL_KEYSTROKE_KEY_CODE),
            modifiers: Modifiers::default(),
            timestamp: Timestamp::from_millis(5),
        };
        assert_eq!(driver.on_global_event(&mut event), Disposition::Suppress);
    }

    #[test]
    fn test_queued_press_applies_before_keystroke_verdict() {
        let (mut driver, commands) = create_driver();
        let (tx, rx) = mpsc::channel();
        let loop_tx = LoopSender::new(tx);
        loop_tx.send(LoopInput::Device(DeviceSignal::Matched { exclusive: false })).unwrap();
        loop_tx.send(button(1, 0)).unwrap();

        // The keystroke arrives before the loop got around to the report
        assert_eq!(driver.drain_pending(&rx), Flow::Continue);
        let mut event = GlobalInputEvent {
            kind: EventKind::KeyDown,
            key_code: Some(PEDAL_KEYSTROKE_KEY_CODE),
            modifiers: Modifiers::default(),
            timestamp: Timestamp::from_millis(1),
        };
        assert_eq!(driver.on_global_event(&mut event), Disposition::Suppress);
        assert_eq!(*commands.borrow(), vec![ModifierCommand::Down]);
    }

    #[test]
    fn test_drain_stops_at_shutdown() {
        let (mut driver, _) = create_driver();
        let (tx, rx) = mpsc::channel();
        let loop_tx = LoopSender::new(tx);
        loop_tx.send(LoopInput::Device(DeviceSignal::Matched { exclusive: true })).unwrap();
        loop_tx.send(LoopInput::Shutdown).unwrap();
        loop_tx.send(LoopInput::SetEnabled(false)).unwrap();

        assert_eq!(driver.drain_pending(&rx), Flow::Stop);
        assert!(driver.status().connected);
        assert_eq!(rx.try_recv().unwrap(), LoopInput::SetEnabled(false));
    }

    #[test]
    fn test_drain_stops_when_senders_are_gone() {
        let (mut driver, _) = create_driver();
        let (tx, rx) = mpsc::channel();
        drop(tx);
        assert_eq!(driver.drain_pending(&rx), Flow::Stop);
    }

    #[test]
    fn test_send_wakes_registered_loop() {
        let (tx, rx) = mpsc::channel();
        let loop_tx = LoopSender::new(tx);
        let wakes = Arc::new(AtomicUsize::new(0));

        // Sends before registration are only queued
        loop_tx.send(LoopInput::SetEnabled(true)).unwrap();
        let counter = Arc::clone(&wakes);
        loop_tx.clone().set_waker(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        loop_tx.send(LoopInput::SetEnabled(false)).unwrap();
        loop_tx.send(LoopInput::Shutdown).unwrap();

        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert_eq!(rx.try_iter().count(), 3);

        drop(rx);
        assert!(loop_tx.send(LoopInput::Shutdown).is_err());
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }
}
