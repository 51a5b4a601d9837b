//! Pedal loop hosting the CGEventTap
//!
//! The engine lives on a dedicated thread running its own CFRunLoop. The
//! event tap callback consults it synchronously, after first applying any
//! device signals already queued on the channel. Senders wake the run loop,
//! so every engine mutation happens on this one thread and the loop sleeps
//! while the pedal is idle.

use std::cell::{Cell, RefCell};
use std::sync::mpsc::Receiver;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CallbackResult, EventField,
};
use tracing::{error, info, trace, warn};

use crate::engine::{
    Clock, Disposition, Driver, Engine, Flow, LoopInput, LoopSender, MonotonicClock, Timestamp,
};

use super::inject::OptionKeyInjector;
use super::keys::{flags, EventKind, GlobalInputEvent, Modifiers};

/// Longest sleep between channel checks when a wake-up is missed
const RUN_SLICE: Duration = Duration::from_millis(250);

/// Errors that can occur in the pedal loop
#[derive(Debug, thiserror::Error)]
pub enum TapError {
    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to create run loop source for event tap")]
    RunLoopSource,

    #[error("failed to spawn pedal loop thread: {0}")]
    ThreadSpawn(String),
}

type PedalDriver = Driver<OptionKeyInjector>;

/// Run loop of the pedal thread, stopped from sender threads
struct RemoteRunLoop(CFRunLoop);

// CFRunLoopStop may be called from any thread
unsafe impl Send for RemoteRunLoop {}
unsafe impl Sync for RemoteRunLoop {}

/// Handle to the running pedal loop thread
pub struct PedalLoop {
    loop_tx: LoopSender,
    handle: Option<JoinHandle<()>>,
}

impl PedalLoop {
    /// Start the pedal loop
    ///
    /// `loop_rx` must be the receiving end of `loop_tx`. A failure to install
    /// the tap is logged and the loop keeps injecting without suppression.
    pub fn spawn(
        engine: Engine,
        clock: MonotonicClock,
        loop_tx: LoopSender,
        loop_rx: Receiver<LoopInput>,
    ) -> Result<Self, TapError> {
        let waker = loop_tx.clone();
        let handle = thread::Builder::new()
            .name("pedal-loop".to_string())
            .spawn(move || {
                info!("pedal loop thread started");
                let run_loop = RemoteRunLoop(CFRunLoop::get_current());
                waker.set_waker(move || run_loop.0.stop());
                run_pedal_loop(engine, clock, loop_rx);
                info!("pedal loop thread stopped");
            })
            .map_err(|e| TapError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            loop_tx,
            handle: Some(handle),
        })
    }

    /// Release the modifier if held and wait for the loop to exit
    pub fn shutdown(mut self) {
        let _ = self.loop_tx.send(LoopInput::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("pedal loop thread panicked");
            }
        }
    }
}

/// Flags shared between the tap callback and the loop around it
#[derive(Default)]
struct LoopFlags {
    reenable: Cell<bool>,
    stopping: Cell<bool>,
}

fn run_pedal_loop(engine: Engine, clock: MonotonicClock, loop_rx: Receiver<LoopInput>) {
    let driver = RefCell::new(Driver::new(engine, OptionKeyInjector));
    let flags = LoopFlags::default();

    match install_tap(&driver, &flags, &loop_rx, clock) {
        Ok(tap) => {
            info!("event tap created and enabled");
            run_with_tap(&tap, &driver, &flags, &loop_rx);
        }
        Err(e) => {
            error!(?e, "event tap unavailable");
            warn!("continuing without keystroke suppression - check Accessibility permissions");
            run_without_tap(&driver, &loop_rx);
        }
    }

    driver.into_inner().shutdown();
}

/// Create the tap and add it to this thread's run loop
fn install_tap<'a>(
    driver: &'a RefCell<PedalDriver>,
    loop_flags: &'a LoopFlags,
    loop_rx: &'a Receiver<LoopInput>,
    clock: MonotonicClock,
) -> Result<CGEventTap<'a>, TapError> {
    // Must be fast and non-blocking: the host disables slow taps
    let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> CallbackResult {
        let Some(mut input) = to_input_event(event_type, event, clock.now()) else {
            return CallbackResult::Keep;
        };

        let Ok(mut driver) = driver.try_borrow_mut() else {
            return CallbackResult::Keep;
        };

        // A report may be queued but not yet applied
        if !loop_flags.stopping.get() && driver.drain_pending(loop_rx) == Flow::Stop {
            loop_flags.stopping.set(true);
            CFRunLoop::get_current().stop();
        }

        match driver.on_global_event(&mut input) {
            Disposition::PassThrough => CallbackResult::Keep,
            Disposition::PassThroughAugmented => {
                event.set_flags(event.get_flags() | flags::OPTION);
                CallbackResult::Keep
            }
            Disposition::Suppress => {
                trace!("dropping pedal keystroke");
                CallbackResult::Drop
            }
            Disposition::PassThroughReenable => {
                warn!("event tap disabled by the system, will re-enable");
                loop_flags.reenable.set(true);
                CallbackResult::Keep
            }
        }
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::Default,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
            CGEventType::LeftMouseDown,
            CGEventType::LeftMouseUp,
            CGEventType::RightMouseDown,
            CGEventType::RightMouseUp,
            CGEventType::LeftMouseDragged,
            CGEventType::RightMouseDragged,
        ],
        callback,
    )
    .map_err(|_| TapError::EventTapCreation)?;

    let run_loop_source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| TapError::RunLoopSource)?;

    unsafe {
        CFRunLoop::get_current().add_source(&run_loop_source, kCFRunLoopCommonModes);
    }
    tap.enable();

    Ok(tap)
}

fn run_with_tap(
    tap: &CGEventTap<'_>,
    driver: &RefCell<PedalDriver>,
    loop_flags: &LoopFlags,
    loop_rx: &Receiver<LoopInput>,
) {
    loop {
        if loop_flags.stopping.get() || driver.borrow_mut().drain_pending(loop_rx) == Flow::Stop {
            return;
        }

        if loop_flags.reenable.take() {
            tap.enable();
            info!("event tap re-enabled");
        }

        // Returns after one tap event, a sender's wake-up, or the slice
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, RUN_SLICE, true);
        }
    }
}

fn run_without_tap(driver: &RefCell<PedalDriver>, loop_rx: &Receiver<LoopInput>) {
    while let Ok(input) = loop_rx.recv() {
        if driver.borrow_mut().handle(input) == Flow::Stop {
            return;
        }
    }
}

/// Map a tapped CGEvent onto the engine's event model
fn to_input_event(
    event_type: CGEventType,
    event: &CGEvent,
    timestamp: Timestamp,
) -> Option<GlobalInputEvent> {
    let kind = match event_type {
        CGEventType::KeyDown => EventKind::KeyDown,
        CGEventType::KeyUp => EventKind::KeyUp,
        CGEventType::FlagsChanged => EventKind::FlagsChanged,
        CGEventType::LeftMouseDown
        | CGEventType::LeftMouseUp
        | CGEventType::RightMouseDown
        | CGEventType::RightMouseUp => EventKind::MouseButton,
        CGEventType::LeftMouseDragged | CGEventType::RightMouseDragged => EventKind::MouseDrag,
        CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
            // The event carries no usable fields
            return Some(GlobalInputEvent {
                kind: EventKind::TapDisabled,
                key_code: None,
                modifiers: Modifiers::default(),
                timestamp,
            });
        }
        _ => return None,
    };

    let key_code = matches!(
        kind,
        EventKind::KeyDown | EventKind::KeyUp | EventKind::FlagsChanged
    )
    .then(|| event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE));

    Some(GlobalInputEvent {
        kind,
        key_code,
        modifiers: Modifiers::from_flags(event.get_flags()),
        timestamp,
    })
}
