//! Event correlation engine
//!
//! Owns the pedal's state and correlates the two input streams: raw device
//! reports drive the modifier, global input events are passed through,
//! augmented with the modifier, or suppressed.

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::events::PedalEvent;
use crate::hid::DeviceReport;
use crate::tap::{GlobalInputEvent, Modifier, EventKind, PEDAL_KEYSTROKE_KEY_CODE};

use super::clock::Timestamp;
use super::connection::Connection;
use super::debounce::{self, DEFAULT_DEBOUNCE_INTERVAL};
use super::press::{self, ModifierCommand, PressState};
use super::suppression::{SuppressionWindow, DEFAULT_SUPPRESSION_WINDOW};

/// Tunables for the engine
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Minimum spacing between accepted press/release transitions
    pub debounce_interval: Duration,
    /// How long after any device report the pedal keystroke is dropped
    pub suppression_window: Duration,
    /// Virtual key code of the keystroke the pedal emits natively
    pub suppressed_key_code: i64,
    /// Modifier held while the pedal is down
    pub target_modifier: Modifier,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            debounce_interval: DEFAULT_DEBOUNCE_INTERVAL,
            suppression_window: DEFAULT_SUPPRESSION_WINDOW,
            suppressed_key_code: PEDAL_KEYSTROKE_KEY_CODE,
            target_modifier: Modifier::Option,
        }
    }
}

/// Verdict for one global input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver the event unchanged
    PassThrough,
    /// Deliver the event with the target modifier added to its flags
    PassThroughAugmented,
    /// Drop the event entirely
    Suppress,
    /// Deliver the event unchanged and re-enable the interception point
    PassThroughReenable,
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
    pub connected: bool,
    pub enabled: bool,
    pub pressed: bool,
}

/// The mutable state the engine owns
#[derive(Debug, Clone)]
struct EngineState {
    connection: Connection,
    enabled: bool,
    press: PressState,
    last_accepted_transition: Option<Timestamp>,
    window: SuppressionWindow,
}

/// The correlation engine
pub struct Engine {
    state: EngineState,
    settings: EngineSettings,
    /// Channel for emitting status notifications
    event_tx: broadcast::Sender<PedalEvent>,
}

impl Engine {
    /// Create a new engine: disconnected, released, enabled
    pub fn new(settings: EngineSettings, event_tx: broadcast::Sender<PedalEvent>) -> Self {
        Self {
            state: EngineState {
                connection: Connection::Disconnected,
                enabled: true,
                press: PressState::Released,
                last_accepted_transition: None,
                window: SuppressionWindow::new(settings.suppression_window),
            },
            settings,
            event_tx,
        }
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            connected: self.state.connection.is_connected(),
            enabled: self.state.enabled,
            pressed: self.state.press.is_pressed(),
        }
    }

    fn is_active(&self) -> bool {
        self.state.connection.is_connected() && self.state.enabled
    }

    /// The matched pedal was attached
    pub fn on_device_matched(&mut self) {
        if let Some(next) = self.state.connection.transition(true) {
            info!(connection = %next, "pedal connected");
            self.state.connection = next;
            self.emit(PedalEvent::ConnectionChanged { connected: true });
        }
    }

    /// The matched pedal was detached. Releases a held modifier.
    pub fn on_device_removed(&mut self) -> Option<ModifierCommand> {
        let next = self.state.connection.transition(false)?;
        info!(connection = %next, "pedal disconnected");
        self.state.connection = next;

        let release = self.force_release();
        self.emit(PedalEvent::ConnectionChanged { connected: false });
        release
    }

    /// Administrative enable/disable. Disabling releases a held modifier.
    pub fn set_enabled(&mut self, enabled: bool) -> Option<ModifierCommand> {
        if self.state.enabled == enabled {
            return None;
        }

        info!(enabled, "engine enabled state changed");
        self.state.enabled = enabled;

        let release = if enabled { None } else { self.force_release() };
        self.emit(PedalEvent::EnabledChanged { enabled });
        release
    }

    /// Handle one raw report from the pedal
    pub fn on_device_report(&mut self, report: &DeviceReport) -> Option<ModifierCommand> {
        if !self.is_active() {
            trace!(?report, "report ignored while inactive");
            return None;
        }

        let now = report.timestamp;
        self.state.window.mark_device_activity(now);

        if !press::is_recognized(report) {
            trace!(?report, "unrecognized usage ignored");
            return None;
        }

        let asserted = press::asserts_pressed(report);
        if asserted == self.state.press.is_pressed() {
            return None;
        }

        if !debounce::accept(now, self.state.last_accepted_transition, self.settings.debounce_interval) {
            debug!(asserted, "transition debounced");
            return None;
        }

        let (next, command) = self.state.press.transition(asserted)?;
        self.state.last_accepted_transition = Some(
            self.state
                .last_accepted_transition
                .map_or(now, |last| last.max(now)),
        );

        info!(from = %self.state.press, to = %next, "pedal transition");
        self.state.press = next;
        self.emit(PedalEvent::PressChanged {
            pressed: next.is_pressed(),
        });

        Some(command)
    }

    /// Decide what happens to one global input event.
    ///
    /// May add the target modifier to `event.modifiers`.
    pub fn on_global_event(&mut self, event: &mut GlobalInputEvent) -> Disposition {
        if event.kind == EventKind::TapDisabled {
            return Disposition::PassThroughReenable;
        }

        if !self.is_active() {
            return Disposition::PassThrough;
        }

        let pressed = self.state.press.is_pressed();

        if event.is_keystroke_of(self.settings.suppressed_key_code)
            && (pressed || self.state.window.is_open(event.timestamp))
        {
            debug!(kind = ?event.kind, pressed, "pedal keystroke suppressed");
            return Disposition::Suppress;
        }

        if pressed {
            event.modifiers.insert(self.settings.target_modifier);
            return Disposition::PassThroughAugmented;
        }

        Disposition::PassThrough
    }

    /// Tear the engine down, releasing a held modifier
    pub fn shutdown(mut self) -> Option<ModifierCommand> {
        let release = self.force_release();
        info!(released = release.is_some(), "engine stopped");
        release
    }

    /// Drop to Released, returning the release command if a press was active
    fn force_release(&mut self) -> Option<ModifierCommand> {
        if !self.state.press.is_pressed() {
            return None;
        }

        self.state.press = PressState::Released;
        self.emit(PedalEvent::PressChanged { pressed: false });
        Some(ModifierCommand::Up)
    }

    fn emit(&self, event: PedalEvent) {
        debug!(%event, "emitting pedal event");
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }
}
