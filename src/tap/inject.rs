//! Synthetic Option key events via CGEventPost

use core_graphics::event::{CGEvent, CGEventFlags, CGEventTapLocation, CGEventType, EventField};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};

use crate::engine::{InjectError, Injector, ModifierCommand};

use super::keys::{flags, LEFT_OPTION_KEY_CODE};

/// Posts Left Option flag changes at the HID level, so the rest of the
/// system sees them as a physical modifier press.
#[derive(Debug, Default)]
pub struct OptionKeyInjector;

impl Injector for OptionKeyInjector {
    fn inject(&mut self, command: ModifierCommand) -> Result<(), InjectError> {
        let source = CGEventSource::new(CGEventSourceStateID::Private)
            .map_err(|_| InjectError::EventSource)?;
        let event = CGEvent::new(source).map_err(|_| InjectError::EventCreation)?;

        event.set_type(CGEventType::FlagsChanged);
        event.set_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE, LEFT_OPTION_KEY_CODE);
        event.set_flags(match command {
            ModifierCommand::Down => flags::OPTION,
            ModifierCommand::Up => CGEventFlags::empty(),
        });

        event.post(CGEventTapLocation::HID);
        Ok(())
    }
}
