//! Touch event classification - no I/O, no hardware, fully testable.
//!
//! Translates raw `evdev` events from the touchpad into the small set of
//! event classes the dispatcher cares about, decoupled from `evdev` kinds
//! for testability.

/// Intermediate representation of a relevant touchpad event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TouchEvent {
    /// `ABS_MT_SLOT`: selects the contact slot addressed by subsequent
    /// events.
    SlotSelect(i32),
    /// `ABS_MT_POSITION_X`: absolute x for the current slot.
    PositionX(i32),
    /// `ABS_MT_POSITION_Y`: absolute y for the current slot.
    PositionY(i32),
    /// `ABS_MT_TRACKING_ID`: > 0 starts a contact, <= 0 ends it.
    TrackingId(i32),
    /// `BTN_TOOL_FINGER` .. `BTN_TOOL_QUINTTAP`: the finger-down/lift
    /// signal; value 1 = contact down, 0 = lift.
    Touch(i32),
    /// `BTN_LEFT` / `BTN_RIGHT` / `BTN_MIDDLE`: a physical touchpad button.
    Button,
    /// `MSC_TIMESTAMP`: the periodic marker used for hold detection.
    Timestamp,
}

/// Classify a single `evdev::InputEvent` into one of the touch-relevant
/// categories the dispatcher cares about. Returns `None` for irrelevant
/// events.
pub fn classify_event(event: &evdev::InputEvent) -> Option<TouchEvent> {
    use evdev::{AbsoluteAxisType, InputEventKind, Key, MiscType};

    match event.kind() {
        InputEventKind::AbsAxis(axis) => match axis {
            AbsoluteAxisType::ABS_MT_SLOT => Some(TouchEvent::SlotSelect(event.value())),
            AbsoluteAxisType::ABS_MT_POSITION_X => Some(TouchEvent::PositionX(event.value())),
            AbsoluteAxisType::ABS_MT_POSITION_Y => Some(TouchEvent::PositionY(event.value())),
            AbsoluteAxisType::ABS_MT_TRACKING_ID => Some(TouchEvent::TrackingId(event.value())),
            _ => None,
        },
        InputEventKind::Key(key) => match key {
            Key::BTN_TOOL_FINGER
            | Key::BTN_TOOL_DOUBLETAP
            | Key::BTN_TOOL_TRIPLETAP
            | Key::BTN_TOOL_QUADTAP
            | Key::BTN_TOOL_QUINTTAP => Some(TouchEvent::Touch(event.value())),
            Key::BTN_LEFT | Key::BTN_RIGHT | Key::BTN_MIDDLE => Some(TouchEvent::Button),
            _ => None,
        },
        InputEventKind::Misc(MiscType::MSC_TIMESTAMP) => Some(TouchEvent::Timestamp),
        _ => None,
    }
}
