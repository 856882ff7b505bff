//! Interpretation of decoded frames.
//!
//! Each message type has exactly one wire layout, looked up in a fixed table. Anything the
//! table does not know, or a payload which fails to decode, becomes [`Event::Ignored`]
//! instead of an error, so a corrupted notification can never take the link down.

mod event_message;
mod settings_message;
mod weight_message;

use crate::frame::Frame;
use crate::scale_state::{BatteryLevel, ButtonPressed, WeightSample};

/// Compact weight report: `[flags, unit, magnitude_hi, magnitude_lo]`
pub const MSG_WEIGHT: u8 = 0x05;
/// Scale settings, carrying the battery level
pub const MSG_SETTINGS: u8 = 0x08;
/// Wrapper around weight, button, timer and heartbeat events
pub const MSG_EVENT: u8 = 0x0c;

/// What a single frame means to the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Weight(WeightSample),
    Battery(BatteryLevel),
    /// A button press, with the weight shown when it was pressed if the scale sent one
    Button(ButtonPressed, Option<WeightSample>),
    Ignored(Ignored),
}

/// Why a frame produced no usable value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ignored {
    /// No decoder is registered for this message type
    UnknownType(u8),
    /// An event wrapper with an event kind this crate does not use
    Unhandled(u8),
    /// The payload was shorter than its layout requires
    Truncated(u8),
    /// A field held a code outside its defined range
    Invalid(u8),
    /// The value decoded cleanly but lies outside what the scale can report
    Implausible,
}

impl Ignored {
    pub fn is_implausible(self) -> bool {
        matches!(self, Ignored::Implausible)
    }
}

type Decoder = fn(&[u8]) -> Event;

const DECODERS: [(u8, Decoder); 3] = [
    (MSG_WEIGHT, weight_message::decode_compact),
    (MSG_SETTINGS, settings_message::decode),
    (MSG_EVENT, event_message::decode),
];

/// Interpret a frame. Pure: the same frame always yields the same event.
pub fn interpret(frame: &Frame) -> Event {
    let message_type = frame.message_type();
    DECODERS
        .iter()
        .find(|(t, _)| *t == message_type)
        .map(|(_, decode)| decode(frame.payload()))
        .unwrap_or(Event::Ignored(Ignored::UnknownType(message_type)))
}

#[cfg(test)]
pub(crate) fn frame_from_hex(h: &str) -> Frame {
    let bytes = hex::decode(h).unwrap();
    let (mut frames, _) = crate::frame::extract_frames(&bytes);
    assert_eq!(frames.len(), 1, "expected exactly one frame in {h}");
    frames.remove(0)
}

#[test]
fn test_interpret_weight_scenario() {
    use crate::scale_state::{Grams, Sign, UnitScale};

    let frame = frame_from_hex("efdd050400001388");
    let event = interpret(&frame);
    let Event::Weight(sample) = event else {
        panic!("expected a weight event, got {event:?}");
    };
    assert_eq!(sample.grams, Grams::from_whole(500));
    assert_eq!(sample.unit_scale, UnitScale::Deci);
    assert_eq!(sample.sign, Sign::Positive);
}

#[test]
fn test_interpret_is_deterministic() {
    let frame = frame_from_hex("efdd0c0705a00f00000100");
    assert_eq!(interpret(&frame), interpret(&frame.clone()));
}

#[test]
fn test_interpret_unknown_type() {
    let frame = frame_from_hex("efdd0702aabb");
    assert_eq!(interpret(&frame), Event::Ignored(Ignored::UnknownType(0x07)));
}
