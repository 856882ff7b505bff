use super::weight_message::decode_event_weight;
use super::{Event, Ignored, MSG_EVENT};
use crate::scale_state::ButtonPressed;

const EVENT_WEIGHT: u8 = 5;
const EVENT_BUTTON: u8 = 8;
const EVENT_HEARTBEAT: u8 = 11;

/// The heartbeat echo carries a weight when its third byte holds this value
const HEARTBEAT_WITH_WEIGHT: u8 = 5;

/// Decode an event wrapper. The first payload byte is the event kind, the rest is event data.
pub(super) fn decode(payload: &[u8]) -> Event {
    let Some((&kind, data)) = payload.split_first() else {
        return Event::Ignored(Ignored::Truncated(MSG_EVENT));
    };
    match kind {
        EVENT_WEIGHT => decode_event_weight(data),
        EVENT_BUTTON => decode_button(data),
        EVENT_HEARTBEAT => decode_heartbeat(data),
        // Timer events and anything newer firmware may send
        _ => Event::Ignored(Ignored::Unhandled(kind)),
    }
}

fn decode_button(data: &[u8]) -> Event {
    let [code, subcode, ..] = *data else {
        return Event::Ignored(Ignored::Truncated(MSG_EVENT));
    };
    // Start and tare carry the weight straight after the code pair, stop and reset put
    // the timer reading first
    let (button, weight_at) = match (code, subcode) {
        (0, 5) => (ButtonPressed::Tare, Some(2)),
        (8, 5) => (ButtonPressed::Start, Some(2)),
        (10, 7) => (ButtonPressed::Stop, Some(6)),
        (9, 7) => (ButtonPressed::Reset, Some(6)),
        _ => (ButtonPressed::Other(code, subcode), None),
    };
    let weight = weight_at
        .and_then(|offset| data.get(offset..))
        .and_then(|weight| match decode_event_weight(weight) {
            Event::Weight(sample) => Some(sample),
            _ => None,
        });
    Event::Button(button, weight)
}

fn decode_heartbeat(data: &[u8]) -> Event {
    match data {
        [_, _, HEARTBEAT_WITH_WEIGHT, weight @ ..] => decode_event_weight(weight),
        [_, _, _, ..] => Event::Ignored(Ignored::Unhandled(EVENT_HEARTBEAT)),
        _ => Event::Ignored(Ignored::Truncated(MSG_EVENT)),
    }
}

#[test]
fn test_decode_buttons() {
    assert_eq!(decode(&[EVENT_BUTTON, 0, 5]), Event::Button(ButtonPressed::Tare, None));
    assert_eq!(decode(&[EVENT_BUTTON, 8, 5, 0, 0]), Event::Button(ButtonPressed::Start, None));
    assert_eq!(decode(&[EVENT_BUTTON, 10, 7]), Event::Button(ButtonPressed::Stop, None));
    assert_eq!(decode(&[EVENT_BUTTON, 9, 7]), Event::Button(ButtonPressed::Reset, None));
    assert_eq!(decode(&[EVENT_BUTTON, 3, 1]), Event::Button(ButtonPressed::Other(3, 1), None));
    assert_eq!(decode(&[EVENT_BUTTON, 3]), Event::Ignored(Ignored::Truncated(MSG_EVENT)));
}

#[test]
fn test_decode_button_with_weight() {
    use crate::scale_state::Grams;

    // Tare at 0.5 g
    let event = decode(&hex::decode("080005320000000200").unwrap());
    let Event::Button(ButtonPressed::Tare, Some(sample)) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_ten_thousandths(5_000));

    // Stop, with the timer reading ahead of 400 g
    let event = decode(&hex::decode("080a0701021700a00f00000100").unwrap());
    let Event::Button(ButtonPressed::Stop, Some(sample)) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_whole(400));

    // A bad unit code drops the weight but keeps the press
    assert_eq!(
        decode(&hex::decode("080005320000000900").unwrap()),
        Event::Button(ButtonPressed::Tare, None)
    );
}

#[test]
fn test_decode_heartbeat_with_weight() {
    use crate::scale_state::Grams;

    let payload = hex::decode("0b000005320000000200").unwrap();
    let event = decode(&payload);
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_ten_thousandths(5_000));
}

#[test]
fn test_decode_heartbeat_without_weight() {
    assert_eq!(
        decode(&[EVENT_HEARTBEAT, 0, 0, 7, 1, 2, 3]),
        Event::Ignored(Ignored::Unhandled(EVENT_HEARTBEAT))
    );
    assert_eq!(decode(&[EVENT_HEARTBEAT, 0]), Event::Ignored(Ignored::Truncated(MSG_EVENT)));
}

#[test]
fn test_decode_unhandled_and_empty() {
    assert_eq!(decode(&[7, 1, 2, 3]), Event::Ignored(Ignored::Unhandled(7)));
    assert_eq!(decode(&[]), Event::Ignored(Ignored::Truncated(MSG_EVENT)));
}
