use super::{Event, Ignored, MSG_EVENT, MSG_WEIGHT};
use crate::scale_state::{Grams, Sign, UnitScale, WeightSample};

/// Readings at or above this are the product of a misaligned parse, not of candy
const MAX_PLAUSIBLE: Grams = Grams::from_whole(10_000);

const NEGATIVE_FLAG: u8 = 0x02;

/// Decode the compact weight message.
///
/// Byte | Meaning
/// 0    | Flags, bit 1 set for a negative reading
/// 1    | Unit scale code in the low two bits: 0 deci, 1 centi, 2 milli, 3 deci-milli
/// 2    | Magnitude, high byte
/// 3    | Magnitude, low byte
pub(super) fn decode_compact(payload: &[u8]) -> Event {
    let [flags, unit, hi, lo, ..] = *payload else {
        return Event::Ignored(Ignored::Truncated(MSG_WEIGHT));
    };
    let unit_scale = match unit & 0x03 {
        0 => UnitScale::Deci,
        1 => UnitScale::Centi,
        2 => UnitScale::Milli,
        _ => UnitScale::DeciMilli,
    };
    let magnitude = u16::from_be_bytes([hi, lo]);
    checked(WeightSample::from_raw(magnitude, unit_scale, sign(flags)))
}

/// Decode the weight carried inside an event wrapper.
///
/// Byte | Meaning
/// 0    | Magnitude, low byte
/// 1    | Magnitude, high byte
/// 2..3 | Unused
/// 4    | Unit scale code: 1 deci, 2 centi, 3 milli, 4 deci-milli
/// 5    | Flags, bit 1 set for a negative reading
pub(super) fn decode_event_weight(data: &[u8]) -> Event {
    let [lo, hi, _, _, unit, flags, ..] = *data else {
        return Event::Ignored(Ignored::Truncated(MSG_EVENT));
    };
    let unit_scale = match unit {
        1 => UnitScale::Deci,
        2 => UnitScale::Centi,
        3 => UnitScale::Milli,
        4 => UnitScale::DeciMilli,
        _ => return Event::Ignored(Ignored::Invalid(MSG_EVENT)),
    };
    let magnitude = u16::from_le_bytes([lo, hi]);
    checked(WeightSample::from_raw(magnitude, unit_scale, sign(flags)))
}

fn sign(flags: u8) -> Sign {
    if flags & NEGATIVE_FLAG == NEGATIVE_FLAG {
        Sign::Negative
    } else {
        Sign::Positive
    }
}

/// Only readings within [0, 10000) g are passed on
fn checked(sample: WeightSample) -> Event {
    if sample.grams < Grams::default() || sample.grams >= MAX_PLAUSIBLE {
        return Event::Ignored(Ignored::Implausible);
    }
    Event::Weight(sample)
}

#[test]
fn test_decode_compact_units() {
    let event = decode_compact(&[0x00, 0x02, 0x13, 0x88]);
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.unit_scale, UnitScale::Milli);
    assert_eq!(sample.grams, Grams::from_whole(5));

    let event = decode_compact(&[0x00, 0x03, 0x00, 0x01]);
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_ten_thousandths(1));
}

#[test]
fn test_decode_compact_truncated() {
    assert_eq!(
        decode_compact(&[0x00, 0x00, 0x13]),
        Event::Ignored(Ignored::Truncated(MSG_WEIGHT))
    );
}

#[test]
fn test_negative_reading_is_implausible() {
    assert_eq!(
        decode_compact(&[0x02, 0x01, 0x00, 0x64]),
        Event::Ignored(Ignored::Implausible)
    );
}

#[test]
fn test_negative_zero_is_kept() {
    let event = decode_compact(&[0x02, 0x01, 0x00, 0x00]);
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.sign, Sign::Negative);
    assert_eq!(sample.grams, Grams::default());
}

#[test]
fn test_largest_magnitude_is_plausible() {
    let event = decode_compact(&[0x00, 0x00, 0xff, 0xff]);
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_ten_thousandths(65_535_000));
}

#[test]
fn test_decode_event_weight() {
    let event = decode_event_weight(&hex::decode("a00f00000100").unwrap());
    let Event::Weight(sample) = event else { panic!("{event:?}") };
    assert_eq!(sample.grams, Grams::from_whole(400));
    assert_eq!(sample.unit_scale, UnitScale::Deci);

    let event = decode_event_weight(&hex::decode("a00f00000900").unwrap());
    assert_eq!(event, Event::Ignored(Ignored::Invalid(MSG_EVENT)));
}
