use super::{Event, Ignored, MSG_SETTINGS};
use crate::scale_state::BatteryLevel;

/// A message type which contains the scale's settings.
///
/// Byte | Meaning
/// 0    | Unknown
/// 1    | Battery level in %, the top bit is a flag and not part of the value
/// 2    | Display units, 2 grams and 5 ounces
/// 4    | Auto off delay in steps of 5 minutes
/// 6    | 1 if the beeper is on
pub(super) struct SettingsMessage<'a>(&'a [u8]);

impl<'a> SettingsMessage<'a> {
    const BATTERY_MASK: u8 = 0x7f;

    pub fn new(payload: &'a [u8]) -> Option<Self> {
        (payload.len() >= 2).then_some(Self(payload))
    }

    pub fn battery_pct(&self) -> u8 {
        self.0[1] & Self::BATTERY_MASK
    }
}

pub(super) fn decode(payload: &[u8]) -> Event {
    let Some(settings) = SettingsMessage::new(payload) else {
        return Event::Ignored(Ignored::Truncated(MSG_SETTINGS));
    };
    match BatteryLevel::new(settings.battery_pct()) {
        Some(level) => Event::Battery(level),
        None => Event::Ignored(Ignored::Implausible),
    }
}

#[test]
fn test_decode_battery() {
    let payload = hex::decode("03d40200010001000000").unwrap();
    assert_eq!(decode(&payload), Event::Battery(BatteryLevel::new(84).unwrap()));
}

#[test]
fn test_battery_out_of_range_is_ignored() {
    assert_eq!(decode(&[0x00, 0x65]), Event::Ignored(Ignored::Implausible));
    assert_eq!(decode(&[0x00, 0x7f]), Event::Ignored(Ignored::Implausible));
}

#[test]
fn test_settings_truncated() {
    assert_eq!(decode(&[0x00]), Event::Ignored(Ignored::Truncated(MSG_SETTINGS)));
}
