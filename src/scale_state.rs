use std::fmt;

/// Lifecycle of the link to the scale. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Handshaking,
    Connected,
    /// Waiting out the backoff before scanning again after an unexpected drop
    Reconnecting,
}

impl ConnectionState {
    /// True for every state in which the link owns a pending timer, step or session.
    pub fn is_active(self) -> bool {
        self != ConnectionState::Disconnected
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// A signed fixed-point weight in ten-thousandths of a gram.
///
/// The finest resolution the scale can signal is 0.0001 g, so every reading is
/// represented exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Grams(i64);

impl Grams {
    /// Number of fixed-point steps per gram
    pub const SCALE: i64 = 10_000;

    pub const fn from_ten_thousandths(value: i64) -> Self {
        Self(value)
    }

    pub const fn from_whole(grams: i64) -> Self {
        Self(grams * Self::SCALE)
    }

    pub const fn ten_thousandths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }
}

impl fmt::Display for Grams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} g", self.as_f64())
    }
}

/// The decimal scale applied to the raw magnitude carried in a weight payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitScale {
    /// magnitude / 10
    Deci,
    /// magnitude / 100
    Centi,
    /// magnitude / 1000
    Milli,
    /// magnitude / 10000
    DeciMilli,
}

impl UnitScale {
    pub const fn divisor(self) -> i64 {
        match self {
            UnitScale::Deci => 10,
            UnitScale::Centi => 100,
            UnitScale::Milli => 1_000,
            UnitScale::DeciMilli => 10_000,
        }
    }

    const fn steps_per_count(self) -> i64 {
        Grams::SCALE / self.divisor()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sign {
    Positive,
    Negative,
}

/// A single weight reading reported by the scale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightSample {
    /// The signed weight
    pub grams: Grams,
    /// Whether the reading has settled. The decoder never sets this; consumers
    /// judge stability from repeated identical readings.
    pub is_stable: bool,
    /// The scale the device declared for the raw magnitude
    pub unit_scale: UnitScale,
    pub sign: Sign,
}

impl WeightSample {
    /// Build a sample from the raw 16 bit magnitude as found on the wire.
    pub fn from_raw(magnitude: u16, unit_scale: UnitScale, sign: Sign) -> Self {
        let steps = i64::from(magnitude) * unit_scale.steps_per_count();
        let steps = match sign {
            Sign::Positive => steps,
            Sign::Negative => -steps,
        };
        Self {
            grams: Grams::from_ten_thousandths(steps),
            is_stable: false,
            unit_scale,
            sign,
        }
    }
}

/// The reported battery charge of the scale in %
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BatteryLevel {
    percent: u8,
}

impl BatteryLevel {
    /// Returns `None` for anything above 100 %.
    pub fn new(percent: u8) -> Option<Self> {
        (percent <= 100).then_some(Self { percent })
    }

    pub fn percent(self) -> u8 {
        self.percent
    }
}

/// A button pressed on the scale itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonPressed {
    Tare,
    Start,
    Stop,
    Reset,
    /// A button event with a code pair this crate does not name
    Other(u8, u8),
}

#[test]
fn test_weight_sample_scaling() {
    let sample = WeightSample::from_raw(5000, UnitScale::Deci, Sign::Positive);
    assert_eq!(sample.grams, Grams::from_whole(500));

    let sample = WeightSample::from_raw(5000, UnitScale::DeciMilli, Sign::Positive);
    assert_eq!(sample.grams, Grams::from_ten_thousandths(5000));
    assert_eq!(sample.grams.as_f64(), 0.5);

    let sample = WeightSample::from_raw(1234, UnitScale::Centi, Sign::Negative);
    assert_eq!(sample.grams, Grams::from_ten_thousandths(-123_400));
    assert!(!sample.is_stable);
}

#[test]
fn test_battery_level_bounds() {
    assert_eq!(BatteryLevel::new(100).map(BatteryLevel::percent), Some(100));
    assert_eq!(BatteryLevel::new(0).map(BatteryLevel::percent), Some(0));
    assert_eq!(BatteryLevel::new(101), None);
}

#[test]
fn test_grams_display() {
    assert_eq!(Grams::from_ten_thousandths(12_345).to_string(), "1.23 g");
}
