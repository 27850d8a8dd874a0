//! Mood scale helpers.
//!
//! Moods live on a 0..=100 scale where 50 is neutral. Entries written by the
//! first release used 0..=10, so any value at or below 10 is read as a legacy
//! value and scaled up by ten. A genuine 0..=100 reading of 10 or less cannot
//! be told apart from legacy data; that ambiguity is kept on purpose.

use serde::Serialize;

pub const NEUTRAL: f64 = 50.0;
pub const MIN: f64 = 0.0;
pub const MAX: f64 = 100.0;

const LEGACY_CEILING: f64 = 10.0;
const NEUTRAL_BAND_LOW: f64 = 45.0;
const NEUTRAL_BAND_HIGH: f64 = 55.0;

const COOL: Rgb = Rgb::new(165, 180, 201);
const CREAM: Rgb = Rgb::new(245, 242, 235);
const WARM: Rgb = Rgb::new(240, 213, 197);

pub fn normalize(value: f64) -> f64 {
    if value.is_nan() {
        return NEUTRAL;
    }
    let scaled = if value <= LEGACY_CEILING {
        value * 10.0
    } else {
        value
    };
    scaled.clamp(MIN, MAX)
}

pub fn to_label(value: f64) -> String {
    let normalized = normalize(value);
    if normalized < NEUTRAL_BAND_LOW {
        return format!("{} Not Good", round_half_up((NEUTRAL - normalized) / 10.0));
    }
    if normalized > NEUTRAL_BAND_HIGH {
        return format!("{} Good", round_half_up((normalized - NEUTRAL) / 10.0));
    }
    "Neutral".to_string()
}

/// Distance from neutral on the 0..=5 display scale, e.g. "5", "2.5", "0".
pub fn to_magnitude(value: f64) -> String {
    format_tenths((normalize(value) - NEUTRAL).abs() / 10.0)
}

/// Change between two readings, both normalized first.
pub fn improvement(pre: f64, post: f64) -> f64 {
    normalize(post) - normalize(pre)
}

/// Badge text for a positive improvement, on the same 0..=10 scale as labels.
pub fn improvement_badge(delta: f64) -> Option<String> {
    if delta > 0.0 {
        Some(format!("+{}", format_tenths(delta / 10.0)))
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn css(&self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

/// Background tint for a mood slider position.
pub fn background_rgb(value: f64) -> Rgb {
    let value = if value.is_nan() {
        NEUTRAL
    } else {
        value.clamp(MIN, MAX)
    };
    if value <= NEUTRAL {
        lerp_rgb(COOL, CREAM, value / NEUTRAL)
    } else {
        lerp_rgb(CREAM, WARM, (value - NEUTRAL) / NEUTRAL)
    }
}

fn lerp_rgb(from: Rgb, to: Rgb, t: f64) -> Rgb {
    let channel = |a: u8, b: u8| {
        let a = f64::from(a);
        let b = f64::from(b);
        (a + (b - a) * t).round().clamp(0.0, 255.0) as u8
    };
    Rgb {
        r: channel(from.r, to.r),
        g: channel(from.g, to.g),
        b: channel(from.b, to.b),
    }
}

fn round_half_up(value: f64) -> i64 {
    value.round() as i64
}

fn format_tenths(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    let text = format!("{rounded:.1}");
    match text.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => text,
    }
}
