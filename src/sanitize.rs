//! Coercion of manually entered values.
//!
//! Entries come from hand input, so bad values are clamped or defaulted
//! instead of rejected. NaN and infinities become 0.

pub const MAX_ANGLE: f64 = 180.0;
pub const MAX_SLEEP_HOURS: f64 = 24.0;
pub const MAX_PAIN: u8 = 10;

/// Replace non-finite values with 0
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Joint angle in degrees, clamped to [0, 180]
pub fn angle(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, MAX_ANGLE)
}

/// Hours slept, clamped to [0, 24]
pub fn sleep_hours(value: f64) -> f64 {
    finite_or_zero(value).clamp(0.0, MAX_SLEEP_HOURS)
}

/// Pain level, capped at 10
pub fn pain_level(value: u8) -> u8 {
    value.min(MAX_PAIN)
}

/// Round to the nearest integer, halves toward positive infinity
pub fn round_half_up(value: f64) -> f64 {
    (value + 0.5).floor()
}

/// Round to one decimal place with [`round_half_up`] semantics
pub fn round1(value: f64) -> f64 {
    round_half_up(value * 10.0) / 10.0
}
