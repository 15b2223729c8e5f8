//! Range-of-motion forecast
//!
//! Projects the elbow arc a few weeks ahead from the rate of change between
//! the first and last recorded measurements, and classifies where the
//! current arc sits against the active phase's target band.
//!
//! # Algorithm
//!
//! ```text
//! weekly_gain  = round1((last.arc - first.arc) / days(first, last) * 7)
//! projected    = round(current + weekly_gain * 4)        if weekly_gain > 0
//! weeks_to_100 = ceil((100 - current) / weekly_gain)     if current < 100
//! weeks_to_130 = ceil((130 - current) / weekly_gain)     if current < 130
//! ```
//!
//! Only the two endpoints are used; intermediate measurements do not affect
//! the rate.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dates::days_between;
use crate::models::RomMeasurement;
use crate::sanitize::{angle, round1, round_half_up};

/// Arc (degrees) regarded as functional for daily living
pub const FUNCTIONAL_ARC: f64 = 100.0;

/// Arc (degrees) regarded as a normal elbow
pub const NORMAL_ARC: f64 = 130.0;

/// Weeks ahead used for the projected arc
pub const PROJECTION_WEEKS: f64 = 4.0;

/// Target arc band for a rehab phase, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RomBand {
    pub min: f64,
    pub max: f64,
}

impl RomBand {
    pub fn new(min: f64, max: f64) -> Self {
        RomBand { min, max }
    }
}

impl fmt::Display for RomBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.0}°-{:.0}°", self.min, self.max)
    }
}

/// Position of the current arc relative to the phase band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trajectory {
    Ahead,
    OnTrack,
    Behind,
    Unknown,
}

impl fmt::Display for Trajectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trajectory::Ahead => write!(f, "Ahead"),
            Trajectory::OnTrack => write!(f, "On track"),
            Trajectory::Behind => write!(f, "Behind"),
            Trajectory::Unknown => write!(f, "Unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryForecast {
    /// Arc of the most recent measurement
    pub current_arc: Option<f64>,

    /// Degrees gained per week, one decimal
    pub weekly_gain: f64,

    /// Arc expected four weeks out, only while improving
    pub projected_arc: Option<f64>,

    pub weeks_to_functional: Option<u32>,
    pub weeks_to_normal: Option<u32>,
    pub trajectory: Trajectory,
    pub measurements: usize,
}

impl RecoveryForecast {
    pub fn unknown() -> Self {
        RecoveryForecast {
            current_arc: None,
            weekly_gain: 0.0,
            projected_arc: None,
            weeks_to_functional: None,
            weeks_to_normal: None,
            trajectory: Trajectory::Unknown,
            measurements: 0,
        }
    }
}

/// Forecast projector
#[derive(Debug, Clone, Default)]
pub struct ForecastProjector;

impl ForecastProjector {
    pub fn new() -> Self {
        ForecastProjector
    }

    /// Project the forecast from ROM history ordered by date.
    ///
    /// Without a target band the trajectory stays `Unknown`.
    pub fn project(&self, history: &[RomMeasurement], band: Option<RomBand>) -> RecoveryForecast {
        let (Some(first), Some(last)) = (history.first(), history.last()) else {
            return RecoveryForecast::unknown();
        };

        let current_arc = angle(last.arc);
        let weekly_gain = if history.len() >= 2 {
            Self::weekly_gain(first, last)
        } else {
            0.0
        };

        let projected_arc = if weekly_gain > 0.0 {
            Some(round_half_up(current_arc + weekly_gain * PROJECTION_WEEKS))
        } else {
            None
        };

        RecoveryForecast {
            current_arc: Some(current_arc),
            weekly_gain,
            projected_arc,
            weeks_to_functional: Self::weeks_to(FUNCTIONAL_ARC, current_arc, weekly_gain),
            weeks_to_normal: Self::weeks_to(NORMAL_ARC, current_arc, weekly_gain),
            trajectory: band.map_or(Trajectory::Unknown, |b| Self::classify(current_arc, b)),
            measurements: history.len(),
        }
    }

    fn weekly_gain(first: &RomMeasurement, last: &RomMeasurement) -> f64 {
        let days = days_between(first.date, last.date);
        if days <= 0 {
            return 0.0;
        }
        let delta = angle(last.arc) - angle(first.arc);
        round1(delta / days as f64 * 7.0)
    }

    fn weeks_to(target: f64, current: f64, weekly_gain: f64) -> Option<u32> {
        if current >= target {
            Some(0)
        } else if weekly_gain > 0.0 {
            Some(((target - current) / weekly_gain).ceil() as u32)
        } else {
            None
        }
    }

    /// Classify an arc against a target band
    pub fn classify(current_arc: f64, band: RomBand) -> Trajectory {
        if current_arc >= band.max {
            Trajectory::Ahead
        } else if current_arc >= band.min {
            Trajectory::OnTrack
        } else {
            Trajectory::Behind
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MeasuredBy;
    use chrono::{Days, NaiveDate};

    fn day(offset: u64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .checked_add_days(Days::new(offset))
            .unwrap()
    }

    fn rom(offset: u64, arc: f64) -> RomMeasurement {
        RomMeasurement {
            date: day(offset),
            arc,
            flexion: arc,
            extension_deficit: 0.0,
            pronation: None,
            supination: None,
            measured_by: MeasuredBy::Manual,
        }
    }

    fn band() -> Option<RomBand> {
        Some(RomBand::new(60.0, 90.0))
    }

    #[test]
    fn test_two_point_projection() {
        let forecast = ForecastProjector::new().project(&[rom(0, 30.0), rom(7, 40.0)], band());
        assert_eq!(forecast.weekly_gain, 10.0);
        assert_eq!(forecast.projected_arc, Some(80.0));
        assert_eq!(forecast.weeks_to_functional, Some(6));
        assert_eq!(forecast.weeks_to_normal, Some(9));
        assert_eq!(forecast.trajectory, Trajectory::Behind);
    }

    #[test]
    fn test_single_measurement() {
        let forecast = ForecastProjector::new().project(&[rom(0, 70.0)], band());
        assert_eq!(forecast.current_arc, Some(70.0));
        assert_eq!(forecast.weekly_gain, 0.0);
        assert_eq!(forecast.projected_arc, None);
        assert_eq!(forecast.weeks_to_functional, None);
        assert_eq!(forecast.trajectory, Trajectory::OnTrack);
    }

    #[test]
    fn test_no_data_is_unknown() {
        let forecast = ForecastProjector::new().project(&[], band());
        assert_eq!(forecast, RecoveryForecast::unknown());
    }

    #[test]
    fn test_only_endpoints_matter() {
        let history = [rom(0, 50.0), rom(3, 95.0), rom(14, 60.0)];
        let forecast = ForecastProjector::new().project(&history, band());
        assert_eq!(forecast.weekly_gain, 5.0);
        assert_eq!(forecast.current_arc, Some(60.0));
    }

    #[test]
    fn test_gain_rounded_to_one_decimal() {
        // 10 degrees over 3 days: 23.333 per week
        let forecast = ForecastProjector::new().project(&[rom(0, 40.0), rom(3, 50.0)], band());
        assert_eq!(forecast.weekly_gain, 23.3);
        assert_eq!(forecast.projected_arc, Some(143.0));
    }

    #[test]
    fn test_regression_and_same_day() {
        let regressing = ForecastProjector::new().project(&[rom(0, 80.0), rom(7, 75.0)], band());
        assert_eq!(regressing.weekly_gain, -5.0);
        assert_eq!(regressing.projected_arc, None);
        assert_eq!(regressing.weeks_to_functional, None);

        let same_day = ForecastProjector::new().project(&[rom(2, 80.0), rom(2, 90.0)], band());
        assert_eq!(same_day.weekly_gain, 0.0);
        assert_eq!(same_day.trajectory, Trajectory::Ahead);
    }

    #[test]
    fn test_no_band_leaves_trajectory_unknown() {
        let forecast = ForecastProjector::new().project(&[rom(0, 30.0), rom(7, 40.0)], None);
        assert_eq!(forecast.trajectory, Trajectory::Unknown);
        assert_eq!(forecast.weekly_gain, 10.0);
    }

    #[test]
    fn test_milestones_already_reached() {
        let forecast = ForecastProjector::new().project(&[rom(0, 120.0), rom(7, 135.0)], band());
        assert_eq!(forecast.weeks_to_functional, Some(0));
        assert_eq!(forecast.weeks_to_normal, Some(0));
    }
}
