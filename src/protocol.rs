//! Post-operative elbow rehab protocol
//!
//! The program is split into sequential phases. Each phase starts at a given
//! number of whole weeks after surgery and carries the arc band the patient
//! is expected to be in during that phase.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dates::days_between;
use crate::error::{RehabError, Result};
use crate::forecast::RomBand;

/// One phase of the rehab schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseDef {
    pub number: u8,
    pub name: String,
    /// Whole weeks after surgery at which this phase begins
    pub start_week: u32,
    pub target: RomBand,
}

impl fmt::Display for PhaseDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Phase {}: {}", self.number, self.name)
    }
}

/// Validated, ordered phase schedule
#[derive(Debug, Clone, PartialEq)]
pub struct RehabProtocol {
    phases: Vec<PhaseDef>,
}

impl RehabProtocol {
    /// Build a protocol from a phase list.
    ///
    /// Phases must be non-empty, start at week 0 and have strictly
    /// increasing start weeks.
    pub fn new(phases: Vec<PhaseDef>) -> Result<Self> {
        let Some(first) = phases.first() else {
            return Err(RehabError::Validation(
                "rehab protocol needs at least one phase".to_string(),
            ));
        };
        if first.start_week != 0 {
            return Err(RehabError::Validation(format!(
                "first phase must start at week 0, not week {}",
                first.start_week
            )));
        }
        if let Some(pair) = phases
            .windows(2)
            .find(|pair| pair[1].start_week <= pair[0].start_week)
        {
            return Err(RehabError::Validation(format!(
                "phase '{}' does not start after phase '{}'",
                pair[1].name, pair[0].name
            )));
        }
        if let Some(bad) = phases.iter().find(|p| p.target.min > p.target.max) {
            return Err(RehabError::Validation(format!(
                "phase '{}' has an inverted target band",
                bad.name
            )));
        }

        Ok(RehabProtocol { phases })
    }

    pub fn phases(&self) -> &[PhaseDef] {
        &self.phases
    }

    /// Whole weeks elapsed since surgery, 0 before the surgery date
    pub fn weeks_since(surgery_date: NaiveDate, today: NaiveDate) -> u32 {
        (days_between(surgery_date, today).max(0) / 7) as u32
    }

    /// Phase in effect on `today`
    pub fn current_phase(&self, surgery_date: NaiveDate, today: NaiveDate) -> &PhaseDef {
        let weeks = Self::weeks_since(surgery_date, today);
        self.phases
            .iter()
            .rev()
            .find(|p| p.start_week <= weeks)
            .unwrap_or(&self.phases[0])
    }
}

impl Default for RehabProtocol {
    fn default() -> Self {
        let phase = |number: u8, name: &str, start_week: u32, min: f64, max: f64| PhaseDef {
            number,
            name: name.to_string(),
            start_week,
            target: RomBand::new(min, max),
        };

        RehabProtocol {
            phases: vec![
                phase(1, "Protection", 0, 30.0, 60.0),
                phase(2, "Early motion", 2, 60.0, 90.0),
                phase(3, "Active range", 6, 90.0, 110.0),
                phase(4, "Strengthening", 12, 110.0, 125.0),
                phase(5, "Return to function", 20, 125.0, 140.0),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn surgery() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()
    }

    fn after(days: u64) -> NaiveDate {
        surgery().checked_add_days(Days::new(days)).unwrap()
    }

    #[test]
    fn test_phase_boundaries() {
        let protocol = RehabProtocol::default();
        assert_eq!(protocol.current_phase(surgery(), after(0)).number, 1);
        assert_eq!(protocol.current_phase(surgery(), after(13)).number, 1);
        assert_eq!(protocol.current_phase(surgery(), after(14)).number, 2);
        assert_eq!(protocol.current_phase(surgery(), after(6 * 7)).number, 3);
        assert_eq!(protocol.current_phase(surgery(), after(12 * 7)).number, 4);
        assert_eq!(protocol.current_phase(surgery(), after(400)).number, 5);
    }

    #[test]
    fn test_before_surgery_is_first_phase() {
        let protocol = RehabProtocol::default();
        let before = NaiveDate::from_ymd_opt(2023, 12, 1).unwrap();
        assert_eq!(RehabProtocol::weeks_since(surgery(), before), 0);
        assert_eq!(protocol.current_phase(surgery(), before).number, 1);
    }

    #[test]
    fn test_rejects_unordered_phases() {
        let mut phases = RehabProtocol::default().phases().to_vec();
        phases.swap(1, 2);
        assert!(RehabProtocol::new(phases).is_err());
        assert!(RehabProtocol::new(vec![]).is_err());
    }
}
