//! Clinical durations used by date constraints
//!
//! Calendar units are approximated: a month is 30 days when counting days and
//! a twelfth of a 365-day year when counting milliseconds.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::float_bits;

/// Duration units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DurationUnit {
    const fn millis(self) -> f64 {
        match self {
            Self::Seconds => 1_000.0,
            Self::Minutes => 60_000.0,
            Self::Hours => 3_600_000.0,
            Self::Days => 86_400_000.0,
            Self::Weeks => 604_800_000.0,
            Self::Months => 2_628_000_000.0,
            Self::Years => 31_536_000_000.0,
        }
    }

    const fn days(self) -> f64 {
        match self {
            Self::Seconds => 1.0 / 86_400.0,
            Self::Minutes => 1.0 / 1_440.0,
            Self::Hours => 1.0 / 24.0,
            Self::Days => 1.0,
            Self::Weeks => 7.0,
            Self::Months => 30.0,
            Self::Years => 365.0,
        }
    }
}

impl std::str::FromStr for DurationUnit {
    type Err = medlogic_diagnostics::LogicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches('s') {
            "second" => Ok(Self::Seconds),
            "minute" => Ok(Self::Minutes),
            "hour" => Ok(Self::Hours),
            "day" => Ok(Self::Days),
            "week" => Ok(Self::Weeks),
            "month" => Ok(Self::Months),
            "year" => Ok(Self::Years),
            _ => Err(medlogic_diagnostics::LogicError::format(s, "duration unit")),
        }
    }
}

/// Amount of time in a unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Duration {
    value: f64,
    units: DurationUnit,
}

impl Duration {
    pub const fn new(value: f64, units: DurationUnit) -> Self {
        Self { value, units }
    }

    pub const fn seconds(value: f64) -> Self {
        Self::new(value, DurationUnit::Seconds)
    }

    pub const fn minutes(value: f64) -> Self {
        Self::new(value, DurationUnit::Minutes)
    }

    pub const fn hours(value: f64) -> Self {
        Self::new(value, DurationUnit::Hours)
    }

    pub const fn days(value: f64) -> Self {
        Self::new(value, DurationUnit::Days)
    }

    pub const fn weeks(value: f64) -> Self {
        Self::new(value, DurationUnit::Weeks)
    }

    pub const fn months(value: f64) -> Self {
        Self::new(value, DurationUnit::Months)
    }

    pub const fn years(value: f64) -> Self {
        Self::new(value, DurationUnit::Years)
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn units(&self) -> DurationUnit {
        self.units
    }

    pub fn in_days(&self) -> f64 {
        self.value * self.units.days()
    }

    pub fn in_millis(&self) -> f64 {
        self.value * self.units.millis()
    }

    /// Convert to a chrono delta, rounding to the nearest millisecond
    ///
    /// `None` when the duration is outside the range chrono can represent.
    pub fn to_time_delta(&self) -> Option<TimeDelta> {
        let millis = self.in_millis().round();
        if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
            return None;
        }
        TimeDelta::try_milliseconds(millis as i64)
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.units == other.units && float_bits(self.value) == float_bits(other.value)
    }
}

impl Eq for Duration {}

impl Hash for Duration {
    fn hash<H: Hasher>(&self, state: &mut H) {
        float_bits(self.value).hash(state);
        self.units.hash(state);
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = format!("{:?}", self.units).to_lowercase();
        write!(f, "{} {}", self.value, unit)
    }
}

impl std::str::FromStr for Duration {
    type Err = medlogic_diagnostics::LogicError;

    /// Parses `6 months`, `2 weeks`, `1.5 years`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (value, units) = s
            .trim()
            .split_once(char::is_whitespace)
            .ok_or_else(|| medlogic_diagnostics::LogicError::format(s, "duration"))?;
        let value = value
            .parse::<f64>()
            .map_err(|_| medlogic_diagnostics::LogicError::format(s, "duration"))?;
        Ok(Self::new(value, units.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_days() {
        assert_eq!(Duration::months(2.0).in_days(), 60.0);
        assert_eq!(Duration::years(1.0).in_days(), 365.0);
        assert_eq!(Duration::weeks(2.0).in_days(), 14.0);
        assert_eq!(Duration::hours(12.0).in_days(), 0.5);
    }

    #[test]
    fn test_in_millis() {
        assert_eq!(Duration::seconds(2.0).in_millis(), 2_000.0);
        assert_eq!(Duration::weeks(1.0).in_millis(), 604_800_000.0);
        assert_eq!(Duration::months(1.0).in_millis(), 2_628_000_000.0);
        assert_eq!(Duration::years(1.0).in_millis(), 31_536_000_000.0);
    }

    #[test]
    fn test_unit_parsing() {
        assert_eq!("months".parse::<DurationUnit>().unwrap(), DurationUnit::Months);
        assert_eq!("Day".parse::<DurationUnit>().unwrap(), DurationUnit::Days);
        assert!("fortnight".parse::<DurationUnit>().is_err());
    }

    #[test]
    fn test_duration_parsing() {
        assert_eq!("6 months".parse::<Duration>().unwrap(), Duration::months(6.0));
        assert_eq!(" 1.5 year ".parse::<Duration>().unwrap(), Duration::years(1.5));
        assert!("6".parse::<Duration>().is_err());
        assert!("six months".parse::<Duration>().is_err());
    }

    #[test]
    fn test_time_delta_out_of_range() {
        assert_eq!(Duration::days(1.0).to_time_delta(), Some(TimeDelta::days(1)));
        assert_eq!(Duration::years(300_000_000.0).to_time_delta(), None);
        assert_eq!(Duration::years(f64::INFINITY).to_time_delta(), None);
        assert_eq!(Duration::days(f64::NAN).to_time_delta(), None);
    }

    #[test]
    fn test_equality_includes_units() {
        assert_eq!(Duration::days(7.0), Duration::days(7.0));
        assert_ne!(Duration::days(7.0), Duration::weeks(1.0));
    }
}
