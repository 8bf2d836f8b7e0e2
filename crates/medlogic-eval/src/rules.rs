//! Rule variants
//!
//! - [`ConceptRule`]: reads every observation of one concept
//! - [`ReferenceRule`]: reads `key` from a named data source (`%%source.key`)
//! - [`BuiltinRule`]: demographic values computed from the patient
//! - [`BmiRule`]: body mass index derived from two other tokens

use chrono::{Datelike, NaiveDate};
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_types::{Concept, Datatype, LogicCriteria, LogicResult, Patient, RuleArgs};
use std::fmt;

use crate::context::LogicContext;
use crate::rule::{Rule, RuleParameterInfo};

/// Prefix marking a reference token
pub const REFERENCE_PREFIX: &str = "%%";

/// Rule backed by a dictionary concept
///
/// Arguments are ignored: the rule always reads the full history of its
/// concept from its data source.
#[derive(Debug, Clone)]
pub struct ConceptRule {
    concept: Concept,
    source: String,
}

impl ConceptRule {
    pub fn new(concept: Concept, source: impl Into<String>) -> Self {
        Self {
            concept,
            source: source.into(),
        }
    }

    pub fn concept(&self) -> &Concept {
        &self.concept
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Rule for ConceptRule {
    fn eval(&self, ctx: &LogicContext, patient: &Patient, _args: &RuleArgs) -> EvalResult<LogicResult> {
        ctx.read(&self.source, patient, &self.concept.name, None)
    }

    fn default_datatype(&self) -> Option<Datatype> {
        self.concept.datatype.result_datatype()
    }
}

/// Rule that defers to a data source key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRule {
    source: String,
    key: String,
}

impl ReferenceRule {
    pub fn new(source: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            key: key.into(),
        }
    }

    /// Parse `%%source.key`, splitting on the first `.`
    pub fn parse(token: &str) -> EvalResult<Self> {
        let body = token
            .strip_prefix(REFERENCE_PREFIX)
            .ok_or_else(|| LogicError::invalid_token(token, "missing '%%' prefix"))?;
        let (source, key) = body
            .split_once('.')
            .ok_or_else(|| LogicError::invalid_token(token, "missing '.' separator"))?;
        if source.is_empty() {
            return Err(LogicError::invalid_token(token, "empty data source name"));
        }
        if key.is_empty() {
            return Err(LogicError::invalid_token(token, "empty key"));
        }
        Ok(Self::new(source, key))
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Rule for ReferenceRule {
    fn eval(&self, ctx: &LogicContext, patient: &Patient, _args: &RuleArgs) -> EvalResult<LogicResult> {
        ctx.read(&self.source, patient, &self.key, None)
    }

    fn default_datatype(&self) -> Option<Datatype> {
        None
    }
}

impl fmt::Display for ReferenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{REFERENCE_PREFIX}{}.{}", self.source, self.key)
    }
}

/// Demographic rules computed from patient fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinRule {
    /// Age on the index date; `units` may be `years` (default) or `months`
    Age,
    Gender,
    /// `ALIVE` or `DEAD`, dated with the death date when known
    VitalStatus,
    Birthdate,
}

impl BuiltinRule {
    pub const ALL: [BuiltinRule; 4] = [Self::Age, Self::Gender, Self::VitalStatus, Self::Birthdate];

    /// Token the rule is seeded under
    pub fn token(self) -> &'static str {
        match self {
            Self::Age => "AGE",
            Self::Gender => "GENDER",
            Self::VitalStatus => "VITAL STATUS",
            Self::Birthdate => "BIRTHDATE",
        }
    }

    /// Name the rule's factory is registered under
    pub fn class_name(self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::Gender => "gender",
            Self::VitalStatus => "vital_status",
            Self::Birthdate => "birthdate",
        }
    }
}

fn midnight(date: NaiveDate) -> Option<chrono::DateTime<chrono::Utc>> {
    date.and_hms_opt(0, 0, 0).map(|d| d.and_utc())
}

fn months_between(from: NaiveDate, to: NaiveDate) -> Option<u32> {
    if to < from {
        return None;
    }
    let mut months = (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32;
    if to.day() < from.day() {
        months -= 1;
    }
    u32::try_from(months).ok()
}

impl Rule for BuiltinRule {
    fn eval(&self, ctx: &LogicContext, patient: &Patient, args: &RuleArgs) -> EvalResult<LogicResult> {
        match self {
            Self::Age => {
                let on = ctx.index_date().date_naive();
                let units = args.get("units").and_then(|v| v.as_str()).unwrap_or("years");
                let age = match units {
                    "years" => patient.age_on(on),
                    "months" => {
                        let end = match patient.death_date {
                            Some(death) if patient.dead && death < on => death,
                            _ => on,
                        };
                        patient.birthdate.and_then(|b| months_between(b, end))
                    }
                    other => {
                        return Err(LogicError::invalid_argument(
                            "units",
                            format!("expected 'years' or 'months', got '{other}'"),
                        ));
                    }
                };
                Ok(age.map_or_else(LogicResult::null, |a| LogicResult::numeric(f64::from(a))))
            }
            Self::Gender => Ok(patient
                .gender
                .as_deref()
                .map_or_else(LogicResult::null, |g| LogicResult::text(g))),
            Self::VitalStatus => {
                let status = LogicResult::text(if patient.dead { "DEAD" } else { "ALIVE" });
                Ok(match patient.death_date.and_then(midnight) {
                    Some(date) if patient.dead => status.with_result_date(date),
                    _ => status,
                })
            }
            Self::Birthdate => Ok(patient
                .birthdate
                .and_then(midnight)
                .map_or_else(LogicResult::null, LogicResult::datetime)),
        }
    }

    fn default_datatype(&self) -> Option<Datatype> {
        Some(match self {
            Self::Age => Datatype::Numeric,
            Self::Gender | Self::VitalStatus => Datatype::Text,
            Self::Birthdate => Datatype::Date,
        })
    }

    fn parameters(&self) -> Vec<RuleParameterInfo> {
        match self {
            Self::Age => vec![RuleParameterInfo::optional("units", Datatype::Text)],
            _ => Vec::new(),
        }
    }
}

/// Body mass index from the latest weight (kg) and height (cm)
///
/// Both readings are evaluated through the context, so they come from
/// whatever rules the two tokens are registered with. The result is rounded
/// to one decimal and dated with the later of the two readings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BmiRule {
    weight: String,
    height: String,
}

impl BmiRule {
    pub const CLASS_NAME: &'static str = "bmi";

    pub fn new(weight_token: impl Into<String>, height_token: impl Into<String>) -> Self {
        Self {
            weight: weight_token.into(),
            height: height_token.into(),
        }
    }
}

impl Default for BmiRule {
    fn default() -> Self {
        Self::new("WEIGHT (KG)", "HEIGHT (CM)")
    }
}

impl Rule for BmiRule {
    fn eval(&self, ctx: &LogicContext, patient: &Patient, _args: &RuleArgs) -> EvalResult<LogicResult> {
        let weight = ctx.eval(patient, &LogicCriteria::new(self.weight.as_str()).latest())?;
        let height = ctx.eval(patient, &LogicCriteria::new(self.height.as_str()).latest())?;
        let (Some(kg), Some(cm)) = (weight.value_numeric(), height.value_numeric()) else {
            return Ok(LogicResult::null());
        };
        if cm <= 0.0 {
            return Ok(LogicResult::null());
        }

        let meters = cm / 100.0;
        let bmi = LogicResult::numeric((kg / (meters * meters) * 10.0).round() / 10.0);
        Ok(match weight.result_date().max(height.result_date()) {
            Some(date) => bmi.with_result_date(date),
            None => bmi,
        })
    }

    fn dependencies(&self) -> Vec<String> {
        vec![self.weight.clone(), self.height.clone()]
    }

    fn default_datatype(&self) -> Option<Datatype> {
        Some(Datatype::Numeric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("%%obs.CD4 COUNT", "obs", "CD4 COUNT")]
    #[case("%%person.birthdate", "person", "birthdate")]
    #[case("%%obs.WEIGHT.KG", "obs", "WEIGHT.KG")]
    fn test_reference_parse(#[case] token: &str, #[case] source: &str, #[case] key: &str) {
        let rule = ReferenceRule::parse(token).unwrap();
        assert_eq!(rule.source(), source);
        assert_eq!(rule.key(), key);
        assert_eq!(rule.to_string(), token);
    }

    #[rstest]
    #[case("%%obs")]
    #[case("%%.CD4")]
    #[case("%%obs.")]
    #[case("obs.CD4")]
    fn test_reference_parse_rejects(#[case] token: &str) {
        let err = ReferenceRule::parse(token).unwrap_err();
        assert!(matches!(err, LogicError::InvalidToken { .. }));
    }

    #[test]
    fn test_months_between() {
        let from = NaiveDate::from_ymd_opt(2023, 1, 31).unwrap();
        assert_eq!(months_between(from, NaiveDate::from_ymd_opt(2023, 3, 30).unwrap()), Some(1));
        assert_eq!(months_between(from, NaiveDate::from_ymd_opt(2023, 3, 31).unwrap()), Some(2));
        assert_eq!(months_between(from, NaiveDate::from_ymd_opt(2022, 3, 31).unwrap()), None);
    }
}
