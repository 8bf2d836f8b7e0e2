//! Evaluation criteria: which token to read, how to narrow the readings, and
//! how to collapse them.
//!
//! Criteria are values. Two criteria built the same way are equal and hash
//! the same, so they can be part of cache keys.

use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use medlogic_diagnostics::{EvalResult, LogicError};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::args::{ArgValue, RuleArgs};
use crate::concept::ConceptId;
use crate::duration::Duration;
use crate::float_bits;
use crate::result::LogicResult;

/// How a filtered set of readings is collapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Most recent reading
    Latest,
    /// Earliest reading
    Earliest,
    /// The `n` most recent readings, oldest first
    Last(usize),
    /// The `n` earliest readings, oldest first
    First(usize),
    Count,
    Exists,
    NotExists,
    Average,
    Max,
    Min,
    Distinct,
}

impl FromStr for Aggregation {
    type Err = LogicError;

    /// Parses `latest`, `last`, `last:3`, `first:2`, `count`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        let (name, n) = match lower.split_once(':') {
            Some((name, n)) => {
                let n = n
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| LogicError::format(s, "aggregation count"))?;
                (name.trim().to_string(), Some(n))
            }
            None => (lower, None),
        };
        Ok(match (name.as_str(), n) {
            ("latest" | "last", None) => Self::Latest,
            ("earliest" | "first", None) => Self::Earliest,
            ("last", Some(n)) => Self::Last(n),
            ("first", Some(n)) => Self::First(n),
            ("count", None) => Self::Count,
            ("exists", None) => Self::Exists,
            ("not_exists" | "notexists", None) => Self::NotExists,
            ("average" | "avg", None) => Self::Average,
            ("max", None) => Self::Max,
            ("min", None) => Self::Min,
            ("distinct", None) => Self::Distinct,
            _ => return Err(LogicError::format(s, "aggregation")),
        })
    }
}

/// Restriction on result dates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateConstraint {
    /// Evaluate as of this instant; later readings are ignored and `Within`
    /// is measured back from here
    AsOf(DateTime<Utc>),
    Before(DateTime<Utc>),
    After(DateTime<Utc>),
    /// Readings no older than the duration, counted back from the index date
    Within(Duration),
}

/// Restriction on result values
#[derive(Debug, Clone)]
pub enum ValueFilter {
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    Equals(ArgValue),
    Contains(ConceptId),
}

impl ValueFilter {
    fn matches(&self, result: &LogicResult) -> bool {
        let number = || result.to_number().ok();
        match self {
            Self::Gt(v) => number().is_some_and(|n| n > *v),
            Self::Gte(v) => number().is_some_and(|n| n >= *v),
            Self::Lt(v) => number().is_some_and(|n| n < *v),
            Self::Lte(v) => number().is_some_and(|n| n <= *v),
            Self::Contains(id) => result.contains_concept(*id),
            Self::Equals(expected) => match expected {
                ArgValue::Integer(_) | ArgValue::Number(_) => {
                    number().is_some() && number() == expected.as_f64()
                }
                ArgValue::Text(s) => result.to_string() == *s,
                ArgValue::Boolean(b) => result.value_boolean() == Some(*b),
                ArgValue::Date(d) => result.to_datetime() == Some(*d),
                ArgValue::Concept(id) => result.contains_concept(*id),
            },
        }
    }
}

impl PartialEq for ValueFilter {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Gt(a), Self::Gt(b))
            | (Self::Gte(a), Self::Gte(b))
            | (Self::Lt(a), Self::Lt(b))
            | (Self::Lte(a), Self::Lte(b)) => float_bits(*a) == float_bits(*b),
            (Self::Equals(a), Self::Equals(b)) => a == b,
            (Self::Contains(a), Self::Contains(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ValueFilter {}

impl Hash for ValueFilter {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Gt(v) | Self::Gte(v) | Self::Lt(v) | Self::Lte(v) => float_bits(*v).hash(state),
            Self::Equals(a) => a.hash(state),
            Self::Contains(id) => id.hash(state),
        }
    }
}

/// Per-reading restriction tree
///
/// Build it through [`Condition::all`] and [`Condition::any`] so that nested
/// conjunctions are flattened and single-member groups collapse; the text
/// form reads back to the same tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Condition {
    Date(DateConstraint),
    Value(ValueFilter),
    /// Every member holds; no members matches every reading
    All(Vec<Condition>),
    /// At least one member holds
    Any(Vec<Condition>),
    Not(Box<Condition>),
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl Condition {
    /// Condition matching every reading
    pub fn always() -> Self {
        Self::All(Vec::new())
    }

    pub fn is_always(&self) -> bool {
        matches!(self, Self::All(items) if items.is_empty())
    }

    pub fn all(items: impl IntoIterator<Item = Condition>) -> Self {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Self::All(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            1 => flat.remove(0),
            _ => Self::All(flat),
        }
    }

    pub fn any(items: impl IntoIterator<Item = Condition>) -> Self {
        let mut flat = Vec::new();
        for item in items {
            match item {
                Self::Any(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => Self::Not(Box::new(Self::always())),
            1 => flat.remove(0),
            _ => Self::Any(flat),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn matches(&self, result: &LogicResult, index: DateTime<Utc>) -> bool {
        match self {
            Self::Date(constraint) => date_matches(constraint, result.result_date(), index),
            Self::Value(filter) => filter.matches(result),
            Self::All(items) => items.iter().all(|c| c.matches(result, index)),
            Self::Any(items) => items.iter().any(|c| c.matches(result, index)),
            Self::Not(inner) => !inner.matches(result, index),
        }
    }

    fn write(&self, f: &mut fmt::Formatter<'_>, level: Level) -> fmt::Result {
        match self {
            Self::Date(constraint) => write_date_constraint(f, constraint),
            Self::Value(filter) => write_value_filter(f, filter),
            Self::Not(inner) => {
                f.write_str("NOT ")?;
                inner.write(f, Level::Unary)
            }
            Self::All(items) if items.is_empty() => f.write_str("()"),
            Self::All(items) if level != Level::Unary => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    item.write(f, Level::Unary)?;
                }
                Ok(())
            }
            Self::Any(items) if level == Level::Any => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    item.write(f, Level::All)?;
                }
                Ok(())
            }
            Self::All(_) | Self::Any(_) => {
                f.write_str("(")?;
                self.write(f, Level::Any)?;
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, Level::Any)
    }
}

/// Binding strength of the surrounding text
#[derive(Clone, Copy, PartialEq, Eq)]
enum Level {
    Any,
    All,
    Unary,
}

fn date_matches(
    constraint: &DateConstraint,
    date: Option<DateTime<Utc>>,
    index: DateTime<Utc>,
) -> bool {
    match constraint {
        // Undated readings are timeless
        DateConstraint::AsOf(_) => date.is_none_or(|d| d <= index),
        DateConstraint::Before(limit) => date.is_some_and(|d| d < *limit),
        DateConstraint::After(limit) => date.is_some_and(|d| d > *limit),
        DateConstraint::Within(duration) => {
            let from = window_start(index, duration);
            date.is_some_and(|d| d >= from && d <= index)
        }
    }
}

/// Earliest instant a `Within` window reaches back to
///
/// Windows wider than the representable range start at the earliest
/// representable instant.
fn window_start(index: DateTime<Utc>, duration: &Duration) -> DateTime<Utc> {
    match duration.to_time_delta().and_then(|delta| index.checked_sub_signed(delta)) {
        Some(from) => from,
        None if duration.value() < 0.0 => DateTime::<Utc>::MAX_UTC,
        None => DateTime::<Utc>::MIN_UTC,
    }
}

/// Criteria for evaluating a token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicCriteria {
    token: String,
    aggregation: Option<Aggregation>,
    condition: Condition,
    parameters: RuleArgs,
}

impl LogicCriteria {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            aggregation: None,
            condition: Condition::always(),
            parameters: RuleArgs::new(),
        }
    }

    /// Parse a query such as `LAST 2 CD4 COUNT WITHIN 6 months > 200`
    ///
    /// A query that does not parse becomes criteria for a token spelled
    /// exactly like the query. Use [`str::parse`] to get the error instead.
    pub fn parse(query: &str) -> Self {
        query.parse().unwrap_or_else(|_| Self::new(query))
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn aggregation(&self) -> Option<Aggregation> {
        self.aggregation
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn parameters(&self) -> &RuleArgs {
        &self.parameters
    }

    /// Whether the criteria only name a token
    pub fn is_plain(&self) -> bool {
        self.aggregation.is_none() && self.condition.is_always() && self.parameters.is_empty()
    }

    // Builders

    /// Same criteria for another token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Add a restriction that must hold alongside the existing ones
    pub fn with_condition(mut self, condition: Condition) -> Self {
        let current = std::mem::take(&mut self.condition);
        self.condition = Condition::all([current, condition]);
        self
    }

    pub fn with_date_constraint(self, constraint: DateConstraint) -> Self {
        self.with_condition(Condition::Date(constraint))
    }

    pub fn with_value_filter(self, filter: ValueFilter) -> Self {
        self.with_condition(Condition::Value(filter))
    }

    pub fn with_parameters(mut self, parameters: RuleArgs) -> Self {
        self.parameters = parameters;
        self
    }

    /// Readings matching both these restrictions and those of `other`
    ///
    /// Only the restrictions of `other` are combined; its token, aggregation
    /// and parameters are ignored.
    pub fn and(mut self, other: LogicCriteria) -> Self {
        let current = std::mem::take(&mut self.condition);
        self.condition = Condition::all([current, other.condition]);
        self
    }

    /// Readings matching these restrictions or those of `other`
    pub fn or(mut self, other: LogicCriteria) -> Self {
        let current = std::mem::take(&mut self.condition);
        self.condition = Condition::any([current, other.condition]);
        self
    }

    /// Readings not matching the restrictions so far
    pub fn negate(mut self) -> Self {
        let current = std::mem::take(&mut self.condition);
        self.condition = current.negate();
        self
    }

    pub fn latest(self) -> Self {
        self.with_aggregation(Aggregation::Latest)
    }

    pub fn earliest(self) -> Self {
        self.with_aggregation(Aggregation::Earliest)
    }

    pub fn last(self, n: usize) -> Self {
        self.with_aggregation(Aggregation::Last(n))
    }

    pub fn first(self, n: usize) -> Self {
        self.with_aggregation(Aggregation::First(n))
    }

    pub fn count(self) -> Self {
        self.with_aggregation(Aggregation::Count)
    }

    pub fn exists(self) -> Self {
        self.with_aggregation(Aggregation::Exists)
    }

    pub fn not_exists(self) -> Self {
        self.with_aggregation(Aggregation::NotExists)
    }

    pub fn average(self) -> Self {
        self.with_aggregation(Aggregation::Average)
    }

    pub fn distinct(self) -> Self {
        self.with_aggregation(Aggregation::Distinct)
    }

    pub fn as_of(self, instant: DateTime<Utc>) -> Self {
        self.with_date_constraint(DateConstraint::AsOf(instant))
    }

    pub fn before(self, instant: DateTime<Utc>) -> Self {
        self.with_date_constraint(DateConstraint::Before(instant))
    }

    pub fn after(self, instant: DateTime<Utc>) -> Self {
        self.with_date_constraint(DateConstraint::After(instant))
    }

    pub fn within(self, duration: Duration) -> Self {
        self.with_date_constraint(DateConstraint::Within(duration))
    }

    pub fn gt(self, value: f64) -> Self {
        self.with_value_filter(ValueFilter::Gt(value))
    }

    pub fn gte(self, value: f64) -> Self {
        self.with_value_filter(ValueFilter::Gte(value))
    }

    pub fn lt(self, value: f64) -> Self {
        self.with_value_filter(ValueFilter::Lt(value))
    }

    pub fn lte(self, value: f64) -> Self {
        self.with_value_filter(ValueFilter::Lte(value))
    }

    pub fn equal_to(self, value: impl Into<ArgValue>) -> Self {
        self.with_value_filter(ValueFilter::Equals(value.into()))
    }

    pub fn contains(self, concept_id: ConceptId) -> Self {
        self.with_value_filter(ValueFilter::Contains(concept_id))
    }

    /// Index date the criteria are evaluated against
    ///
    /// The last top-level `AsOf` constraint wins over `default`.
    pub fn index_date(&self, default: DateTime<Utc>) -> DateTime<Utc> {
        let as_of = |c: &Condition| match c {
            Condition::Date(DateConstraint::AsOf(d)) => Some(*d),
            _ => None,
        };
        let found = match &self.condition {
            Condition::All(items) => items.iter().rev().find_map(as_of),
            other => as_of(other),
        };
        found.unwrap_or(default)
    }

    /// Narrow `result` by the restrictions, then apply the aggregation
    ///
    /// Only `Average`, `Max` and `Min` can fail, when an element cannot be
    /// read as a number.
    pub fn apply(&self, result: &LogicResult, index_date: DateTime<Utc>) -> EvalResult<LogicResult> {
        let index = self.index_date(index_date);
        let filtered = result.filter(|r| self.condition.matches(r, index));
        match self.aggregation {
            Some(aggregation) => aggregate(aggregation, filtered),
            None => Ok(filtered),
        }
    }
}

impl std::ops::Not for LogicCriteria {
    type Output = Self;

    fn not(self) -> Self {
        self.negate()
    }
}

impl FromStr for LogicCriteria {
    type Err = LogicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::query::parse_criteria(s)
    }
}

/// Elements sorted oldest first; undated elements sort before dated ones and
/// keep their relative order
fn chronological(result: &LogicResult) -> Vec<LogicResult> {
    let mut items = result.result_list().to_vec();
    items.sort_by_key(LogicResult::result_date);
    items
}

fn extreme(result: &LogicResult, pick_max: bool) -> EvalResult<LogicResult> {
    let mut best: Option<(f64, &LogicResult)> = None;
    for item in result.result_list() {
        let value = item.to_number()?;
        let better = match best {
            None => true,
            Some((current, _)) if pick_max => value > current,
            Some((current, _)) => value < current,
        };
        if better {
            best = Some((value, item));
        }
    }
    Ok(best.map(|(_, r)| r.clone()).unwrap_or_default())
}

fn aggregate(aggregation: Aggregation, filtered: LogicResult) -> EvalResult<LogicResult> {
    Ok(match aggregation {
        Aggregation::Latest => filtered.latest().clone(),
        Aggregation::Earliest => filtered.earliest().clone(),
        Aggregation::Last(n) => {
            let items = chronological(&filtered);
            let skip = items.len().saturating_sub(n);
            LogicResult::from_results(items.into_iter().skip(skip))
        }
        Aggregation::First(n) => LogicResult::from_results(chronological(&filtered).into_iter().take(n)),
        Aggregation::Count => LogicResult::numeric(filtered.size() as f64),
        Aggregation::Exists => LogicResult::boolean(filtered.exists()),
        Aggregation::NotExists => LogicResult::boolean(!filtered.exists()),
        Aggregation::Average if filtered.is_null() => LogicResult::null(),
        Aggregation::Average => LogicResult::numeric(filtered.to_number()?),
        Aggregation::Max => extreme(&filtered, true)?,
        Aggregation::Min => extreme(&filtered, false)?,
        Aggregation::Distinct => filtered.unique(),
    })
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("LATEST"),
            Self::Earliest => f.write_str("EARLIEST"),
            Self::Last(n) => write!(f, "LAST {n}"),
            Self::First(n) => write!(f, "FIRST {n}"),
            Self::Count => f.write_str("COUNT"),
            Self::Exists => f.write_str("EXISTS"),
            Self::NotExists => f.write_str("NOTEXISTS"),
            Self::Average => f.write_str("AVERAGE"),
            Self::Max => f.write_str("MAX"),
            Self::Min => f.write_str("MIN"),
            Self::Distinct => f.write_str("DISTINCT"),
        }
    }
}

fn write_date(f: &mut fmt::Formatter<'_>, date: &DateTime<Utc>) -> fmt::Result {
    if date.time() == NaiveTime::MIN {
        write!(f, "{}", date.format("%Y-%m-%d"))
    } else {
        f.write_str(&date.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

fn write_date_constraint(f: &mut fmt::Formatter<'_>, constraint: &DateConstraint) -> fmt::Result {
    match constraint {
        DateConstraint::AsOf(d) => {
            f.write_str("AS OF ")?;
            write_date(f, d)
        }
        DateConstraint::Before(d) => {
            f.write_str("BEFORE ")?;
            write_date(f, d)
        }
        DateConstraint::After(d) => {
            f.write_str("AFTER ")?;
            write_date(f, d)
        }
        DateConstraint::Within(d) => write!(f, "WITHIN {d}"),
    }
}

fn write_value_filter(f: &mut fmt::Formatter<'_>, filter: &ValueFilter) -> fmt::Result {
    match filter {
        ValueFilter::Gt(v) => write!(f, "> {v}"),
        ValueFilter::Gte(v) => write!(f, ">= {v}"),
        ValueFilter::Lt(v) => write!(f, "< {v}"),
        ValueFilter::Lte(v) => write!(f, "<= {v}"),
        ValueFilter::Contains(id) => write!(f, "CONTAINS concept:{id}"),
        ValueFilter::Equals(value) => {
            f.write_str("= ")?;
            match value {
                ArgValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
                ArgValue::Integer(i) => write!(f, "{i}"),
                ArgValue::Number(n) => write!(f, "{n:?}"),
                ArgValue::Boolean(b) => write!(f, "{b}"),
                ArgValue::Date(d) => {
                    f.write_str("@")?;
                    write_date(f, d)
                }
                ArgValue::Concept(id) => write!(f, "concept:{id}"),
            }
        }
    }
}

impl fmt::Display for LogicCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(aggregation) = self.aggregation {
            write!(f, "{aggregation} ")?;
        }
        let condition = if self.condition.is_always() {
            String::new()
        } else {
            self.condition.to_string()
        };
        if crate::query::needs_braces(&self.token) || condition.starts_with('(') {
            write!(f, "{{{}}}", self.token)?;
        } else {
            f.write_str(&self.token)?;
        }
        if !condition.is_empty() {
            write!(f, " {condition}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregation_parsing() {
        assert_eq!("last".parse::<Aggregation>().unwrap(), Aggregation::Latest);
        assert_eq!("LAST:3".parse::<Aggregation>().unwrap(), Aggregation::Last(3));
        assert_eq!("not_exists".parse::<Aggregation>().unwrap(), Aggregation::NotExists);
        assert!("count:2".parse::<Aggregation>().is_err());
        assert!("median".parse::<Aggregation>().is_err());
    }

    #[test]
    fn test_display() {
        let criteria = LogicCriteria::new("CD4 COUNT").last(2).within(Duration::months(6.0)).gt(200.0);
        assert_eq!(criteria.to_string(), "LAST 2 CD4 COUNT WITHIN 6 months > 200");
    }

    #[test]
    fn test_plain_criteria() {
        assert!(LogicCriteria::new("AGE").is_plain());
        assert!(!LogicCriteria::new("AGE").count().is_plain());
        assert!(!LogicCriteria::new("AGE").gt(1.0).is_plain());
    }

    #[test]
    fn test_condition_groups_are_flattened() {
        let gt = Condition::Value(ValueFilter::Gt(1.0));
        let lt = Condition::Value(ValueFilter::Lt(9.0));
        let within = Condition::Date(DateConstraint::Within(Duration::days(3.0)));

        assert_eq!(Condition::all([gt.clone()]), gt);
        assert_eq!(
            Condition::all([Condition::all([gt.clone(), lt.clone()]), within.clone()]),
            Condition::All(vec![gt.clone(), lt.clone(), within])
        );
        assert_eq!(
            Condition::any([Condition::any([gt.clone(), lt.clone()]), Condition::always()]),
            Condition::Any(vec![gt, lt, Condition::always()])
        );
        assert_eq!(Condition::any([]), Condition::always().negate());
    }

    #[test]
    fn test_composed_display() {
        let low_or_high = LogicCriteria::new("CD4 COUNT")
            .gt(500.0)
            .or(LogicCriteria::new("CD4 COUNT").lt(100.0));
        assert_eq!(low_or_high.to_string(), "CD4 COUNT > 500 OR < 100");
        assert_eq!(
            low_or_high.within(Duration::months(6.0)).to_string(),
            "{CD4 COUNT} (> 500 OR < 100) WITHIN 6 months"
        );
        assert_eq!((!LogicCriteria::new("WEIGHT").gt(80.0)).to_string(), "WEIGHT NOT > 80");
    }

    #[test]
    fn test_display_braces_ambiguous_tokens() {
        assert_eq!(LogicCriteria::new("PULSE AND RHYTHM").to_string(), "{PULSE AND RHYTHM}");
        assert_eq!(LogicCriteria::new("COUNT").count().to_string(), "COUNT {COUNT}");
        assert_eq!(LogicCriteria::new("WEIGHT (KG)").exists().to_string(), "EXISTS WEIGHT (KG)");
    }

    #[test]
    fn test_huge_window_reaches_back_to_earliest_instant() {
        let index = DateTime::<Utc>::MIN_UTC + chrono::TimeDelta::days(1);
        assert_eq!(window_start(index, &Duration::years(300_000.0)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(index, &Duration::years(1e300)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(index, &Duration::days(1.0)), DateTime::<Utc>::MIN_UTC);
    }
}
