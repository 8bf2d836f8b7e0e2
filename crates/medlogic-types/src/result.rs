//! Rule evaluation results
//!
//! A [`LogicResult`] is either a single-valued leaf or an ordered list of
//! results, never both. Lists are only built through
//! [`LogicResult::from_results`], which normalizes them:
//!
//! - no elements becomes [`NULL_RESULT`]
//! - a single element becomes that element
//! - two or more elements stay a list, with nested lists flattened
//!
//! Equality and hashing are structural. Two leaves are equal when they carry
//! the same datatype tag and the same value for that tag; the originating
//! concept and result date are ignored.

use chrono::{DateTime, NaiveDate, Utc};
use log::trace;
use medlogic_diagnostics::{EvalResult, LogicError};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::concept::{Concept, Observation};
use crate::float_bits;
use crate::truth::TrueConcept;

/// Datatype tag of a result leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datatype {
    Numeric,
    Date,
    Coded,
    Text,
    Boolean,
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Numeric => "numeric",
            Self::Date => "date",
            Self::Coded => "coded",
            Self::Text => "text",
            Self::Boolean => "boolean",
        };
        write!(f, "{name}")
    }
}

/// The distinguished empty result
pub static NULL_RESULT: LogicResult = LogicResult::null();

#[derive(Debug, Clone)]
struct Leaf {
    datatype: Option<Datatype>,
    value_numeric: Option<f64>,
    value_datetime: Option<DateTime<Utc>>,
    value_coded: Option<Concept>,
    value_text: Option<String>,
    value_boolean: Option<bool>,
    concept: Option<Concept>,
    result_date: Option<DateTime<Utc>>,
}

impl Leaf {
    const EMPTY: Leaf = Leaf {
        datatype: None,
        value_numeric: None,
        value_datetime: None,
        value_coded: None,
        value_text: None,
        value_boolean: None,
        concept: None,
        result_date: None,
    };

    fn is_null(&self) -> bool {
        self.value_numeric.is_none()
            && self.value_datetime.is_none()
            && self.value_coded.is_none()
            && self.value_text.is_none()
            && self.value_boolean.is_none()
    }

    fn value_eq(&self, other: &Leaf) -> bool {
        if self.datatype != other.datatype {
            return false;
        }
        let numeric = || self.value_numeric.map(float_bits) == other.value_numeric.map(float_bits);
        let date = || self.value_datetime == other.value_datetime;
        let coded = || {
            self.value_coded.as_ref().map(|c| c.id) == other.value_coded.as_ref().map(|c| c.id)
        };
        let text = || self.value_text == other.value_text;
        let boolean = || self.value_boolean == other.value_boolean;

        match self.datatype {
            Some(Datatype::Numeric) => numeric(),
            Some(Datatype::Date) => date(),
            Some(Datatype::Coded) => coded(),
            Some(Datatype::Text) => text(),
            Some(Datatype::Boolean) => boolean(),
            None => numeric() && date() && coded() && text() && boolean(),
        }
    }

    fn hash_value<H: Hasher>(&self, state: &mut H) {
        self.datatype.hash(state);
        let coded_id = self.value_coded.as_ref().map(|c| c.id);
        match self.datatype {
            Some(Datatype::Numeric) => self.value_numeric.map(float_bits).hash(state),
            Some(Datatype::Date) => self.value_datetime.hash(state),
            Some(Datatype::Coded) => coded_id.hash(state),
            Some(Datatype::Text) => self.value_text.hash(state),
            Some(Datatype::Boolean) => self.value_boolean.hash(state),
            None => {
                self.value_numeric.map(float_bits).hash(state);
                self.value_datetime.hash(state);
                coded_id.hash(state);
                self.value_text.hash(state);
                self.value_boolean.hash(state);
            }
        }
    }

    /// Datatype of the first value field that is set
    fn inferred_datatype(&self) -> Option<Datatype> {
        if self.value_numeric.is_some() {
            Some(Datatype::Numeric)
        } else if self.value_coded.is_some() {
            Some(Datatype::Coded)
        } else if self.value_datetime.is_some() {
            Some(Datatype::Date)
        } else if self.value_boolean.is_some() {
            Some(Datatype::Boolean)
        } else if self.value_text.is_some() {
            Some(Datatype::Text)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
enum Repr {
    Leaf(Leaf),
    List(Vec<LogicResult>),
}

/// Typed result of evaluating a rule
#[derive(Debug, Clone)]
pub struct LogicResult {
    repr: Repr,
}

impl Default for LogicResult {
    fn default() -> Self {
        Self::null()
    }
}

impl LogicResult {
    // Construction

    /// Empty result; equal to [`NULL_RESULT`]
    pub const fn null() -> Self {
        Self {
            repr: Repr::Leaf(Leaf::EMPTY),
        }
    }

    fn leaf(datatype: Datatype, fill: impl FnOnce(&mut Leaf)) -> Self {
        let mut leaf = Leaf {
            datatype: Some(datatype),
            ..Leaf::EMPTY
        };
        fill(&mut leaf);
        Self {
            repr: Repr::Leaf(leaf),
        }
    }

    pub fn numeric(value: f64) -> Self {
        Self::leaf(Datatype::Numeric, |l| l.value_numeric = Some(value))
    }

    pub fn boolean(value: bool) -> Self {
        Self::leaf(Datatype::Boolean, |l| l.value_boolean = Some(value))
    }

    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::leaf(Datatype::Text, |l| l.value_text = Some(value))
    }

    pub fn coded(value: Concept) -> Self {
        Self::leaf(Datatype::Coded, |l| l.value_coded = Some(value))
    }

    pub fn datetime(value: DateTime<Utc>) -> Self {
        Self::leaf(Datatype::Date, |l| l.value_datetime = Some(value))
    }

    /// Leaf built from an observation
    ///
    /// The datatype comes from the observed concept, or from whichever value
    /// field is set when the concept declares none. The observation time
    /// becomes the result date.
    pub fn from_observation(obs: &Observation) -> Self {
        let mut leaf = Leaf {
            datatype: obs.concept.datatype.result_datatype(),
            value_numeric: obs.value_numeric,
            value_datetime: obs.value_datetime,
            value_coded: obs.value_coded.clone(),
            value_text: obs.value_text.clone(),
            value_boolean: obs.value_boolean,
            concept: Some(obs.concept.clone()),
            result_date: Some(obs.obs_datetime),
        };
        if leaf.datatype.is_none() {
            leaf.datatype = leaf.inferred_datatype();
        }
        Self {
            repr: Repr::Leaf(leaf),
        }
    }

    /// Normalized result over a sequence of observations
    pub fn from_observations<'a>(observations: impl IntoIterator<Item = &'a Observation>) -> Self {
        Self::from_results(observations.into_iter().map(Self::from_observation))
    }

    /// The single construction point for lists
    pub fn from_results(results: impl IntoIterator<Item = LogicResult>) -> Self {
        let mut flat = Vec::new();
        for result in results {
            match result.repr {
                Repr::List(items) => flat.extend(items),
                leaf @ Repr::Leaf(_) => flat.push(LogicResult { repr: leaf }),
            }
        }
        match flat.len() {
            0 => Self::null(),
            1 => flat.pop().unwrap_or_default(),
            _ => Self {
                repr: Repr::List(flat),
            },
        }
    }

    /// Attach a result date to a leaf; lists are returned unchanged
    pub fn with_result_date(mut self, date: DateTime<Utc>) -> Self {
        if let Repr::Leaf(leaf) = &mut self.repr {
            leaf.result_date = Some(date);
        }
        self
    }

    /// Attach the originating concept to a leaf; lists are returned unchanged
    pub fn with_concept(mut self, concept: Concept) -> Self {
        if let Repr::Leaf(leaf) = &mut self.repr {
            leaf.concept = Some(concept);
        }
        self
    }

    // Setters for synthetic leaves. Both have no effect on lists.

    pub fn set_value_numeric(&mut self, value: f64) {
        if let Repr::Leaf(leaf) = &mut self.repr {
            leaf.value_numeric = Some(value);
            leaf.datatype.get_or_insert(Datatype::Numeric);
        }
    }

    pub fn set_value_text(&mut self, value: impl Into<String>) {
        if let Repr::Leaf(leaf) = &mut self.repr {
            leaf.value_text = Some(value.into());
            leaf.datatype.get_or_insert(Datatype::Text);
        }
    }

    // Shape

    pub fn is_list(&self) -> bool {
        matches!(self.repr, Repr::List(_))
    }

    pub fn is_null(&self) -> bool {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.is_null(),
            Repr::List(_) => false,
        }
    }

    pub fn size(&self) -> usize {
        match &self.repr {
            Repr::Leaf(leaf) if leaf.is_null() => 0,
            Repr::Leaf(_) => 1,
            Repr::List(items) => items.len(),
        }
    }

    pub fn exists(&self) -> bool {
        match &self.repr {
            Repr::Leaf(leaf) => !leaf.is_null(),
            Repr::List(items) => items.iter().any(LogicResult::exists),
        }
    }

    /// Flattened view: a list's elements, a non-null leaf as a one element
    /// slice, nothing for null
    pub fn result_list(&self) -> &[LogicResult] {
        match &self.repr {
            Repr::List(items) => items,
            Repr::Leaf(leaf) if leaf.is_null() => &[],
            Repr::Leaf(_) => std::slice::from_ref(self),
        }
    }

    /// Element at `index`, or [`NULL_RESULT`] when out of range
    pub fn get(&self, index: usize) -> &LogicResult {
        self.result_list().get(index).unwrap_or(&NULL_RESULT)
    }

    pub fn index_of(&self, needle: &LogicResult) -> Option<usize> {
        self.result_list().iter().position(|r| r == needle)
    }

    pub fn contains_result(&self, needle: &LogicResult) -> bool {
        self.index_of(needle).is_some()
    }

    // Accessors

    /// Datatype of a leaf, or of the first element of a list
    pub fn datatype(&self) -> Option<Datatype> {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.datatype,
            Repr::List(items) => items.first().and_then(LogicResult::datatype),
        }
    }

    /// Result date of a leaf, or of the first element of a list
    pub fn result_date(&self) -> Option<DateTime<Utc>> {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.result_date,
            Repr::List(items) => items.first().and_then(LogicResult::result_date),
        }
    }

    /// Concept the result was read for
    pub fn concept(&self) -> Option<&Concept> {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.concept.as_ref(),
            Repr::List(items) => items.first().and_then(LogicResult::concept),
        }
    }

    pub fn value_numeric(&self) -> Option<f64> {
        self.as_leaf().and_then(|l| l.value_numeric)
    }

    pub fn value_text(&self) -> Option<&str> {
        self.as_leaf().and_then(|l| l.value_text.as_deref())
    }

    pub fn value_boolean(&self) -> Option<bool> {
        self.as_leaf().and_then(|l| l.value_boolean)
    }

    fn as_leaf(&self) -> Option<&Leaf> {
        match &self.repr {
            Repr::Leaf(leaf) => Some(leaf),
            Repr::List(_) => None,
        }
    }

    // Conversions

    /// Truth value of the result
    ///
    /// Coded leaves are true when they hold the concept resolved by `truth`.
    /// Lists are the conjunction of their elements, evaluated left to right
    /// and stopping at the first false element.
    pub fn to_boolean(&self, truth: &TrueConcept) -> bool {
        match &self.repr {
            Repr::Leaf(leaf) => match leaf.datatype {
                None | Some(Datatype::Boolean) => leaf.value_boolean.unwrap_or(false),
                Some(Datatype::Numeric) => leaf.value_numeric.is_some_and(|v| v != 0.0),
                Some(Datatype::Coded) => leaf
                    .value_coded
                    .as_ref()
                    .is_some_and(|c| truth.matches(c)),
                Some(Datatype::Date) => leaf.value_datetime.is_some(),
                Some(Datatype::Text) => false,
            },
            Repr::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    let value = item.to_boolean(truth);
                    trace!("to_boolean element {i}: {value}");
                    if !value {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Numeric value of the result; lists yield the arithmetic mean
    pub fn to_number(&self) -> EvalResult<f64> {
        match &self.repr {
            Repr::Leaf(leaf) => match leaf.datatype {
                None | Some(Datatype::Numeric) => Ok(leaf.value_numeric.unwrap_or(0.0)),
                Some(Datatype::Boolean) => Ok(if leaf.value_boolean.unwrap_or(false) {
                    1.0
                } else {
                    0.0
                }),
                Some(Datatype::Date) => Ok(leaf
                    .value_datetime
                    .map_or(0.0, |d| d.timestamp_millis() as f64)),
                Some(Datatype::Text) => match &leaf.value_text {
                    Some(text) => text
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| LogicError::format(text.as_str(), "number")),
                    None => Ok(0.0),
                },
                Some(Datatype::Coded) => Ok(0.0),
            },
            Repr::List(items) => {
                if items.is_empty() {
                    return Ok(0.0);
                }
                let mut sum = 0.0;
                for item in items {
                    sum += item.to_number()?;
                }
                Ok(sum / items.len() as f64)
            }
        }
    }

    /// Coded value of a leaf, or of the first element of a list
    pub fn to_concept(&self) -> Option<&Concept> {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.value_coded.as_ref(),
            Repr::List(items) => items.first().and_then(LogicResult::to_concept),
        }
    }

    /// Date value; text leaves are parsed as RFC 3339 or `YYYY-MM-DD`
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.value_datetime.or_else(|| {
                let text = leaf.value_text.as_deref()?.trim();
                DateTime::parse_from_rfc3339(text)
                    .map(|d| d.with_timezone(&Utc))
                    .ok()
                    .or_else(|| {
                        NaiveDate::parse_from_str(text, "%Y-%m-%d")
                            .ok()
                            .and_then(|d| d.and_hms_opt(0, 0, 0))
                            .map(|d| d.and_utc())
                    })
            }),
            Repr::List(items) => items.first().and_then(LogicResult::to_datetime),
        }
    }

    // List operations

    /// Distinct elements, keeping the first occurrence of each in order
    pub fn unique(&self) -> LogicResult {
        match &self.repr {
            Repr::Leaf(_) => self.clone(),
            Repr::List(items) => {
                let mut seen = HashSet::new();
                let kept: Vec<LogicResult> = items
                    .iter()
                    .filter(|item| seen.insert(*item))
                    .cloned()
                    .collect();
                Self::from_results(kept)
            }
        }
    }

    pub fn contains(&self, concept: &Concept) -> bool {
        self.contains_concept(concept.id)
    }

    /// Whether any coded value in the result has the given concept id
    pub fn contains_concept(&self, concept_id: crate::ConceptId) -> bool {
        match &self.repr {
            Repr::Leaf(leaf) => leaf.value_coded.as_ref().is_some_and(|c| c.id == concept_id),
            Repr::List(items) => items.iter().any(|item| item.contains_concept(concept_id)),
        }
    }

    /// Element with the earliest result date
    ///
    /// Undated elements never beat dated ones; when nothing is dated the
    /// first element is returned.
    pub fn earliest(&self) -> &LogicResult {
        let items = self.result_list();
        let dated = items
            .iter()
            .filter_map(|r| r.result_date().map(|d| (d, r)))
            .fold(None::<(DateTime<Utc>, &LogicResult)>, |best, (d, r)| match best {
                Some((bd, _)) if bd <= d => best,
                _ => Some((d, r)),
            });
        dated
            .map(|(_, r)| r)
            .or_else(|| items.first())
            .unwrap_or(&NULL_RESULT)
    }

    /// Element with the latest result date
    ///
    /// Ties go to the element appearing later; when nothing is dated the
    /// last element is returned.
    pub fn latest(&self) -> &LogicResult {
        let items = self.result_list();
        let dated = items
            .iter()
            .filter_map(|r| r.result_date().map(|d| (d, r)))
            .fold(None::<(DateTime<Utc>, &LogicResult)>, |best, (d, r)| match best {
                Some((bd, _)) if bd > d => best,
                _ => Some((d, r)),
            });
        dated
            .map(|(_, r)| r)
            .or_else(|| items.last())
            .unwrap_or(&NULL_RESULT)
    }

    /// Elements whose numeric value is strictly greater than `value`
    ///
    /// Elements that cannot be read as numbers are dropped.
    pub fn gt(&self, value: f64) -> LogicResult {
        self.filter(|r| r.to_number().is_ok_and(|n| n > value))
    }

    /// Elements of the flattened view matching `predicate`, normalized
    pub fn filter(&self, predicate: impl Fn(&LogicResult) -> bool) -> LogicResult {
        Self::from_results(self.result_list().iter().filter(|r| predicate(r)).cloned())
    }
}

impl PartialEq for LogicResult {
    fn eq(&self, other: &Self) -> bool {
        match (&self.repr, &other.repr) {
            (Repr::Leaf(a), Repr::Leaf(b)) => a.value_eq(b),
            (Repr::List(a), Repr::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for LogicResult {}

impl Hash for LogicResult {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.repr {
            Repr::Leaf(leaf) => {
                0u8.hash(state);
                leaf.hash_value(state);
            }
            Repr::List(items) => {
                1u8.hash(state);
                items.hash(state);
            }
        }
    }
}

impl fmt::Display for LogicResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Repr::Leaf(leaf) => match leaf.datatype.or_else(|| leaf.inferred_datatype()) {
                Some(Datatype::Numeric) => match leaf.value_numeric {
                    Some(v) => write!(f, "{v}"),
                    None => Ok(()),
                },
                Some(Datatype::Date) => match leaf.value_datetime {
                    Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                    None => Ok(()),
                },
                Some(Datatype::Coded) => match &leaf.value_coded {
                    Some(c) => write!(f, "{}", c.name),
                    None => Ok(()),
                },
                Some(Datatype::Text) => write!(f, "{}", leaf.value_text.as_deref().unwrap_or("")),
                Some(Datatype::Boolean) => match leaf.value_boolean {
                    Some(b) => write!(f, "{b}"),
                    None => Ok(()),
                },
                None => Ok(()),
            },
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ValueRepr<'a> {
    Number(f64),
    Date(String),
    Concept { id: crate::ConceptId, name: &'a str },
    Text(&'a str),
    Boolean(bool),
    Null,
}

impl Serialize for LogicResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.repr {
            Repr::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Repr::Leaf(leaf) => {
                let value = match leaf.datatype.or_else(|| leaf.inferred_datatype()) {
                    Some(Datatype::Numeric) => leaf.value_numeric.map(ValueRepr::Number),
                    Some(Datatype::Date) => leaf
                        .value_datetime
                        .map(|d| ValueRepr::Date(d.to_rfc3339())),
                    Some(Datatype::Coded) => leaf.value_coded.as_ref().map(|c| ValueRepr::Concept {
                        id: c.id,
                        name: &c.name,
                    }),
                    Some(Datatype::Text) => leaf.value_text.as_deref().map(ValueRepr::Text),
                    Some(Datatype::Boolean) => leaf.value_boolean.map(ValueRepr::Boolean),
                    None => None,
                }
                .unwrap_or(ValueRepr::Null);

                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("datatype", &leaf.datatype)?;
                map.serialize_entry("value", &value)?;
                if let Some(concept) = &leaf.concept {
                    map.serialize_entry("concept", &concept.name)?;
                }
                if let Some(date) = &leaf.result_date {
                    map.serialize_entry("resultDate", &date.to_rfc3339())?;
                }
                map.end()
            }
        }
    }
}

impl From<f64> for LogicResult {
    fn from(value: f64) -> Self {
        Self::numeric(value)
    }
}

impl From<bool> for LogicResult {
    fn from(value: bool) -> Self {
        Self::boolean(value)
    }
}

impl From<&str> for LogicResult {
    fn from(value: &str) -> Self {
        Self::text(value)
    }
}

impl From<String> for LogicResult {
    fn from(value: String) -> Self {
        Self::text(value)
    }
}

impl From<Concept> for LogicResult {
    fn from(value: Concept) -> Self {
        Self::coded(value)
    }
}

impl From<DateTime<Utc>> for LogicResult {
    fn from(value: DateTime<Utc>) -> Self {
        Self::datetime(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_result_shape() {
        assert!(NULL_RESULT.is_null());
        assert!(!NULL_RESULT.exists());
        assert_eq!(NULL_RESULT.size(), 0);
        assert!(NULL_RESULT.result_list().is_empty());
        assert_eq!(LogicResult::default(), NULL_RESULT);
    }

    #[test]
    fn test_setters_on_null_clone() {
        let mut synthetic = NULL_RESULT.clone();
        synthetic.set_value_numeric(4.5);
        assert_eq!(synthetic, LogicResult::numeric(4.5));
        assert!(NULL_RESULT.is_null());
    }

    #[test]
    fn test_setters_ignore_lists() {
        let mut list = LogicResult::from_results([LogicResult::numeric(1.0), LogicResult::numeric(2.0)]);
        list.set_value_text("x");
        assert_eq!(list.size(), 2);
        assert_eq!(list.value_text(), None);
    }

    #[test]
    fn test_display_joins_members() {
        let list = LogicResult::from_results([
            LogicResult::numeric(1.5),
            LogicResult::text("abc"),
            LogicResult::boolean(true),
        ]);
        assert_eq!(list.to_string(), "1.5,abc,true");
    }

    #[test]
    fn test_serialize_leaf() {
        let json = serde_json::to_value(LogicResult::numeric(200.0)).unwrap();
        assert_eq!(json["datatype"], "numeric");
        assert_eq!(json["value"], 200.0);
    }
}
