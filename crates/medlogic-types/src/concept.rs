//! Concepts and observations
//!
//! A [`Concept`] is a dictionary entry identified by its numeric id. Two
//! concepts are the same concept iff their ids match; name and class are
//! descriptive only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::result::Datatype;

/// Concept identifier
pub type ConceptId = i32;

/// Datatype declared on a concept in the dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptDatatype {
    Numeric,
    Coded,
    Text,
    Date,
    Datetime,
    Boolean,
    /// Question-less concepts such as answers or sets
    #[default]
    #[serde(rename = "n/a")]
    NotApplicable,
}

impl ConceptDatatype {
    /// Result datatype produced when reading observations of this concept
    pub fn result_datatype(self) -> Option<Datatype> {
        match self {
            Self::Numeric => Some(Datatype::Numeric),
            Self::Coded => Some(Datatype::Coded),
            Self::Text => Some(Datatype::Text),
            Self::Date | Self::Datetime => Some(Datatype::Date),
            Self::Boolean => Some(Datatype::Boolean),
            Self::NotApplicable => None,
        }
    }
}

/// Dictionary concept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concept {
    pub id: ConceptId,
    pub name: String,
    #[serde(default)]
    pub datatype: ConceptDatatype,
    /// Concept class, used to seed the rule registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

impl Concept {
    pub fn new(id: ConceptId, name: impl Into<String>, datatype: ConceptDatatype) -> Self {
        Self {
            id,
            name: name.into(),
            datatype,
            class: None,
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }
}

impl PartialEq for Concept {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Concept {}

impl Hash for Concept {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Concept {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A single recorded observation for a patient
///
/// Only the value field matching the concept's datatype is normally set.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub patient_id: crate::PatientId,
    pub concept: Concept,
    pub obs_datetime: DateTime<Utc>,
    pub value_numeric: Option<f64>,
    pub value_coded: Option<Concept>,
    pub value_datetime: Option<DateTime<Utc>>,
    pub value_text: Option<String>,
    pub value_boolean: Option<bool>,
}

impl Observation {
    /// Create an observation with no value set
    pub fn new(patient_id: crate::PatientId, concept: Concept, obs_datetime: DateTime<Utc>) -> Self {
        Self {
            patient_id,
            concept,
            obs_datetime,
            value_numeric: None,
            value_coded: None,
            value_datetime: None,
            value_text: None,
            value_boolean: None,
        }
    }

    pub fn numeric(mut self, value: f64) -> Self {
        self.value_numeric = Some(value);
        self
    }

    pub fn coded(mut self, value: Concept) -> Self {
        self.value_coded = Some(value);
        self
    }

    pub fn datetime(mut self, value: DateTime<Utc>) -> Self {
        self.value_datetime = Some(value);
        self
    }

    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.value_text = Some(value.into());
        self
    }

    pub fn boolean(mut self, value: bool) -> Self {
        self.value_boolean = Some(value);
        self
    }
}
