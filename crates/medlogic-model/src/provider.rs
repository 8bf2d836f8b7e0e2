//! Collaborator traits for rule evaluation

use chrono::{DateTime, TimeDelta, Utc};
use medlogic_diagnostics::EvalResult;
use medlogic_types::{Concept, ConceptId, LogicCriteria, LogicResult, Patient};

/// A single read against a data source
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest<'a> {
    /// Patient the read is for
    pub patient: &'a Patient,
    /// Key within the data source (a concept name, a person attribute, ...)
    pub key: &'a str,
    /// Optional narrowing and aggregation of the readings
    pub criteria: Option<&'a LogicCriteria>,
    /// Instant relative date constraints are measured from
    pub index_date: DateTime<Utc>,
}

impl<'a> ReadRequest<'a> {
    pub fn new(patient: &'a Patient, key: &'a str, index_date: DateTime<Utc>) -> Self {
        Self {
            patient,
            key,
            criteria: None,
            index_date,
        }
    }

    pub fn with_criteria(mut self, criteria: Option<&'a LogicCriteria>) -> Self {
        self.criteria = criteria;
        self
    }

    /// Apply the request's criteria, if any, to raw readings
    pub fn narrow(&self, readings: LogicResult) -> EvalResult<LogicResult> {
        match self.criteria {
            Some(criteria) => criteria.apply(&readings, self.index_date),
            None => Ok(readings),
        }
    }
}

/// Named source of patient data
///
/// Missing data is reported as a null result, never as an error. Errors are
/// reserved for failures of the underlying storage.
pub trait LogicDataSource: Send + Sync {
    /// Name the source is registered under; part of cache keys
    fn name(&self) -> &str;

    /// Read a key for a patient
    fn read(&self, request: &ReadRequest<'_>) -> EvalResult<LogicResult>;

    /// How long results read from this source may be cached
    fn default_ttl(&self) -> TimeDelta;

    /// Keys this source can currently answer
    fn keys(&self) -> Vec<String>;

    fn has_key(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }
}

impl std::fmt::Debug for dyn LogicDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicDataSource")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Concept dictionary lookups
pub trait ConceptSource: Send + Sync {
    fn concept_by_name(&self, name: &str) -> Option<Concept>;

    fn concept_by_id(&self, id: ConceptId) -> Option<Concept>;

    /// Concepts of a class, in dictionary order
    fn concepts_by_class(&self, class: &str) -> EvalResult<Vec<Concept>>;
}
