//! JSON data bundles
//!
//! A bundle carries a concept dictionary, patients and observations in one
//! document:
//!
//! ```json
//! {
//!   "concepts": [{"id": 5497, "name": "CD4 COUNT", "datatype": "numeric", "class": "Test"}],
//!   "patients": [{"id": 1, "birthdate": "1980-06-15", "gender": "F"}],
//!   "observations": [
//!     {"patient": 1, "concept": "CD4 COUNT", "datetime": "2024-01-10T08:00:00Z", "value": 100}
//!   ]
//! }
//! ```
//!
//! Observation values are interpreted by the concept's datatype: coded
//! values name another concept, date values are RFC 3339 or `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_types::{Cohort, Concept, ConceptDatatype, Observation, Patient, PatientId};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

use crate::dictionary::ConceptDictionary;
use crate::provider::ConceptSource;
use crate::sources::ObservationDataSource;

#[derive(Debug, Deserialize)]
struct BundleDocument {
    #[serde(default)]
    concepts: Vec<Concept>,
    #[serde(default)]
    patients: Vec<Patient>,
    #[serde(default)]
    observations: Vec<ObservationRecord>,
}

#[derive(Debug, Deserialize)]
struct ObservationRecord {
    patient: PatientId,
    concept: String,
    datetime: DateTime<Utc>,
    #[serde(default)]
    value: Value,
}

/// Clinical data loaded from a bundle
#[derive(Debug, Clone, Default)]
pub struct DataBundle {
    dictionary: ConceptDictionary,
    patients: Vec<Patient>,
    observations: Vec<Observation>,
}

impl DataBundle {
    /// Parse a bundle from JSON
    pub fn from_json(json: &str) -> EvalResult<Self> {
        let document: BundleDocument = serde_json::from_str(json)
            .map_err(|e| LogicError::configuration(format!("Invalid data bundle: {e}")))?;
        Self::resolve(document)
    }

    /// Parse a bundle from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> EvalResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LogicError::configuration(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    fn resolve(document: BundleDocument) -> EvalResult<Self> {
        let dictionary = ConceptDictionary::from_concepts(document.concepts);
        let observations = document
            .observations
            .into_iter()
            .map(|record| resolve_observation(&dictionary, record))
            .collect::<EvalResult<Vec<_>>>()?;
        debug!(
            "Loaded bundle: {} concepts, {} patients, {} observations",
            dictionary.len(),
            document.patients.len(),
            observations.len()
        );
        Ok(Self {
            dictionary,
            patients: document.patients,
            observations,
        })
    }

    pub fn dictionary(&self) -> &ConceptDictionary {
        &self.dictionary
    }

    pub fn patients(&self) -> &[Patient] {
        &self.patients
    }

    pub fn patient(&self, id: PatientId) -> Option<&Patient> {
        self.patients.iter().find(|p| p.id == id)
    }

    pub fn cohort(&self) -> Cohort {
        self.patients.iter().cloned().collect()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    /// Observation source holding every observation in the bundle
    pub fn observation_source(&self) -> ObservationDataSource {
        let source = ObservationDataSource::new();
        source.extend(self.observations.iter().cloned());
        source
    }
}

fn resolve_observation(
    dictionary: &ConceptDictionary,
    record: ObservationRecord,
) -> EvalResult<Observation> {
    let concept = dictionary
        .concept_by_name(&record.concept)
        .ok_or_else(|| LogicError::concept_not_found(record.concept.as_str()))?;
    let obs = Observation::new(record.patient, concept.clone(), record.datetime);

    let obs = match (&record.value, concept.datatype) {
        (Value::Null, _) => obs,
        (Value::Bool(b), _) => obs.boolean(*b),
        (Value::Number(n), _) => {
            let n = n
                .as_f64()
                .ok_or_else(|| LogicError::format(n.to_string(), "number"))?;
            obs.numeric(n)
        }
        (Value::String(name), ConceptDatatype::Coded) => {
            let answer = dictionary
                .concept_by_name(name)
                .ok_or_else(|| LogicError::concept_not_found(name.as_str()))?;
            obs.coded(answer)
        }
        (Value::String(text), ConceptDatatype::Date | ConceptDatatype::Datetime) => {
            obs.datetime(parse_date(text)?)
        }
        (Value::String(text), ConceptDatatype::Numeric) => {
            let n = text
                .trim()
                .parse::<f64>()
                .map_err(|_| LogicError::format(text.as_str(), "number"))?;
            obs.numeric(n)
        }
        (Value::String(text), _) => obs.text(text.as_str()),
        (other, _) => {
            return Err(LogicError::format(
                other.to_string(),
                format!("value of {}", concept.name),
            ));
        }
    };
    Ok(obs)
}

fn parse_date(text: &str) -> EvalResult<DateTime<Utc>> {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| d.and_utc())
        })
        .ok_or_else(|| LogicError::format(text, "date"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BUNDLE: &str = r#"{
        "concepts": [
            {"id": 5497, "name": "CD4 COUNT", "datatype": "numeric", "class": "Test"},
            {"id": 1284, "name": "PROBLEM ADDED", "datatype": "coded"},
            {"id": 1065, "name": "YES"},
            {"id": 1190, "name": "ART START DATE", "datatype": "date"}
        ],
        "patients": [{"id": 7, "gender": "M", "birthdate": "1975-03-02"}],
        "observations": [
            {"patient": 7, "concept": "CD4 COUNT", "datetime": "2024-01-10T08:00:00Z", "value": 350},
            {"patient": 7, "concept": "CD4 COUNT", "datetime": "2024-02-10T08:00:00Z", "value": "410"},
            {"patient": 7, "concept": "PROBLEM ADDED", "datetime": "2024-02-10T08:00:00Z", "value": "YES"},
            {"patient": 7, "concept": "ART START DATE", "datetime": "2024-02-10T08:00:00Z", "value": "2023-12-01"}
        ]
    }"#;

    #[test]
    fn test_bundle_resolves_values() {
        let bundle = DataBundle::from_json(BUNDLE).unwrap();
        assert_eq!(bundle.patients().len(), 1);
        assert_eq!(bundle.observations().len(), 4);

        let obs = bundle.observations();
        assert_eq!(obs[1].value_numeric, Some(410.0));
        assert_eq!(obs[2].value_coded.as_ref().map(|c| c.id), Some(1065));
        assert_eq!(
            obs[3].value_datetime.map(|d| d.date_naive()),
            NaiveDate::from_ymd_opt(2023, 12, 1)
        );
        assert_eq!(bundle.observation_source().count(7), 4);
    }

    #[test]
    fn test_unknown_concept_is_rejected() {
        let json = r#"{"observations": [
            {"patient": 1, "concept": "MYSTERY", "datetime": "2024-01-10T08:00:00Z", "value": 1}
        ]}"#;
        let err = DataBundle::from_json(json).unwrap_err();
        assert_eq!(err, LogicError::concept_not_found("MYSTERY"));
    }
}
