//! In-memory data sources
//!
//! - [`ObservationDataSource`] (`obs`): observations keyed by concept name
//! - [`PersonDataSource`] (`person`): demographic attributes of the patient
//! - [`NoOpDataSource`]: always answers with a null result

use chrono::TimeDelta;
use log::trace;
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_types::{LogicResult, Observation, PatientId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::provider::{LogicDataSource, ReadRequest};

/// Observation store
///
/// Readings for a key are returned oldest first.
pub struct ObservationDataSource {
    name: String,
    ttl: TimeDelta,
    observations: RwLock<HashMap<PatientId, Vec<Observation>>>,
}

impl ObservationDataSource {
    pub const NAME: &'static str = "obs";

    pub fn new() -> Self {
        Self {
            name: Self::NAME.to_string(),
            ttl: TimeDelta::minutes(30),
            observations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }

    /// Record an observation, keeping the patient's list in time order
    pub fn add(&self, observation: Observation) {
        let mut store = self.observations.write();
        let list = store.entry(observation.patient_id).or_default();
        let at = list.partition_point(|o| o.obs_datetime <= observation.obs_datetime);
        list.insert(at, observation);
    }

    pub fn extend(&self, observations: impl IntoIterator<Item = Observation>) {
        for observation in observations {
            self.add(observation);
        }
    }

    /// Number of observations held for a patient
    pub fn count(&self, patient_id: PatientId) -> usize {
        self.observations
            .read()
            .get(&patient_id)
            .map_or(0, Vec::len)
    }
}

impl Default for ObservationDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicDataSource for ObservationDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, request: &ReadRequest<'_>) -> EvalResult<LogicResult> {
        let readings = {
            let store = self.observations.read();
            let matching = store
                .get(&request.patient.id)
                .into_iter()
                .flatten()
                .filter(|o| o.concept.name == request.key);
            LogicResult::from_observations(matching)
        };
        trace!(
            "{}: read {} for patient {} -> {} value(s)",
            self.name,
            request.key,
            request.patient.id,
            readings.size()
        );
        request.narrow(readings)
    }

    fn default_ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn keys(&self) -> Vec<String> {
        let store = self.observations.read();
        let names: BTreeSet<&str> = store
            .values()
            .flatten()
            .map(|o| o.concept.name.as_str())
            .collect();
        names.into_iter().map(str::to_string).collect()
    }
}

/// Demographic attributes read straight from the patient
pub struct PersonDataSource {
    ttl: TimeDelta,
}

impl PersonDataSource {
    pub const NAME: &'static str = "person";

    pub const KEYS: [&'static str; 4] = ["birthdate", "gender", "dead", "death_date"];

    pub fn new() -> Self {
        Self {
            ttl: TimeDelta::hours(4),
        }
    }

    pub fn with_ttl(mut self, ttl: TimeDelta) -> Self {
        self.ttl = ttl;
        self
    }
}

impl Default for PersonDataSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogicDataSource for PersonDataSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn read(&self, request: &ReadRequest<'_>) -> EvalResult<LogicResult> {
        let patient = request.patient;
        let midnight = |d: chrono::NaiveDate| d.and_hms_opt(0, 0, 0).map(|t| t.and_utc());
        let value = match request.key {
            "birthdate" => patient
                .birthdate
                .and_then(midnight)
                .map_or_else(LogicResult::null, LogicResult::datetime),
            "gender" => patient
                .gender
                .as_deref()
                .map_or_else(LogicResult::null, |g| LogicResult::text(g)),
            "dead" => LogicResult::boolean(patient.dead),
            "death_date" => patient
                .death_date
                .and_then(midnight)
                .map_or_else(LogicResult::null, LogicResult::datetime),
            other => {
                return Err(LogicError::data_source(
                    Self::NAME,
                    format!("unknown key '{other}'"),
                ));
            }
        };
        trace!("person: read {} for patient {}", request.key, patient.id);
        request.narrow(value)
    }

    fn default_ttl(&self) -> TimeDelta {
        self.ttl
    }

    fn keys(&self) -> Vec<String> {
        Self::KEYS.iter().map(|k| k.to_string()).collect()
    }
}

/// Data source with no data
pub struct NoOpDataSource {
    name: String,
}

impl NoOpDataSource {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NoOpDataSource {
    fn default() -> Self {
        Self::new("noop")
    }
}

impl LogicDataSource for NoOpDataSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read(&self, _request: &ReadRequest<'_>) -> EvalResult<LogicResult> {
        Ok(LogicResult::null())
    }

    fn default_ttl(&self) -> TimeDelta {
        TimeDelta::zero()
    }

    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}
