//! Patients and cohorts

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Opaque patient identifier
pub type PatientId = i64;

/// Demographic view of a patient
///
/// Rules only ever see these fields; everything else about a patient is read
/// through a data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    #[serde(default)]
    pub birthdate: Option<NaiveDate>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub death_date: Option<NaiveDate>,
}

impl Patient {
    pub fn new(id: PatientId) -> Self {
        Self {
            id,
            birthdate: None,
            gender: None,
            dead: false,
            death_date: None,
        }
    }

    pub fn with_birthdate(mut self, birthdate: NaiveDate) -> Self {
        self.birthdate = Some(birthdate);
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    /// Mark the patient as deceased, optionally with a date of death
    pub fn deceased(mut self, death_date: Option<NaiveDate>) -> Self {
        self.dead = true;
        self.death_date = death_date;
        self
    }

    /// Age in whole years on the given date
    ///
    /// A deceased patient stops ageing at the date of death. Returns `None`
    /// when the birthdate is unknown or lies after `on`.
    pub fn age_on(&self, on: NaiveDate) -> Option<u32> {
        let birthdate = self.birthdate?;
        let on = match self.death_date {
            Some(death) if self.dead && death < on => death,
            _ => on,
        };
        if on < birthdate {
            return None;
        }
        let mut years = on.year() - birthdate.year();
        if (on.month(), on.day()) < (birthdate.month(), birthdate.day()) {
            years -= 1;
        }
        u32::try_from(years).ok()
    }
}

/// Ordered set of patients evaluated together
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    members: Vec<Patient>,
}

impl Cohort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member; a patient already in the cohort is ignored
    pub fn add_member(&mut self, patient: Patient) {
        if !self.contains(patient.id) {
            self.members.push(patient);
        }
    }

    pub fn contains(&self, id: PatientId) -> bool {
        self.members.iter().any(|p| p.id == id)
    }

    pub fn members(&self) -> &[Patient] {
        &self.members
    }

    pub fn member_ids(&self) -> Vec<PatientId> {
        self.members.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Patient> {
        self.members.iter()
    }
}

impl FromIterator<Patient> for Cohort {
    fn from_iter<I: IntoIterator<Item = Patient>>(iter: I) -> Self {
        let mut cohort = Cohort::new();
        for patient in iter {
            cohort.add_member(patient);
        }
        cohort
    }
}
