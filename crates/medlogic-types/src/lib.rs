//! Clinical logic types
//!
//! This crate defines the values that flow through the logic engine:
//! - [`LogicResult`], the typed result of evaluating a rule
//! - concepts, observations and patients
//! - evaluation criteria with their text form, durations and rule arguments
//! - the lazily resolved "true" concept used by boolean coercion

pub mod args;
pub mod concept;
pub mod criteria;
pub mod duration;
pub mod patient;
pub mod query;
pub mod result;
pub mod truth;

pub use args::{ArgValue, RuleArgs};
pub use concept::{Concept, ConceptDatatype, ConceptId, Observation};
pub use criteria::{Aggregation, Condition, DateConstraint, LogicCriteria, ValueFilter};
pub use duration::{Duration, DurationUnit};
pub use patient::{Cohort, Patient, PatientId};
pub use query::parse_criteria;
pub use result::{Datatype, LogicResult, NULL_RESULT};
pub use truth::{ConceptResolver, TrueConcept};

/// Bit pattern used to compare and hash floats
///
/// Zero and every NaN collapse to a single pattern each so that equality
/// stays reflexive and consistent with hashing.
pub(crate) fn float_bits(value: f64) -> u64 {
    if value == 0.0 {
        0
    } else if value.is_nan() {
        f64::NAN.to_bits()
    } else {
        value.to_bits()
    }
}
