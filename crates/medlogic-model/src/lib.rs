//! Clinical data model abstraction
//!
//! This crate provides:
//! - Data source and concept dictionary traits
//! - In-memory data sources for observations and demographics
//! - An in-memory concept dictionary
//! - JSON data bundle loading

pub mod bundle;
pub mod dictionary;
pub mod provider;
pub mod sources;

pub use bundle::DataBundle;
pub use dictionary::ConceptDictionary;
pub use provider::{ConceptSource, LogicDataSource, ReadRequest};
pub use sources::{NoOpDataSource, ObservationDataSource, PersonDataSource};
