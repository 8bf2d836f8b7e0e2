//! Clinical rule evaluation for Rust
//!
//! This crate bundles the medlogic workspace:
//! - [`types`]: the result value model, concepts, patients and criteria
//! - [`model`]: data source and concept dictionary contracts with in-memory
//!   implementations
//! - [`eval`]: the rule registry, the evaluation cache and [`LogicService`]
//! - [`diagnostics`]: error codes and [`LogicError`]
//!
//! # Example
//!
//! ```ignore
//! use medlogic::{LogicService, model::DataBundle};
//! use std::sync::Arc;
//!
//! let bundle = DataBundle::from_file("patients.json")?;
//! let service = LogicService::builder()
//!     .concepts(Arc::new(bundle.dictionary().clone()))
//!     .data_source(Arc::new(bundle.observation_source()))
//!     .build()?;
//!
//! let outcome = service.eval_cohort(&bundle.cohort(), &["CD4 COUNT", "AGE"], &Default::default())?;
//! ```

pub use medlogic_diagnostics as diagnostics;
pub use medlogic_eval as eval;
pub use medlogic_model as model;
pub use medlogic_types as types;

pub use medlogic_diagnostics::{EvalResult, LogicError};
pub use medlogic_eval::{LogicConfig, LogicService};
pub use medlogic_types::{LogicCriteria, LogicResult, Patient, RuleArgs};

#[cfg(feature = "cli")]
pub mod cli;
