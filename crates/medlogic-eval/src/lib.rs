//! Rule evaluation for the medical logic engine
//!
//! This crate turns tokens into results for a patient:
//!
//! - [`RuleRegistry`]: tokens to rules, with tags and rule factories
//! - [`Rule`]: the evaluation contract, implemented by concept, reference
//!   built-in demographic rules and derived rules such as [`BmiRule`]
//! - [`LogicCache`]: single-flight memoization of rule results and data
//!   source reads under expiring [`LogicCacheKey`]s
//! - [`LogicService`]: the facade callers use
//!
//! # Example
//!
//! ```ignore
//! use medlogic_eval::LogicService;
//! use medlogic_model::DataBundle;
//! use std::sync::Arc;
//!
//! let bundle = DataBundle::from_file("patients.json")?;
//! let service = LogicService::builder()
//!     .concepts(Arc::new(bundle.dictionary().clone()))
//!     .data_source(Arc::new(bundle.observation_source()))
//!     .build()?;
//!
//! let patient = bundle.patient(1).unwrap();
//! let cd4 = service.eval(patient, "CD4 COUNT")?;
//! println!("{cd4}");
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod registry;
pub mod rule;
pub mod rules;
pub mod service;

pub use cache::{CacheStats, Clock, KeyKind, LogicCache, LogicCacheKey, ManualClock, SystemClock};
pub use config::LogicConfig;
pub use context::LogicContext;
pub use medlogic_diagnostics::{EvalResult, LogicError};
pub use registry::{DEMOGRAPHICS_TAG, RegistrySeed, RuleFactory, RuleRegistry};
pub use rule::{Rule, RuleParameterInfo, RuleRef};
pub use rules::{BmiRule, BuiltinRule, ConceptRule, REFERENCE_PREFIX, ReferenceRule};
pub use service::{CohortResult, EvalFailure, LogicService, LogicServiceBuilder, PatientResults};
