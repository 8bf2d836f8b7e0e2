//! Clinical logic diagnostics and error handling
//!
//! This crate provides the error infrastructure shared by every layer of the
//! logic engine: stable error codes, the [`LogicError`] enum and the
//! [`EvalResult`] alias used throughout the workspace.

mod error;
mod error_code;

pub use error::*;
pub use error_code::*;

/// Result type for logic operations
pub type EvalResult<T> = std::result::Result<T, LogicError>;
