//! CLI functionality for the medlogic tool
//!
//! - `eval`: evaluate tokens for one patient or a whole data bundle
//! - `tokens`: list and search tokens and tags
//! - `rule`: describe the rule behind a token

pub mod eval;
pub mod output;
pub mod session;
pub mod tokens;
