//! Logic error types

use crate::{
    ErrorCode, LOG0001, LOG0002, LOG0003, LOG0100, LOG0101, LOG0200, LOG0300, LOG0301, LOG0302,
    LOG0400, LOG0401,
};
use thiserror::Error;

/// Errors raised by the rule registry, rules, results and data sources
///
/// Missing clinical data is never reported through this type: absent
/// observations surface as a null result instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LogicError {
    /// Requested token is not registered
    #[error("Token not found: {token}")]
    TokenNotFound { token: String },

    /// Token is already registered
    #[error("Duplicate token: {token}")]
    DuplicateToken { token: String },

    /// Token is empty or malformed
    #[error("Invalid token '{token}': {message}")]
    InvalidToken { token: String, message: String },

    /// Rule arguments are structurally invalid
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },

    /// A rule could not be constructed from its configuration
    #[error("Cannot construct rule for '{token}': {message}")]
    RuleConstruction { token: String, message: String },

    /// Literal could not be parsed
    #[error("Cannot parse '{value}' as {target}")]
    Format { value: String, target: String },

    /// No data source registered under the name
    #[error("Data source not found: {name}")]
    DataSourceNotFound { name: String },

    /// Underlying storage failed while reading
    #[error("Data source '{source_name}' failed: {message}")]
    DataSource { source_name: String, message: String },

    /// Concept is unknown to the concept dictionary
    #[error("Concept not found: {name}")]
    ConceptNotFound { name: String },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Internal error (should not happen)
    #[error("Internal logic error: {message}")]
    Internal { message: String },
}

impl LogicError {
    /// Create a token not found error
    pub fn token_not_found(token: impl Into<String>) -> Self {
        Self::TokenNotFound {
            token: token.into(),
        }
    }

    /// Create a duplicate token error
    pub fn duplicate_token(token: impl Into<String>) -> Self {
        Self::DuplicateToken {
            token: token.into(),
        }
    }

    /// Create an invalid token error
    pub fn invalid_token(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidToken {
            token: token.into(),
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a rule construction error
    pub fn rule_construction(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RuleConstruction {
            token: token.into(),
            message: message.into(),
        }
    }

    /// Create a format error
    pub fn format(value: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Format {
            value: value.into(),
            target: target.into(),
        }
    }

    /// Create a data source not found error
    pub fn data_source_not_found(name: impl Into<String>) -> Self {
        Self::DataSourceNotFound { name: name.into() }
    }

    /// Create a data source failure
    pub fn data_source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataSource {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a concept not found error
    pub fn concept_not_found(name: impl Into<String>) -> Self {
        Self::ConceptNotFound { name: name.into() }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TokenNotFound { .. } => LOG0001,
            Self::DuplicateToken { .. } => LOG0002,
            Self::InvalidToken { .. } => LOG0003,
            Self::InvalidArgument { .. } => LOG0100,
            Self::RuleConstruction { .. } => LOG0101,
            Self::Format { .. } => LOG0200,
            Self::DataSourceNotFound { .. } => LOG0300,
            Self::DataSource { .. } => LOG0301,
            Self::ConceptNotFound { .. } => LOG0302,
            Self::Internal { .. } => LOG0400,
            Self::Configuration { .. } => LOG0401,
        }
    }

    /// Whether the error was caused by the caller's input rather than a system fault
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TokenNotFound { .. }
                | Self::DuplicateToken { .. }
                | Self::InvalidToken { .. }
                | Self::InvalidArgument { .. }
                | Self::Format { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LogicError::token_not_found("AGE").code(), LOG0001);
        assert_eq!(LogicError::data_source("obs", "down").code(), LOG0301);
        assert!(LogicError::data_source("obs", "down").code().is_data_error());
    }

    #[test]
    fn test_error_display() {
        let err = LogicError::invalid_token("%%person", "missing '.' separator");
        assert_eq!(
            err.to_string(),
            "Invalid token '%%person': missing '.' separator"
        );
    }

    #[test]
    fn test_validation_classification() {
        assert!(LogicError::duplicate_token("AGE").is_validation());
        assert!(LogicError::format("abc", "number").is_validation());
        assert!(!LogicError::data_source("obs", "timeout").is_validation());
    }
}
