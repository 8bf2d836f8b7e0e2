//! Logic error codes following a structured numbering system
//!
//! Error code ranges:
//! - LOG0001-LOG0099: Registry errors (tokens, tags)
//! - LOG0100-LOG0199: Rule errors (arguments, construction)
//! - LOG0200-LOG0299: Result errors (coercion, formatting)
//! - LOG0300-LOG0399: Data source and concept dictionary errors
//! - LOG0400-LOG0499: System errors (I/O, configuration)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Error code identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode(u16);

impl ErrorCode {
    /// Create a new error code
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Get the numeric code
    pub const fn code(&self) -> u16 {
        self.0
    }

    /// Get error information for this code
    pub fn info(&self) -> &'static ErrorInfo {
        ERROR_INFO.get(&self.0).unwrap_or(&UNKNOWN_ERROR)
    }

    /// Check if this is a registry error (0001-0099)
    pub const fn is_registry_error(&self) -> bool {
        self.0 >= 1 && self.0 < 100
    }

    /// Check if this is a rule error (0100-0199)
    pub const fn is_rule_error(&self) -> bool {
        self.0 >= 100 && self.0 < 200
    }

    /// Check if this is a result error (0200-0299)
    pub const fn is_result_error(&self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Check if this is a data source error (0300-0399)
    pub const fn is_data_error(&self) -> bool {
        self.0 >= 300 && self.0 < 400
    }

    /// Check if this is a system error (0400-0499)
    pub const fn is_system_error(&self) -> bool {
        self.0 >= 400 && self.0 < 500
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOG{:04}", self.0)
    }
}

/// Information about an error code
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Short description of the error
    pub description: &'static str,
    /// Detailed help text
    pub help: Option<&'static str>,
}

impl ErrorInfo {
    const fn new(description: &'static str) -> Self {
        Self {
            description,
            help: None,
        }
    }

    const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

static UNKNOWN_ERROR: ErrorInfo = ErrorInfo::new("Unknown error");

static ERROR_INFO: LazyLock<HashMap<u16, ErrorInfo>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Registry errors (0001-0099)
    map.insert(1, ErrorInfo::new("Token not found")
        .with_help("Register the token with add_rule or add_token before evaluating it"));
    map.insert(2, ErrorInfo::new("Duplicate token")
        .with_help("Use update_rule to replace an existing registration"));
    map.insert(3, ErrorInfo::new("Invalid token")
        .with_help("Tokens must be non-empty; reference tokens use the form %%source.key"));

    // Rule errors (0100-0199)
    map.insert(100, ErrorInfo::new("Invalid rule argument"));
    map.insert(101, ErrorInfo::new("Rule construction failed"));

    // Result errors (0200-0299)
    map.insert(200, ErrorInfo::new("Invalid number format"));

    // Data errors (0300-0399)
    map.insert(300, ErrorInfo::new("Data source not found"));
    map.insert(301, ErrorInfo::new("Data source read failed"));
    map.insert(302, ErrorInfo::new("Concept not found"));

    // System errors (0400-0499)
    map.insert(400, ErrorInfo::new("Internal error"));
    map.insert(401, ErrorInfo::new("Configuration error"));

    map
});

// Registry errors
pub const LOG0001: ErrorCode = ErrorCode::new(1);
pub const LOG0002: ErrorCode = ErrorCode::new(2);
pub const LOG0003: ErrorCode = ErrorCode::new(3);

// Rule errors
pub const LOG0100: ErrorCode = ErrorCode::new(100);
pub const LOG0101: ErrorCode = ErrorCode::new(101);

// Result errors
pub const LOG0200: ErrorCode = ErrorCode::new(200);

// Data errors
pub const LOG0300: ErrorCode = ErrorCode::new(300);
pub const LOG0301: ErrorCode = ErrorCode::new(301);
pub const LOG0302: ErrorCode = ErrorCode::new(302);

// System errors
pub const LOG0400: ErrorCode = ErrorCode::new(400);
pub const LOG0401: ErrorCode = ErrorCode::new(401);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_display() {
        assert_eq!(LOG0001.to_string(), "LOG0001");
        assert_eq!(LOG0300.to_string(), "LOG0300");
    }

    #[test]
    fn test_error_categories() {
        assert!(LOG0001.is_registry_error());
        assert!(!LOG0001.is_rule_error());

        assert!(LOG0100.is_rule_error());
        assert!(LOG0200.is_result_error());
        assert!(LOG0300.is_data_error());
        assert!(LOG0400.is_system_error());
    }

    #[test]
    fn test_error_info() {
        assert_eq!(LOG0001.info().description, "Token not found");
        assert!(LOG0002.info().help.is_some());
        assert_eq!(ErrorCode::new(999).info().description, "Unknown error");
    }
}
