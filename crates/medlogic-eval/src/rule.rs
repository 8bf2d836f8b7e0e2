//! The rule contract

use chrono::TimeDelta;
use medlogic_diagnostics::{EvalResult, LogicError};
use medlogic_types::{Datatype, LogicResult, Patient, RuleArgs};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::context::LogicContext;

/// Shared handle to a registered rule
pub type RuleRef = Arc<dyn Rule>;

/// Declared rule parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleParameterInfo {
    pub name: String,
    pub datatype: Datatype,
    pub required: bool,
}

impl RuleParameterInfo {
    pub fn required(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, datatype: Datatype) -> Self {
        Self {
            name: name.into(),
            datatype,
            required: false,
        }
    }
}

/// An executable clinical rule
///
/// Rules are stateless once built. Evaluation is a function of the data
/// reachable through the context, the patient and the arguments. Missing
/// data yields a null result; structurally invalid arguments yield
/// [`LogicError::InvalidArgument`].
pub trait Rule: Send + Sync + fmt::Debug {
    fn eval(&self, ctx: &LogicContext, patient: &Patient, args: &RuleArgs)
    -> EvalResult<LogicResult>;

    /// Tokens of the rules this rule evaluates
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Datatype of the results this rule produces, when known
    fn default_datatype(&self) -> Option<Datatype>;

    fn parameters(&self) -> Vec<RuleParameterInfo> {
        Vec::new()
    }

    /// How long results may be cached; the service default applies when `None`
    fn ttl(&self) -> Option<TimeDelta> {
        None
    }

    /// Check `args` against [`Rule::parameters`]
    ///
    /// Required parameters must be present and every declared parameter
    /// that is present must have the declared datatype. Undeclared
    /// arguments are ignored.
    fn validate_args(&self, args: &RuleArgs) -> EvalResult<()> {
        for param in self.parameters() {
            match args.get(&param.name) {
                None if param.required => {
                    return Err(LogicError::invalid_argument(
                        &param.name,
                        "required argument is missing",
                    ));
                }
                Some(value) if value.datatype() != param.datatype => {
                    return Err(LogicError::invalid_argument(
                        &param.name,
                        format!("expected {}, got {}", param.datatype, value.datatype()),
                    ));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
