//! Typed errors for scenario loading and execution.
//!
//! [`ScenarioError`] is the top-level error of the crate's public APIs.
//! Most runtime failures are not surfaced as errors at all: they become
//! reports (see `veristream_core::report`) and the scenario keeps going.

use thiserror::Error;
use veristream_core::StructureError;

use crate::expr::ExprError;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("scenario `{name}` not found in any search path")]
    ScenarioNotFound { name: String },
    #[error("include target `{location}` not found")]
    IncludeNotFound { location: String },
    #[error("include cycle through `{location}`")]
    IncludeCycle { location: String },
    #[error("only one action scenario may be loaded; `{name}` is the second")]
    MultipleActionScenarios { name: String },
    #[error("unknown action type `{name}`")]
    UnknownActionType { name: String },
    #[error("mandatory field `{field}` missing on `{action}`")]
    MissingMandatoryField { action: String, field: String },
    #[error("action `{action}` of type `{type_name}` cannot be optional")]
    CannotBeOptional { action: String, type_name: String },
    #[error("invalid `{field}` on `{action}`: {reason}")]
    InvalidField {
        action: String,
        field: String,
        reason: String,
    },
    #[error("undefined variable `{name}`")]
    UndefinedVariable { name: String },
    #[error("failed to parse `{path}`: {source}")]
    Malformed {
        path: String,
        #[source]
        source: StructureError,
    },
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("failed to read `{path}`: {message}")]
    Io { path: String, message: String },
}
