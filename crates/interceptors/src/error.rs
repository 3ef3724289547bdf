//! Error module

use thiserror::Error;

/// Errors raised while building interceptor options from configuration.
///
/// Handler errors never show up here: the interceptors pass them through
/// untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    #[error("Unknown gRPC code name: {0}")]
    UnknownCode(String),

    #[error("Unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("System field must not be empty")]
    EmptySystemField,
}

pub type OptionsResult<T> = Result<T, OptionsError>;
