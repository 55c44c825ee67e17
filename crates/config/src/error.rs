//! Configuration error types.

use thiserror::Error;

use crate::requirement::RequirementError;

/// Errors raised by [`Config::validate`](crate::Config::validate)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("certificate '{sslname}': {source}")]
    Requirement {
        sslname: String,
        #[source]
        source: RequirementError,
    },

    #[error("certificate '{0}' is declared more than once")]
    DuplicateCertificate(String),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
