//! Error types for certificate lifecycle management

use std::path::PathBuf;

use thiserror::Error;
use yombo_config::RequirementError;

/// A certificate declaration was rejected
#[derive(Debug, Error)]
pub enum DeclareError {
    #[error("invalid certificate requirement: {0}")]
    Requirement(#[from] RequirementError),

    #[error("certificate manager is not running")]
    ManagerStopped,
}

/// Key, CSR or certificate construction failed
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("key generation failed: {0}")]
    Key(String),

    #[error("failed to build CSR: {0}")]
    Csr(String),

    #[error("failed to build self-signed certificate: {0}")]
    SelfSigned(String),

    #[error("failed to parse certificate: {0}")]
    Parse(String),

    #[error("generation worker failed: {0}")]
    Worker(String),
}

impl From<rcgen::Error> for GenerationError {
    fn from(e: rcgen::Error) -> Self {
        GenerationError::Csr(e.to_string())
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid meta file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("integrity check failed for {path}")]
    Integrity { path: PathBuf },

    #[error("file referenced by meta is missing: {path}")]
    MissingFile { path: PathBuf },

    #[error("CSR does not match the private key")]
    CsrKeyMismatch,

    #[error(transparent)]
    Certificate(#[from] GenerationError),
}

impl From<tempfile::PersistError> for StorageError {
    fn from(e: tempfile::PersistError) -> Self {
        StorageError::Io(e.error)
    }
}

/// Signing channel failures
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing channel unavailable: {0}")]
    Unavailable(String),

    #[error("malformed signing response: {0}")]
    Malformed(String),

    #[error("signing response for '{sslname}' answers a superseded CSR")]
    StaleCsr { sslname: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for manager lifecycle operations
#[derive(Debug, Error)]
pub enum CertError {
    #[error(transparent)]
    Declare(#[from] DeclareError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error("certificate manager has stopped")]
    ManagerStopped,

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
