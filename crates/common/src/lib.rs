//! Shared types for the Yombo gateway certificate manager.
//!
//! - [`ids`]: newtypes for certificate names and signing correlation ids
//! - [`types`]: key algorithm and size specifications
//! - [`digest`]: SHA-256 helpers used for on-disk integrity checks

pub mod digest;
pub mod ids;
pub mod types;

pub use digest::{matches_sha256, sha256_hex};
pub use ids::{CorrelationId, SslName};
pub use types::{KeySpec, KeyType, KeyTypeError};
