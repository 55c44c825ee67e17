//! Type-safe identifier newtypes for the certificate manager.
//!
//! These types provide compile-time safety for identifiers, preventing
//! accidental mixing of a certificate's logical name with the correlation
//! id of a signing request.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Correlation ID attached to every CSR submission.
///
/// The signing service echoes it back so responses can be traced to the
/// request that produced them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new random correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to owned String
    pub fn into_string(self) -> String {
        self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Logical certificate name.
///
/// Identifies one managed certificate (e.g. `lib_webinterface`). The name is
/// stable for the lifetime of the gateway and doubles as the file name
/// prefix in the certificate directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SslName(String);

impl SslName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SslName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for SslName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for SslName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for SslName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SslName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
