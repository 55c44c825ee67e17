//! Key specifications shared by configuration and the certificate manager.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// RSA key sizes accepted for managed certificates
pub const RSA_KEY_SIZES: [u32; 2] = [2048, 4096];

/// Default RSA key size
pub const DEFAULT_KEY_SIZE: u32 = 4096;

/// Private key algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Rsa,
    /// NIST P-256. The key size is ignored.
    Ecdsa,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Rsa => "rsa",
            KeyType::Ecdsa => "ecdsa",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a key type string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyTypeError {
    #[error("DSA keys are not supported, use 'rsa' or 'ecdsa'")]
    DsaUnsupported,

    #[error("unknown key type '{0}', expected 'rsa' or 'ecdsa'")]
    Unknown(String),
}

impl FromStr for KeyType {
    type Err = KeyTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeyType::Rsa),
            "ecdsa" | "ec" => Ok(KeyType::Ecdsa),
            "dsa" => Err(KeyTypeError::DsaUnsupported),
            other => Err(KeyTypeError::Unknown(other.to_string())),
        }
    }
}

/// Algorithm and size of a private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySpec {
    pub key_type: KeyType,
    pub key_size: u32,
}

impl KeySpec {
    pub fn rsa(key_size: u32) -> Self {
        Self {
            key_type: KeyType::Rsa,
            key_size,
        }
    }

    pub fn ecdsa() -> Self {
        Self {
            key_type: KeyType::Ecdsa,
            key_size: 256,
        }
    }

    /// Whether the size is acceptable for the key type
    pub fn is_supported(&self) -> bool {
        match self.key_type {
            KeyType::Rsa => RSA_KEY_SIZES.contains(&self.key_size),
            KeyType::Ecdsa => true,
        }
    }
}

impl Default for KeySpec {
    fn default() -> Self {
        Self::rsa(DEFAULT_KEY_SIZE)
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_type {
            KeyType::Rsa => write!(f, "rsa-{}", self.key_size),
            KeyType::Ecdsa => f.write_str("ecdsa-p256"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_type() {
        assert_eq!("RSA".parse::<KeyType>(), Ok(KeyType::Rsa));
        assert_eq!("ecdsa".parse::<KeyType>(), Ok(KeyType::Ecdsa));
        assert_eq!("dsa".parse::<KeyType>(), Err(KeyTypeError::DsaUnsupported));
        assert!(matches!(
            "ed448".parse::<KeyType>(),
            Err(KeyTypeError::Unknown(_))
        ));
    }

    #[test]
    fn test_supported_sizes() {
        assert!(KeySpec::rsa(2048).is_supported());
        assert!(KeySpec::rsa(4096).is_supported());
        assert!(!KeySpec::rsa(1024).is_supported());
        assert!(KeySpec::ecdsa().is_supported());
    }

    #[test]
    fn test_default_is_rsa_4096() {
        assert_eq!(KeySpec::default().to_string(), "rsa-4096");
    }
}
