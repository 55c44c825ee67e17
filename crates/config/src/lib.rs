//! Configuration for the Yombo gateway certificate manager.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! gateway {
//!     id "gw_0123456789abcdef"
//!     fqdn "example.com"
//! }
//! certificates {
//!     directory "/var/lib/yombo/certs"
//!     renew-before-days 30
//!     certificate "lib_webinterface" {
//!         cn "gw1.example.com"
//!         sans "local" "internal" "external"
//!     }
//! }
//! ```
//!
//! Every scalar has a default, so an empty document is a valid (if useless)
//! configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use yombo_common::KeySpec;

mod error;
pub mod kdl;
pub mod requirement;
pub mod validate;

pub use error::ConfigError;
pub use requirement::{check_requirement, RequirementError};

// ============================================================================
// Defaults
// ============================================================================

pub fn default_certs_dir() -> PathBuf {
    PathBuf::from("/var/lib/yombo/certs")
}

pub fn default_sweep_interval_hours() -> u64 {
    24
}

pub fn default_renew_before_days() -> u32 {
    30
}

pub fn default_write_debounce_secs() -> u64 {
    180
}

pub fn default_write_max_delay_secs() -> u64 {
    900
}

pub fn default_resubmit_after_hours() -> u64 {
    12
}

pub fn default_generation_retry_secs() -> u64 {
    15
}

pub fn default_generation_max_attempts() -> u32 {
    5
}

pub fn default_unknown_response_ttl_secs() -> u64 {
    600
}

pub fn default_spool_poll_interval_secs() -> u64 {
    30
}

// ============================================================================
// Limits
// ============================================================================

/// Largest accepted `renew-before-days`
pub const MAX_RENEW_BEFORE_DAYS: u32 = 3650;

/// Largest accepted `resubmit-after-hours` and `sweep-interval-hours`
pub const MAX_INTERVAL_HOURS: u64 = 24 * 365;

/// Largest accepted value for any `*-secs` setting
pub const MAX_DELAY_SECS: u64 = 7 * 24 * 3600;

/// Largest accepted `generation-max-attempts`
pub const MAX_GENERATION_ATTEMPTS: u32 = 100;

// ============================================================================
// Configuration types
// ============================================================================

/// Root configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub certificates: CertificatesConfig,
}

/// Identity of this gateway
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    /// Gateway id assigned by the Yombo API
    pub id: String,
    /// Public domain of the gateway. Certificates can only be requested
    /// for names under it.
    pub fqdn: Option<String>,
}

/// Subject attributes placed in every CSR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectConfig {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            country: "US".to_string(),
            state: "California".to_string(),
            locality: "Sacramento".to_string(),
            organization: "Yombo".to_string(),
        }
    }
}

/// Signing channel settings for the standalone daemon
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Spool directory exchanged with the signing service
    pub spool: Option<PathBuf>,
    pub poll_interval_secs: u64,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            spool: None,
            poll_interval_secs: default_spool_poll_interval_secs(),
        }
    }
}

/// A certificate the daemon should manage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequirement {
    pub sslname: String,
    pub common_name: String,
    pub sans: Vec<String>,
    pub key: KeySpec,
}

/// Certificate lifecycle settings
#[derive(Debug, Clone)]
pub struct CertificatesConfig {
    pub directory: PathBuf,
    pub sweep_interval_hours: u64,
    pub renew_before_days: u32,
    pub write_debounce_secs: u64,
    pub write_max_delay_secs: u64,
    pub resubmit_after_hours: u64,
    pub generation_retry_secs: u64,
    pub generation_max_attempts: u32,
    pub unknown_response_ttl_secs: u64,
    pub metrics_file: Option<PathBuf>,
    pub subject: SubjectConfig,
    /// Key used for the self-signed fallback certificate
    pub fallback: KeySpec,
    pub signing: SigningConfig,
    pub requirements: Vec<CertificateRequirement>,
}

impl Default for CertificatesConfig {
    fn default() -> Self {
        Self {
            directory: default_certs_dir(),
            sweep_interval_hours: default_sweep_interval_hours(),
            renew_before_days: default_renew_before_days(),
            write_debounce_secs: default_write_debounce_secs(),
            write_max_delay_secs: default_write_max_delay_secs(),
            resubmit_after_hours: default_resubmit_after_hours(),
            generation_retry_secs: default_generation_retry_secs(),
            generation_max_attempts: default_generation_max_attempts(),
            unknown_response_ttl_secs: default_unknown_response_ttl_secs(),
            metrics_file: None,
            subject: SubjectConfig::default(),
            fallback: KeySpec::default(),
            signing: SigningConfig::default(),
            requirements: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        let config = Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        info!(
            path = %path.display(),
            certificates = config.certificates.requirements.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from KDL text
    pub fn from_kdl(content: &str) -> Result<Self> {
        kdl::parse_document(content)
    }

    /// Configuration for tests: ECDSA everywhere, since RSA key
    /// generation is slow
    pub fn default_for_testing() -> Self {
        let mut config = Self::default();
        config.gateway.id = "gw_testing0000000000".to_string();
        config.gateway.fqdn = Some("example.com".to_string());
        config.certificates.directory = std::env::temp_dir().join("yombo-certs-test");
        config.certificates.fallback = KeySpec::ecdsa();
        config
    }

    /// Check the declared certificate requirements
    ///
    /// Stops at the first problem. Use [`validate::validate_config`] to
    /// collect every error and warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fqdn = self.gateway.fqdn.as_deref();
        let mut seen = std::collections::HashSet::new();

        for req in &self.certificates.requirements {
            if !seen.insert(req.sslname.as_str()) {
                return Err(ConfigError::DuplicateCertificate(req.sslname.clone()));
            }
            check_requirement(&req.sslname, &req.common_name, &req.key, fqdn).map_err(|source| {
                ConfigError::Requirement {
                    sslname: req.sslname.clone(),
                    source,
                }
            })?;
        }

        self.check_limits()?;

        debug!(
            certificates = self.certificates.requirements.len(),
            "Configuration validated"
        );
        Ok(())
    }

    /// Check that every numeric setting is within its accepted range
    pub fn check_limits(&self) -> Result<(), ConfigError> {
        let certs = &self.certificates;
        if certs.generation_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "generation-max-attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        check_limit(
            "generation-max-attempts",
            u64::from(certs.generation_max_attempts),
            u64::from(MAX_GENERATION_ATTEMPTS),
        )?;
        check_limit(
            "renew-before-days",
            u64::from(certs.renew_before_days),
            u64::from(MAX_RENEW_BEFORE_DAYS),
        )?;
        check_limit("resubmit-after-hours", certs.resubmit_after_hours, MAX_INTERVAL_HOURS)?;
        check_limit("sweep-interval-hours", certs.sweep_interval_hours, MAX_INTERVAL_HOURS)?;
        for (field, value) in [
            ("write-debounce-secs", certs.write_debounce_secs),
            ("write-max-delay-secs", certs.write_max_delay_secs),
            ("generation-retry-secs", certs.generation_retry_secs),
            ("unknown-response-ttl-secs", certs.unknown_response_ttl_secs),
            ("poll-interval-secs", certs.signing.poll_interval_secs),
        ] {
            check_limit(field, value, MAX_DELAY_SECS)?;
        }

        Ok(())
    }
}

fn check_limit(field: &'static str, value: u64, max: u64) -> Result<(), ConfigError> {
    if value > max {
        return Err(ConfigError::InvalidValue {
            field,
            reason: format!("must be at most {} (got {})", max, value),
        });
    }
    Ok(())
}
