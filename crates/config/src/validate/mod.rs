//! Configuration validation
//!
//! Collects every problem in a configuration instead of stopping at the
//! first one. Used by `yombo-certs test`.

use std::fmt;

use crate::Config;

pub mod certs;
pub mod lint;

/// Area of the configuration an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Gateway,
    Requirement,
    Certificate,
    Storage,
    Settings,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gateway => "gateway",
            Self::Requirement => "requirement",
            Self::Certificate => "certificate",
            Self::Storage => "storage",
            Self::Settings => "settings",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors and warnings gathered from one or more checks
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run every check: requirements, on-disk certificates and lints
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    result.merge(validate_requirements(config));
    result.merge(certs::validate_certificates(config));
    result.merge(lint::lint_config(config));
    result
}

/// Requirement checks, reporting every failing certificate
pub fn validate_requirements(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let fqdn = config.gateway.fqdn.as_deref();
    let mut seen = std::collections::HashSet::new();

    if config.gateway.id.trim().is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Gateway,
            "Gateway id is not set",
        ));
    }

    if let Err(e) = config.check_limits() {
        result.add_error(ValidationError::new(ErrorCategory::Settings, e.to_string()));
    }

    for req in &config.certificates.requirements {
        if !seen.insert(req.sslname.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Requirement,
                format!("Certificate '{}' is declared more than once", req.sslname),
            ));
            continue;
        }
        if let Err(e) = crate::check_requirement(&req.sslname, &req.common_name, &req.key, fqdn)
        {
            result.add_error(ValidationError::new(
                ErrorCategory::Requirement,
                format!("Certificate '{}': {}", req.sslname, e),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CertificateRequirement;
    use yombo_common::KeySpec;

    #[test]
    fn test_collects_all_requirement_errors() {
        let mut config = Config::default_for_testing();
        config.gateway.id = String::new();
        config.certificates.requirements = vec![
            CertificateRequirement {
                sslname: "a".into(),
                common_name: "a.other.org".into(),
                sans: vec![],
                key: KeySpec::ecdsa(),
            },
            CertificateRequirement {
                sslname: "b".into(),
                common_name: "b.example.com".into(),
                sans: vec![],
                key: KeySpec::rsa(1024),
            },
        ];

        let result = validate_requirements(&config);
        assert_eq!(result.errors.len(), 3);
        assert!(result
            .errors
            .iter()
            .any(|e| e.category == ErrorCategory::Gateway));
    }

    #[test]
    fn test_reports_out_of_range_settings() {
        let mut config = Config::default_for_testing();
        config.certificates.sweep_interval_hours = u64::MAX;
        let result = validate_config(&config);
        assert!(!result.is_ok());
        assert!(result
            .errors
            .iter()
            .any(|e| e.to_string().contains("sweep-interval-hours")));
    }
}
