//! Certificate validation
//!
//! Inspects the certificates already on disk for each declared requirement.
//! Missing files are fine (the manager will request them), but unreadable
//! or expiring ones are reported.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Validate the certificate directory and any current certificates in it
pub fn validate_certificates(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let dir = &config.certificates.directory;

    if dir.exists() && !dir.is_dir() {
        result.add_error(ValidationError::new(
            ErrorCategory::Storage,
            format!("Certificate directory is not a directory: {:?}", dir),
        ));
        return result;
    }

    let window = Duration::from_secs(u64::from(config.certificates.renew_before_days) * 86400);

    for req in &config.certificates.requirements {
        let cert_path = dir.join(format!("{}.current.cert.pem", req.sslname));
        if !cert_path.exists() {
            continue;
        }
        match load_and_validate_cert(&cert_path, window) {
            Ok(Some(warning)) => result.add_warning(warning),
            Ok(None) => {}
            Err(e) => result.add_error(e),
        }
    }

    result
}

/// Load a certificate and check its expiry against the renewal window
fn load_and_validate_cert(
    cert_path: &Path,
    window: Duration,
) -> Result<Option<ValidationWarning>, ValidationError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to read certificate {:?}: {}", cert_path, e),
        )
    })?;

    let pem = pem::parse(&cert_pem).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Failed to parse certificate {:?}: {}", cert_path, e),
        )
    })?;

    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents()).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Certificate,
            format!("Invalid X509 certificate {:?}: {}", cert_path, e),
        )
    })?;

    let now = SystemTime::now();
    let not_after = cert.validity().not_after.timestamp().max(0) as u64;
    let expiry_time = SystemTime::UNIX_EPOCH + Duration::from_secs(not_after);

    // An expired current certificate is replaced at the first sweep
    if expiry_time <= now {
        return Ok(Some(ValidationWarning::new(format!(
            "Certificate expired: {:?} (expired at {}), it will be renewed",
            cert_path,
            cert.validity().not_after
        ))));
    }

    if now.checked_add(window).is_none_or(|deadline| expiry_time < deadline) {
        return Ok(Some(ValidationWarning::new(format!(
            "Certificate expires soon: {:?} (expires at {})",
            cert_path,
            cert.validity().not_after
        ))));
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CertificateRequirement;
    use yombo_common::KeySpec;

    fn config_with(dir: &Path) -> Config {
        let mut config = Config::default_for_testing();
        config.certificates.directory = dir.to_path_buf();
        config.certificates.requirements = vec![CertificateRequirement {
            sslname: "web".into(),
            common_name: "gw1.example.com".into(),
            sans: vec![],
            key: KeySpec::ecdsa(),
        }];
        config
    }

    fn write_cert(dir: &Path, days_valid: i64) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec!["gw1.example.com".into()]).unwrap();
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now - time::Duration::days(1);
        params.not_after = now + time::Duration::days(days_valid);
        let cert = params.self_signed(&key).unwrap();
        std::fs::write(dir.join("web.current.cert.pem"), cert.pem()).unwrap();
    }

    #[test]
    fn test_missing_certificate_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = validate_certificates(&config_with(dir.path()));
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_expiring_certificate_warns() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), 5);
        let result = validate_certificates(&config_with(dir.path()));
        assert!(result.is_ok());
        assert!(result.warnings[0].message.contains("expires soon"));
    }

    #[test]
    fn test_healthy_certificate_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        write_cert(dir.path(), 300);
        let result = validate_certificates(&config_with(dir.path()));
        assert!(result.is_ok());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_garbage_certificate_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("web.current.cert.pem"), "not a pem").unwrap();
        let result = validate_certificates(&config_with(dir.path()));
        assert!(result
            .errors
            .iter()
            .any(|e| e.message.contains("Failed to parse certificate")));
    }

    #[test]
    fn test_directory_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();
        let result = validate_certificates(&config_with(&file));
        assert_eq!(result.errors[0].category, ErrorCategory::Storage);
    }
}
