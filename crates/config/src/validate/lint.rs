//! Configuration linting
//!
//! Flags settings that are accepted but probably not what was intended.

use super::{ValidationResult, ValidationWarning};
use crate::Config;

/// Lint configuration for suspicious timing and empty setups
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let certs = &config.certificates;

    if certs.requirements.is_empty() {
        result.add_warning(ValidationWarning::new(
            "No certificates declared, only the self-signed fallback will be served",
        ));
    }

    // A sweep must run at least once inside the renewal window
    let window_hours = u64::from(certs.renew_before_days) * 24;
    if certs.sweep_interval_hours >= window_hours {
        result.add_warning(ValidationWarning::new(format!(
            "Sweep interval ({}h) is not shorter than the renewal window ({} days)",
            certs.sweep_interval_hours, certs.renew_before_days
        )));
    }

    if certs.write_debounce_secs > certs.write_max_delay_secs {
        result.add_warning(ValidationWarning::new(format!(
            "Write debounce ({}s) exceeds the maximum write delay ({}s); writes will happen at the maximum delay",
            certs.write_debounce_secs, certs.write_max_delay_secs
        )));
    }

    if certs.signing.spool.is_none() {
        result.add_warning(ValidationWarning::new(
            "No signing spool configured, CSRs cannot be submitted for signing",
        ));
    }

    for req in &certs.requirements {
        if req.sans.iter().any(|s| s.trim().is_empty()) {
            result.add_warning(ValidationWarning::new(format!(
                "Certificate '{}' has an empty subject alternative name",
                req.sslname
            )));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_warns() {
        let config = Config::default_for_testing();
        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("No certificates declared")));
    }

    #[test]
    fn test_sweep_longer_than_window() {
        let mut config = Config::default_for_testing();
        config.certificates.renew_before_days = 1;
        config.certificates.sweep_interval_hours = 48;
        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("Sweep interval")));
    }

    #[test]
    fn test_debounce_longer_than_max_delay() {
        let mut config = Config::default_for_testing();
        config.certificates.write_debounce_secs = 1000;
        config.certificates.write_max_delay_secs = 10;
        let result = lint_config(&config);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.message.contains("Write debounce")));
    }
}
