//! Gateway identity shared by the generator and the state machine.

use parking_lot::RwLock;
use tracing::info;
use yombo_config::{Config, SubjectConfig};

/// Who this gateway is and which domain it may request certificates for
///
/// The FQDN can change at runtime (for example after the gateway is moved to
/// another domain); readers always see the latest value.
#[derive(Debug)]
pub struct GatewayContext {
    gateway_id: String,
    fqdn: RwLock<Option<String>>,
    subject: SubjectConfig,
}

impl GatewayContext {
    pub fn new(gateway_id: impl Into<String>, fqdn: Option<String>, subject: SubjectConfig) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            fqdn: RwLock::new(normalize_fqdn(fqdn)),
            subject,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.gateway.id.clone(),
            config.gateway.fqdn.clone(),
            config.certificates.subject.clone(),
        )
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Organizational unit placed in CSR subjects
    pub fn organizational_unit(&self) -> String {
        let prefix: String = self.gateway_id.chars().take(10).collect();
        format!("gw_{prefix}")
    }

    pub fn subject(&self) -> &SubjectConfig {
        &self.subject
    }

    pub fn fqdn(&self) -> Option<String> {
        self.fqdn.read().clone()
    }

    /// Replace the live FQDN. Returns true if it changed.
    pub fn set_fqdn(&self, fqdn: Option<String>) -> bool {
        let fqdn = normalize_fqdn(fqdn);
        let mut guard = self.fqdn.write();
        if *guard == fqdn {
            return false;
        }
        info!(old = ?*guard, new = ?fqdn, "Gateway FQDN changed");
        *guard = fqdn;
        true
    }
}

fn normalize_fqdn(fqdn: Option<String>) -> Option<String> {
    fqdn.map(|f| f.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|f| !f.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organizational_unit_uses_id_prefix() {
        let ctx = GatewayContext::new("abcdefghijklmnop", None, SubjectConfig::default());
        assert_eq!(ctx.organizational_unit(), "gw_abcdefghij");

        let short = GatewayContext::new("abc", None, SubjectConfig::default());
        assert_eq!(short.organizational_unit(), "gw_abc");
    }

    #[test]
    fn test_set_fqdn_reports_changes() {
        let ctx = GatewayContext::new("gw", Some("Example.com.".into()), SubjectConfig::default());
        assert_eq!(ctx.fqdn().as_deref(), Some("example.com"));
        assert!(!ctx.set_fqdn(Some("example.com".into())));
        assert!(ctx.set_fqdn(Some("other.org".into())));
        assert_eq!(ctx.fqdn().as_deref(), Some("other.org"));
        assert!(ctx.set_fqdn(Some("   ".into())));
        assert_eq!(ctx.fqdn(), None);
    }
}
