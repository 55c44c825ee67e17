//! Certificate requirement checks.
//!
//! Shared by config validation and by the certificate manager's `declare`,
//! so a requirement that passes `yombo-certs test` is also accepted at
//! runtime (as long as the gateway FQDN has not changed in between).

use thiserror::Error;
use yombo_common::{KeySpec, KeyTypeError};

/// Longest accepted sslname. Names become file name prefixes.
pub const MAX_SSLNAME_LEN: usize = 64;

/// Upper bound for the X.509 commonName attribute (RFC 5280 ub-common-name)
pub const MAX_COMMON_NAME_LEN: usize = 64;

/// Reasons a certificate requirement is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequirementError {
    #[error("certificate requirement is missing 'sslname'")]
    MissingName,

    #[error("sslname '{name}' is longer than {max} characters")]
    NameTooLong { name: String, max: usize },

    #[error("sslname '{0}' may only contain letters, digits, '_' and '-'")]
    InvalidName(String),

    #[error("gateway FQDN is not configured, cannot request certificates")]
    MissingFqdn,

    #[error("common name '{cn}' is not within the gateway domain '{fqdn}'")]
    ForeignCommonName { cn: String, fqdn: String },

    #[error("common name '{cn}' is longer than {max} characters")]
    CommonNameTooLong { cn: String, max: usize },

    #[error("unsupported key size {0}")]
    UnsupportedKey(KeySpec),

    #[error(transparent)]
    KeyType(#[from] KeyTypeError),
}

/// Validate a logical certificate name
pub fn check_sslname(name: &str) -> Result<(), RequirementError> {
    if name.is_empty() {
        return Err(RequirementError::MissingName);
    }
    if name.len() > MAX_SSLNAME_LEN {
        return Err(RequirementError::NameTooLong {
            name: name.to_string(),
            max: MAX_SSLNAME_LEN,
        });
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RequirementError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Whether `name` is `fqdn` itself or a name under it
pub fn is_within_domain(name: &str, fqdn: &str) -> bool {
    let name = name.trim_end_matches('.').to_ascii_lowercase();
    let fqdn = fqdn.trim_end_matches('.').to_ascii_lowercase();
    if fqdn.is_empty() {
        return false;
    }
    name == fqdn || name.ends_with(&format!(".{fqdn}"))
}

/// The gateway may only request certificates for the domain it owns
pub fn check_common_name(cn: &str, fqdn: Option<&str>) -> Result<(), RequirementError> {
    let fqdn = match fqdn {
        Some(f) if !f.trim().is_empty() => f,
        _ => return Err(RequirementError::MissingFqdn),
    };
    if cn.len() > MAX_COMMON_NAME_LEN {
        return Err(RequirementError::CommonNameTooLong {
            cn: cn.to_string(),
            max: MAX_COMMON_NAME_LEN,
        });
    }
    if !is_within_domain(cn, fqdn) {
        return Err(RequirementError::ForeignCommonName {
            cn: cn.to_string(),
            fqdn: fqdn.to_string(),
        });
    }
    Ok(())
}

pub fn check_key_spec(key: &KeySpec) -> Result<(), RequirementError> {
    if key.is_supported() {
        Ok(())
    } else {
        Err(RequirementError::UnsupportedKey(*key))
    }
}

/// Run every requirement check in declaration order
pub fn check_requirement(
    sslname: &str,
    common_name: &str,
    key: &KeySpec,
    fqdn: Option<&str>,
) -> Result<(), RequirementError> {
    check_sslname(sslname)?;
    check_common_name(common_name, fqdn)?;
    check_key_spec(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sslname_rules() {
        assert!(check_sslname("lib_webinterface").is_ok());
        assert!(check_sslname("mqtt-broker").is_ok());
        assert_eq!(check_sslname(""), Err(RequirementError::MissingName));
        assert!(matches!(
            check_sslname("../etc/passwd"),
            Err(RequirementError::InvalidName(_))
        ));
        assert!(matches!(
            check_sslname(&"a".repeat(65)),
            Err(RequirementError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_common_name_must_be_in_domain() {
        assert!(check_common_name("gw1.example.com", Some("example.com")).is_ok());
        assert!(check_common_name("example.com", Some("example.com")).is_ok());
        assert!(check_common_name("GW1.Example.com", Some("example.com")).is_ok());
        assert!(matches!(
            check_common_name("gw1.evilexample.com", Some("example.com")),
            Err(RequirementError::ForeignCommonName { .. })
        ));
        assert_eq!(
            check_common_name("gw1.example.com", None),
            Err(RequirementError::MissingFqdn)
        );
        assert_eq!(
            check_common_name("gw1.example.com", Some("  ")),
            Err(RequirementError::MissingFqdn)
        );
    }

    #[test]
    fn test_oversized_common_name() {
        let cn = format!("{}.example.com", "a".repeat(60));
        assert!(matches!(
            check_common_name(&cn, Some("example.com")),
            Err(RequirementError::CommonNameTooLong { .. })
        ));
    }

    #[test]
    fn test_key_spec_rules() {
        assert!(check_key_spec(&KeySpec::rsa(2048)).is_ok());
        assert!(matches!(
            check_key_spec(&KeySpec::rsa(1024)),
            Err(RequirementError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn test_check_requirement_order() {
        // Name problems are reported before domain problems
        assert_eq!(
            check_requirement("", "x.other.org", &KeySpec::default(), None),
            Err(RequirementError::MissingName)
        );
    }
}
