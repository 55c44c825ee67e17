//! Private key, CSR and self-signed certificate generation
//!
//! Key generation is CPU bound (a 4096-bit RSA key can take seconds), so the
//! async entry points run on tokio's blocking pool.

use chrono::{DateTime, Utc};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PublicKeyData};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use tracing::{debug, trace};
use x509_parser::prelude::FromDer;
use yombo_common::{KeySpec, KeyType};
use yombo_config::SubjectConfig;

use super::error::GenerationError;

/// Everything needed to build one CSR
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrRequest {
    pub common_name: String,
    pub sans: Vec<String>,
    pub key: KeySpec,
    pub fqdn: Option<String>,
    pub organizational_unit: String,
    pub subject: SubjectConfig,
}

/// A new private key and the CSR made from it
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    pub key_pem: String,
    pub csr_pem: String,
}

/// Self-signed certificate material
#[derive(Debug, Clone)]
pub struct SelfSignedMaterial {
    pub cert_pem: String,
    pub key_pem: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

/// Generate a private key for the given spec
pub fn generate_key_pair(spec: &KeySpec) -> Result<KeyPair, GenerationError> {
    match spec.key_type {
        KeyType::Ecdsa => KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| GenerationError::Key(e.to_string())),
        KeyType::Rsa => {
            let bits = spec.key_size as usize;
            let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
                .map_err(|e| GenerationError::Key(e.to_string()))?;
            let pem = private_key
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| GenerationError::Key(e.to_string()))?;
            KeyPair::from_pem_and_sign_algo(&pem, &rcgen::PKCS_RSA_SHA256)
                .map_err(|e| GenerationError::Key(e.to_string()))
        }
    }
}

/// Subject alternative names for a certificate
///
/// The common name always comes first. Short names such as `local` are
/// qualified with the FQDN; names already inside the FQDN are kept as is.
pub fn subject_alt_names(common_name: &str, sans: &[String], fqdn: Option<&str>) -> Vec<String> {
    let mut names = vec![common_name.to_string()];

    for san in sans {
        let san = san.trim().trim_end_matches('.');
        if san.is_empty() {
            continue;
        }
        let name = match fqdn {
            Some(fqdn) if !yombo_config::requirement::is_within_domain(san, fqdn) => {
                format!("{san}.{fqdn}")
            }
            _ => san.to_string(),
        };
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
            names.push(name);
        }
    }

    names
}

fn distinguished_name(
    common_name: &str,
    subject: &SubjectConfig,
    organizational_unit: &str,
) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::CountryName, subject.country.as_str());
    dn.push(DnType::StateOrProvinceName, subject.state.as_str());
    dn.push(DnType::LocalityName, subject.locality.as_str());
    dn.push(DnType::OrganizationName, subject.organization.as_str());
    dn.push(DnType::OrganizationalUnitName, organizational_unit);
    dn
}

/// Generate a key and a SHA-256 signed CSR
pub fn generate_csr(request: &CsrRequest) -> Result<GeneratedRequest, GenerationError> {
    let started = std::time::Instant::now();
    let key = generate_key_pair(&request.key)?;

    let sans = subject_alt_names(&request.common_name, &request.sans, request.fqdn.as_deref());
    let mut params = CertificateParams::new(sans)?;
    params.distinguished_name = distinguished_name(
        &request.common_name,
        &request.subject,
        &request.organizational_unit,
    );

    let csr_pem = params.serialize_request(&key)?.pem()?;
    let key_pem = key.serialize_pem();

    debug!(
        common_name = %request.common_name,
        key = %request.key,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Generated key and CSR"
    );

    Ok(GeneratedRequest { key_pem, csr_pem })
}

/// [`generate_csr`] on the blocking pool
pub async fn generate_csr_async(request: CsrRequest) -> Result<GeneratedRequest, GenerationError> {
    tokio::task::spawn_blocking(move || generate_csr(&request))
        .await
        .map_err(|e| GenerationError::Worker(e.to_string()))?
}

/// Build a self-signed certificate valid for `validity_days` from now
pub fn generate_self_signed(
    common_name: &str,
    key_spec: &KeySpec,
    validity_days: i64,
) -> Result<SelfSignedMaterial, GenerationError> {
    let key = generate_key_pair(key_spec)?;

    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| GenerationError::SelfSigned(e.to_string()))?;
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, "Yombo");
    params.distinguished_name = dn;

    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now + ::time::Duration::days(validity_days);
    params.not_before = now;
    params.not_after = not_after;

    let cert = params
        .self_signed(&key)
        .map_err(|e| GenerationError::SelfSigned(e.to_string()))?;

    let created = timestamp(now.unix_timestamp())?;
    let expires = timestamp(not_after.unix_timestamp())?;

    debug!(common_name = %common_name, expires = %expires, "Generated self-signed certificate");

    Ok(SelfSignedMaterial {
        cert_pem: cert.pem(),
        key_pem: key.serialize_pem(),
        created,
        expires,
    })
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, GenerationError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| GenerationError::Parse(format!("timestamp {secs} out of range")))
}

/// Read `notAfter` from a PEM certificate
pub fn certificate_expiry(cert_pem: &str) -> Result<DateTime<Utc>, GenerationError> {
    let pem = pem::parse(cert_pem).map_err(|e| GenerationError::Parse(e.to_string()))?;
    let (_, cert) = x509_parser::parse_x509_certificate(pem.contents())
        .map_err(|e| GenerationError::Parse(e.to_string()))?;
    timestamp(cert.validity().not_after.timestamp())
}

/// Whether a CSR was made from the given private key
pub fn csr_matches_key(csr_pem: &str, key_pem: &str) -> bool {
    let Ok(csr) = pem::parse(csr_pem) else {
        trace!("CSR is not valid PEM");
        return false;
    };
    let Ok((_, request)) =
        x509_parser::certification_request::X509CertificationRequest::from_der(csr.contents())
    else {
        trace!("CSR could not be parsed");
        return false;
    };
    let Ok(key) = KeyPair::from_pem(key_pem) else {
        trace!("Private key could not be parsed");
        return false;
    };

    request
        .certification_request_info
        .subject_pki
        .subject_public_key
        .data
        .as_ref()
        == key.public_key_raw()
}

/// Whether a certificate carries the public half of the given private key
pub fn cert_matches_key(cert_pem: &str, key_pem: &str) -> bool {
    let Ok(pem) = pem::parse(cert_pem) else {
        trace!("Certificate is not valid PEM");
        return false;
    };
    let Ok((_, cert)) = x509_parser::parse_x509_certificate(pem.contents()) else {
        trace!("Certificate could not be parsed");
        return false;
    };
    let Ok(key) = KeyPair::from_pem(key_pem) else {
        trace!("Private key could not be parsed");
        return false;
    };

    cert.public_key().subject_public_key.data.as_ref() == key.public_key_raw()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(sans: &[&str]) -> CsrRequest {
        CsrRequest {
            common_name: "gw1.example.com".to_string(),
            sans: sans.iter().map(|s| s.to_string()).collect(),
            key: KeySpec::ecdsa(),
            fqdn: Some("example.com".to_string()),
            organizational_unit: "gw_abcdefghij".to_string(),
            subject: SubjectConfig::default(),
        }
    }

    #[test]
    fn test_subject_alt_names_joining() {
        let sans = vec![
            "local".to_string(),
            "internal.example.com".to_string(),
            "gw1.example.com".to_string(),
            "".to_string(),
        ];
        assert_eq!(
            subject_alt_names("gw1.example.com", &sans, Some("example.com")),
            vec!["gw1.example.com", "local.example.com", "internal.example.com"]
        );
        assert_eq!(
            subject_alt_names("gw1.example.com", &["local".to_string()], None),
            vec!["gw1.example.com", "local"]
        );
    }

    #[test]
    fn test_generate_csr_ecdsa() {
        let generated = generate_csr(&request(&["local"])).unwrap();
        assert!(generated.csr_pem.contains("BEGIN CERTIFICATE REQUEST"));
        assert!(generated.key_pem.contains("PRIVATE KEY"));
        assert!(csr_matches_key(&generated.csr_pem, &generated.key_pem));

        let csr = pem::parse(&generated.csr_pem).unwrap();
        let (_, parsed) =
            x509_parser::certification_request::X509CertificationRequest::from_der(csr.contents())
                .unwrap();
        let subject = parsed.certification_request_info.subject.to_string();
        assert!(subject.contains("CN=gw1.example.com"));
        assert!(subject.contains("OU=gw_abcdefghij"));
        assert!(subject.contains("O=Yombo"));
    }

    #[test]
    fn test_generate_csr_rsa() {
        let mut req = request(&[]);
        req.key = KeySpec::rsa(2048);
        let generated = generate_csr(&req).unwrap();
        assert!(csr_matches_key(&generated.csr_pem, &generated.key_pem));
    }

    #[test]
    fn test_csr_key_mismatch_detected() {
        let a = generate_csr(&request(&[])).unwrap();
        let b = generate_csr(&request(&[])).unwrap();
        assert!(!csr_matches_key(&a.csr_pem, &b.key_pem));
        assert!(!csr_matches_key("garbage", &a.key_pem));
    }

    #[test]
    fn test_cert_key_pairing() {
        let a = generate_self_signed("localhost", &KeySpec::ecdsa(), 1).unwrap();
        let b = generate_self_signed("localhost", &KeySpec::ecdsa(), 1).unwrap();
        assert!(cert_matches_key(&a.cert_pem, &a.key_pem));
        assert!(!cert_matches_key(&a.cert_pem, &b.key_pem));
        assert!(!cert_matches_key("-----BEGIN", &a.key_pem));
    }

    #[test]
    fn test_self_signed_expiry_roundtrips() {
        let material = generate_self_signed("localhost", &KeySpec::ecdsa(), 3650).unwrap();
        let expiry = certificate_expiry(&material.cert_pem).unwrap();
        assert_eq!(expiry, material.expires);
        assert!(material.expires > material.created + chrono::Duration::days(3649));
    }

    #[tokio::test]
    async fn test_generate_csr_async() {
        let generated = generate_csr_async(request(&["internal"])).await.unwrap();
        assert!(csr_matches_key(&generated.csr_pem, &generated.key_pem));
    }
}
