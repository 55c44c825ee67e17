//! Self-signed fallback certificate
//!
//! Served for any name whose real certificate is not (yet) valid. It is
//! created once, kept for ten years and only replaced at startup after it
//! has expired.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use yombo_common::{KeySpec, SslName};

use super::certificate::CertificateBundle;
use super::error::{CertError, GenerationError};
use super::generator::{generate_self_signed, SelfSignedMaterial};
use super::storage::{CertificateStorage, SELF_SIGNED_NAME};

/// Lifetime of the fallback certificate
pub const SELF_SIGNED_VALIDITY_DAYS: i64 = 3650;

/// Load the fallback certificate, creating it if missing or expired
///
/// Key generation runs on the blocking pool.
pub async fn ensure_fallback(
    storage: Arc<CertificateStorage>,
    common_name: String,
    key: KeySpec,
    now: DateTime<Utc>,
) -> Result<SelfSignedMaterial, CertError> {
    if let Some(material) = storage.load_self_signed() {
        if now < material.expires {
            debug!(expires = %material.expires, "Using stored self-signed certificate");
            return Ok(material);
        }
        info!(expires = %material.expires, "Self-signed certificate expired, replacing");
    }

    info!(common_name = %common_name, key = %key, "Generating self-signed certificate");
    let material = tokio::task::spawn_blocking(move || {
        generate_self_signed(&common_name, &key, SELF_SIGNED_VALIDITY_DAYS)
    })
    .await
    .map_err(|e| GenerationError::Worker(e.to_string()))??;

    if let Err(e) = storage.save_self_signed(&material) {
        warn!(error = %e, "Failed to store self-signed certificate, serving it from memory");
    }
    Ok(material)
}

/// The bundle handed out when no valid certificate exists
pub fn fallback_bundle(material: &SelfSignedMaterial, storage: &CertificateStorage) -> CertificateBundle {
    CertificateBundle {
        sslname: SslName::from(SELF_SIGNED_NAME),
        key: material.key_pem.clone(),
        cert: material.cert_pem.clone(),
        chain: None,
        expires: Some(material.expires),
        created: Some(material.created),
        signed: Some(material.created),
        self_signed: true,
        key_path: Some(storage.self_signed_key_path()),
        cert_path: Some(storage.self_signed_cert_path()),
        chain_path: None,
    }
}
