//! Certificate storage
//!
//! Each managed certificate keeps up to three generations on disk, one set
//! of files per slot:
//!
//! ```text
//! certs/
//! ├── lib_webinterface.current.key.pem
//! ├── lib_webinterface.current.cert.pem
//! ├── lib_webinterface.current.chain.pem
//! ├── lib_webinterface.current.meta         # timestamps + SHA-256 of each file
//! ├── lib_webinterface.next.key.pem
//! ├── lib_webinterface.next.csr.pem
//! ├── lib_webinterface.next.meta
//! ├── sslcert_selfsigned.cert.pem
//! ├── sslcert_selfsigned.key.pem
//! └── sslcert_selfsigned.meta
//! ```
//!
//! Every file is written to a temporary file and renamed into place. The
//! meta file goes last, so a crash part way through shows up as a hash
//! mismatch on the next restore and the slot is started over.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

use yombo_common::{matches_sha256, sha256_hex};

use super::error::StorageError;
use super::generation::{Generation, Slot};
use super::generator::{cert_matches_key, certificate_expiry, csr_matches_key, SelfSignedMaterial};

/// File name prefix of the self-signed fallback
pub const SELF_SIGNED_NAME: &str = "sslcert_selfsigned";

/// Persisted artifacts of a generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Key,
    Cert,
    Chain,
    Csr,
}

impl Artifact {
    pub const ALL: [Artifact; 4] = [Artifact::Key, Artifact::Cert, Artifact::Chain, Artifact::Csr];

    fn extension(&self) -> &'static str {
        match self {
            Artifact::Key => "key",
            Artifact::Cert => "cert",
            Artifact::Chain => "chain",
            Artifact::Csr => "csr",
        }
    }

    fn value<'a>(&self, generation: &'a Generation) -> Option<&'a str> {
        match self {
            Artifact::Key => generation.key.as_deref(),
            Artifact::Cert => generation.cert.as_deref(),
            Artifact::Chain => generation.chain.as_deref(),
            Artifact::Csr => generation.csr.as_deref(),
        }
    }

    fn hash<'a>(&self, meta: &'a GenerationMeta) -> Option<&'a str> {
        match self {
            Artifact::Key => meta.key.as_deref(),
            Artifact::Cert => meta.cert.as_deref(),
            Artifact::Chain => meta.chain.as_deref(),
            Artifact::Csr => meta.csr.as_deref(),
        }
    }
}

/// Contents of a `<sslname>.<slot>.meta` file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationMeta {
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub signed: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub submitted: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_msg: Option<String>,
    /// SHA-256 of the certificate file
    pub cert: Option<String>,
    pub chain: Option<String>,
    pub key: Option<String>,
    pub csr: Option<String>,
}

impl GenerationMeta {
    fn from_generation(generation: &Generation) -> Self {
        Self {
            expires: generation.expires_at,
            created: generation.created_at,
            signed: generation.signed_at,
            submitted: generation.submitted_at,
            fqdn: generation.fqdn.clone(),
            status: generation.status.clone(),
            status_msg: generation.status_msg.clone(),
            cert: generation.cert.as_ref().map(sha256_hex),
            chain: generation.chain.as_ref().map(sha256_hex),
            key: generation.key.as_ref().map(sha256_hex),
            csr: generation.csr.as_ref().map(sha256_hex),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SelfSignedMeta {
    #[serde(with = "chrono::serde::ts_seconds")]
    expires: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    created: DateTime<Utc>,
}

/// Result of restoring a slot from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Restored {
    /// No meta file for the slot
    Missing,
    Loaded(Generation),
    /// The files were corrupt or unreadable and have been removed
    Purged,
}

impl Restored {
    pub fn into_generation(self) -> Generation {
        match self {
            Restored::Loaded(generation) => generation,
            Restored::Missing | Restored::Purged => Generation::default(),
        }
    }
}

/// Filesystem store for certificate generations
#[derive(Debug)]
pub struct CertificateStorage {
    base_path: PathBuf,
}

impl CertificateStorage {
    /// Open (and create) the certificate directory
    ///
    /// The directory gets mode 0700 on Unix.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(base_path, fs::Permissions::from_mode(0o700))?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn artifact_path(&self, sslname: &str, slot: Slot, artifact: Artifact) -> PathBuf {
        self.base_path.join(format!(
            "{}.{}.{}.pem",
            sslname,
            slot.label(),
            artifact.extension()
        ))
    }

    pub fn meta_path(&self, sslname: &str, slot: Slot) -> PathBuf {
        self.base_path
            .join(format!("{}.{}.meta", sslname, slot.label()))
    }

    // =========================================================================
    // Generations
    // =========================================================================

    /// Write one slot to disk
    ///
    /// Artifacts missing from `generation` have their files removed.
    pub fn save_generation(
        &self,
        sslname: &str,
        slot: Slot,
        generation: &Generation,
    ) -> Result<(), StorageError> {
        if generation.is_empty() {
            return self.purge_slot(sslname, slot);
        }

        for artifact in Artifact::ALL {
            let path = self.artifact_path(sslname, slot, artifact);
            match artifact.value(generation) {
                Some(contents) => {
                    self.write_atomic(&path, contents.as_bytes(), artifact == Artifact::Key)?
                }
                None => remove_if_exists(&path)?,
            }
        }

        let meta = GenerationMeta::from_generation(generation);
        let meta_content = serde_json::to_string_pretty(&meta)?;
        self.write_atomic(&self.meta_path(sslname, slot), meta_content.as_bytes(), false)?;

        debug!(
            sslname = %sslname,
            slot = %slot,
            expires = ?generation.expires_at,
            "Saved certificate generation"
        );
        Ok(())
    }

    /// Read one slot and verify every file against the hashes in its meta
    ///
    /// `Ok(None)` means the slot has never been written.
    pub fn load_generation(
        &self,
        sslname: &str,
        slot: Slot,
    ) -> Result<Option<Generation>, StorageError> {
        let meta_path = self.meta_path(sslname, slot);
        if !meta_path.exists() {
            trace!(sslname = %sslname, slot = %slot, "No stored generation found");
            return Ok(None);
        }

        let meta: GenerationMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;

        let mut generation = Generation {
            created_at: meta.created,
            expires_at: meta.expires,
            signed_at: meta.signed,
            submitted_at: meta.submitted,
            fqdn: meta.fqdn.clone(),
            status: meta.status.clone(),
            status_msg: meta.status_msg.clone(),
            ..Generation::default()
        };

        for artifact in Artifact::ALL {
            let Some(expected) = artifact.hash(&meta) else {
                continue;
            };
            let path = self.artifact_path(sslname, slot, artifact);
            if !path.exists() {
                return Err(StorageError::MissingFile { path });
            }
            let contents = fs::read_to_string(&path)?;
            if !matches_sha256(&contents, expected) {
                return Err(StorageError::Integrity { path });
            }
            match artifact {
                Artifact::Key => generation.key = Some(contents),
                Artifact::Cert => generation.cert = Some(contents),
                Artifact::Chain => generation.chain = Some(contents),
                Artifact::Csr => generation.csr = Some(contents),
            }
        }
        generation.csr_hash = meta.csr;

        if slot == Slot::Next {
            if let (Some(key), Some(csr)) = (&generation.key, &generation.csr) {
                if !csr_matches_key(csr, key) {
                    return Err(StorageError::CsrKeyMismatch);
                }
            }
        }

        debug!(
            sslname = %sslname,
            slot = %slot,
            expires = ?generation.expires_at,
            "Loaded certificate generation"
        );
        Ok(Some(generation))
    }

    /// Load a slot, removing its files if they cannot be trusted
    pub fn restore_generation(&self, sslname: &str, slot: Slot) -> Restored {
        match self.load_generation(sslname, slot) {
            Ok(Some(generation)) => Restored::Loaded(generation),
            Ok(None) => Restored::Missing,
            Err(e) => {
                warn!(
                    sslname = %sslname,
                    slot = %slot,
                    error = %e,
                    "Stored certificate generation is unusable, purging"
                );
                if let Err(e) = self.purge_slot(sslname, slot) {
                    warn!(sslname = %sslname, slot = %slot, error = %e, "Failed to purge slot");
                }
                Restored::Purged
            }
        }
    }

    /// Delete every file belonging to a slot
    pub fn purge_slot(&self, sslname: &str, slot: Slot) -> Result<(), StorageError> {
        // Meta first, so a partial purge never leaves a meta pointing at
        // deleted files
        remove_if_exists(&self.meta_path(sslname, slot))?;
        for artifact in Artifact::ALL {
            remove_if_exists(&self.artifact_path(sslname, slot, artifact))?;
        }
        trace!(sslname = %sslname, slot = %slot, "Purged certificate slot");
        Ok(())
    }

    /// Names that have at least one meta file on disk
    pub fn list_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(stem) = file_name.strip_suffix(".meta") else {
                continue;
            };
            let Some((name, label)) = stem.rsplit_once('.') else {
                continue;
            };
            if Slot::ALL.iter().any(|s| s.label() == label) && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    // =========================================================================
    // Self-signed fallback
    // =========================================================================

    pub fn self_signed_cert_path(&self) -> PathBuf {
        self.base_path.join(format!("{SELF_SIGNED_NAME}.cert.pem"))
    }

    pub fn self_signed_key_path(&self) -> PathBuf {
        self.base_path.join(format!("{SELF_SIGNED_NAME}.key.pem"))
    }

    fn self_signed_meta_path(&self) -> PathBuf {
        self.base_path.join(format!("{SELF_SIGNED_NAME}.meta"))
    }

    /// Load the fallback certificate
    ///
    /// Anything unreadable, or a key that does not belong to the
    /// certificate, counts as no fallback at all so the caller makes a new
    /// one.
    pub fn load_self_signed(&self) -> Option<SelfSignedMaterial> {
        match self.read_self_signed() {
            Ok(Some(material)) if cert_matches_key(&material.cert_pem, &material.key_pem) => {
                Some(material)
            }
            Ok(Some(_)) => {
                warn!("Stored self-signed key does not match its certificate, discarding");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Stored self-signed certificate is unusable, discarding");
                None
            }
        }
    }

    /// Without a meta file the expiry is read from the certificate itself
    fn read_self_signed(&self) -> Result<Option<SelfSignedMaterial>, StorageError> {
        let cert_path = self.self_signed_cert_path();
        let key_path = self.self_signed_key_path();
        if !cert_path.exists() || !key_path.exists() {
            trace!("No stored self-signed certificate found");
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(&cert_path)?;
        let key_pem = fs::read_to_string(&key_path)?;

        let meta_path = self.self_signed_meta_path();
        let (created, expires) = if meta_path.exists() {
            let meta: SelfSignedMeta = serde_json::from_str(&fs::read_to_string(&meta_path)?)?;
            (meta.created, meta.expires)
        } else {
            (Utc::now(), certificate_expiry(&cert_pem)?)
        };

        Ok(Some(SelfSignedMaterial {
            cert_pem,
            key_pem,
            created,
            expires,
        }))
    }

    pub fn save_self_signed(&self, material: &SelfSignedMaterial) -> Result<(), StorageError> {
        self.write_atomic(&self.self_signed_key_path(), material.key_pem.as_bytes(), true)?;
        self.write_atomic(&self.self_signed_cert_path(), material.cert_pem.as_bytes(), false)?;
        let meta = SelfSignedMeta {
            expires: material.expires,
            created: material.created,
        };
        self.write_atomic(
            &self.self_signed_meta_path(),
            serde_json::to_string_pretty(&meta)?.as_bytes(),
            false,
        )?;

        info!(expires = %material.expires, "Saved self-signed certificate");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Write via a temporary file in the same directory and rename over `path`
    fn write_atomic(&self, path: &Path, contents: &[u8], private: bool) -> Result<(), StorageError> {
        let mut tmp = NamedTempFile::new_in(&self.base_path)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = if private { 0o600 } else { 0o644 };
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(mode))?;
        }
        #[cfg(not(unix))]
        let _ = private;

        tmp.persist(path)?;
        Ok(())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), StorageError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
