//! Remote CSR signing
//!
//! The signing service lives on the other side of a message channel. CSRs
//! go out through a [`SigningChannel`]; signed certificates come back
//! asynchronously and are handed to [`CertManager::deliver`].
//!
//! [`SpoolSigningChannel`] is a directory based channel for the standalone
//! daemon: requests are dropped into `outbox/`, responses are picked up
//! from `inbox/`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use yombo_common::{CorrelationId, SslName};

use super::error::SigningError;
use super::manager::CertManager;

/// Response status of a signed certificate
pub const STATUS_SIGNED: &str = "signed";

/// A CSR on its way to the signing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrSubmission {
    pub sslname: SslName,
    pub csr_text: String,
    /// SHA-256 hex of `csr_text`, echoed back in the response
    pub csr_hash: String,
}

/// Answer from the signing service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedResponse {
    pub sslname: SslName,
    pub status: String,
    #[serde(default)]
    pub status_msg: Option<String>,
    #[serde(default)]
    pub cert_text: Option<String>,
    #[serde(default)]
    pub chain_text: Option<String>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub cert_signed: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub cert_expires: Option<DateTime<Utc>>,
    /// Hash of the CSR this response answers
    #[serde(default)]
    pub csr_hash: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<CorrelationId>,
}

impl SignedResponse {
    pub fn is_signed(&self) -> bool {
        self.status == STATUS_SIGNED
    }
}

/// Outbound half of the signing channel
#[async_trait]
pub trait SigningChannel: Send + Sync {
    /// Send a CSR for signing. Returns the id the request was sent under.
    async fn submit(&self, request: CsrSubmission) -> Result<CorrelationId, SigningError>;
}

// =============================================================================
// Responses for names not declared yet
// =============================================================================

/// Signed responses that arrived before their certificate was declared
///
/// Entries older than the TTL are dropped.
#[derive(Debug)]
pub struct PendingResponses {
    responses: HashMap<SslName, Vec<(Instant, SignedResponse)>>,
    ttl: Duration,
}

impl PendingResponses {
    pub fn new(ttl: Duration) -> Self {
        Self {
            responses: HashMap::new(),
            ttl,
        }
    }

    pub fn push(&mut self, response: SignedResponse, now: Instant) {
        debug!(sslname = %response.sslname, "Buffering response for undeclared certificate");
        self.prune(now);
        self.responses
            .entry(response.sslname.clone())
            .or_default()
            .push((now, response));
    }

    /// Remove and return the unexpired responses for a name
    pub fn drain(&mut self, sslname: &SslName, now: Instant) -> Vec<SignedResponse> {
        let ttl = self.ttl;
        self.responses
            .remove(sslname)
            .unwrap_or_default()
            .into_iter()
            .filter(|(at, _)| now.duration_since(*at) < ttl)
            .map(|(_, response)| response)
            .collect()
    }

    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.responses.retain(|_, entries| {
            entries.retain(|(at, _)| now.duration_since(*at) < ttl);
            !entries.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.responses.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

// =============================================================================
// Spool directory channel
// =============================================================================

/// Request file written to the outbox
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SpoolRequest {
    correlation_id: CorrelationId,
    #[serde(flatten)]
    submission: CsrSubmission,
}

/// Filesystem spool used by the daemon to talk to the signing service
#[derive(Debug, Clone)]
pub struct SpoolSigningChannel {
    outbox: PathBuf,
    inbox: PathBuf,
    poll_interval: Duration,
}

impl SpoolSigningChannel {
    /// Open a spool directory, creating `outbox/` and `inbox/`
    pub fn new(spool: &Path, poll_interval: Duration) -> Result<Self, SigningError> {
        let outbox = spool.join("outbox");
        let inbox = spool.join("inbox");
        std::fs::create_dir_all(&outbox)?;
        std::fs::create_dir_all(&inbox)?;

        info!(spool = %spool.display(), "Initialized signing spool");
        Ok(Self {
            outbox,
            inbox,
            poll_interval,
        })
    }

    pub fn outbox(&self) -> &Path {
        &self.outbox
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Deliver every response currently in the inbox
    ///
    /// Returns the number of responses handed to the manager.
    pub async fn poll_inbox(&self, manager: &CertManager) -> Result<usize, SigningError> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.inbox).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut delivered = 0;
        for path in paths {
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<SignedResponse>(&content) {
                Ok(response) => {
                    let sslname = response.sslname.clone();
                    if let Err(e) = manager.deliver(response).await {
                        warn!(sslname = %sslname, error = %e, "Signing response was not applied");
                    }
                    tokio::fs::remove_file(&path).await?;
                    delivered += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Rejecting malformed signing response");
                    tokio::fs::rename(&path, path.with_extension("rejected")).await?;
                }
            }
        }

        if delivered > 0 {
            debug!(count = delivered, "Delivered spooled signing responses");
        }
        Ok(delivered)
    }

    /// Poll the inbox until cancelled
    pub async fn run(self, manager: CertManager, shutdown: CancellationToken) {
        info!(
            inbox = %self.inbox.display(),
            poll_interval_secs = self.poll_interval.as_secs(),
            "Starting signing spool poller"
        );

        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.poll_inbox(&manager).await {
                        warn!(error = %e, "Failed to poll signing spool");
                    }
                }
            }
        }

        debug!("Signing spool poller stopped");
    }
}

#[async_trait]
impl SigningChannel for SpoolSigningChannel {
    async fn submit(&self, request: CsrSubmission) -> Result<CorrelationId, SigningError> {
        let correlation_id = CorrelationId::new();
        let sslname = request.sslname.clone();
        let record = SpoolRequest {
            correlation_id: correlation_id.clone(),
            submission: request,
        };
        let content = serde_json::to_vec_pretty(&record)?;

        // Write under a dot name and rename so readers never see half a file
        let final_path = self.outbox.join(format!("{}.json", correlation_id));
        let tmp_path = self.outbox.join(format!(".{}.json.tmp", correlation_id));
        tokio::fs::write(&tmp_path, content).await?;
        tokio::fs::rename(&tmp_path, &final_path).await?;

        trace!(
            sslname = %sslname,
            correlation_id = %correlation_id,
            "Spooled CSR for signing"
        );
        Ok(correlation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(name: &str) -> SignedResponse {
        SignedResponse {
            sslname: SslName::from(name),
            status: STATUS_SIGNED.to_string(),
            status_msg: None,
            cert_text: Some("cert".into()),
            chain_text: Some("chain".into()),
            cert_signed: None,
            cert_expires: None,
            csr_hash: None,
            correlation_id: None,
        }
    }

    #[test]
    fn test_pending_drain_returns_buffered() {
        let now = Instant::now();
        let mut pending = PendingResponses::new(Duration::from_secs(600));
        pending.push(response("web"), now);
        pending.push(response("web"), now);
        pending.push(response("mqtt"), now);
        assert_eq!(pending.len(), 3);

        let drained = pending.drain(&SslName::from("web"), now + Duration::from_secs(10));
        assert_eq!(drained.len(), 2);
        assert_eq!(pending.len(), 1);
        assert!(pending.drain(&SslName::from("web"), now).is_empty());
    }

    #[test]
    fn test_pending_ttl_expires() {
        let now = Instant::now();
        let mut pending = PendingResponses::new(Duration::from_secs(600));
        pending.push(response("web"), now);

        let later = now + Duration::from_secs(601);
        assert!(pending.drain(&SslName::from("web"), later).is_empty());

        pending.push(response("mqtt"), now);
        pending.prune(later);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_response_wire_format() {
        let json = r#"{
            "sslname": "lib_webinterface",
            "status": "signed",
            "cert_text": "CERT",
            "chain_text": "CHAIN",
            "cert_signed": 1700000000,
            "cert_expires": 1800000000
        }"#;
        let parsed: SignedResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.is_signed());
        assert_eq!(parsed.sslname.as_str(), "lib_webinterface");
        assert_eq!(parsed.cert_expires.map(|t| t.timestamp()), Some(1_800_000_000));
        assert!(parsed.csr_hash.is_none());
    }

    #[tokio::test]
    async fn test_spool_submit_writes_outbox() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolSigningChannel::new(dir.path(), Duration::from_secs(1)).unwrap();

        let id = spool
            .submit(CsrSubmission {
                sslname: SslName::from("web"),
                csr_text: "CSR".into(),
                csr_hash: "abc".into(),
            })
            .await
            .unwrap();

        let path = spool.outbox().join(format!("{}.json", id));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["sslname"], "web");
        assert_eq!(written["csr_text"], "CSR");
        assert_eq!(written["csr_hash"], "abc");
        assert_eq!(written["correlation_id"], id.as_str());
        assert_eq!(std::fs::read_dir(spool.outbox()).unwrap().count(), 1);
    }
}
