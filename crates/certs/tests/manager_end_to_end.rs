//! Certificate manager scenarios driven through the public handle, with a
//! recording signing channel and a throwaway CA standing in for the
//! signing service.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType, IsCa, Issuer,
    KeyPair,
};
use tokio::sync::mpsc;

use yombo_certs::certs::{
    certificate_expiry, Artifact, CertificateStorage, CsrSubmission, GatewayContext,
    GenerationState, ManagerSettings, SignedResponse, SigningChannel, Slot, SpoolSigningChannel,
    STATUS_SIGNED,
};
use yombo_certs::{CertManager, Declaration, DeclareError, SigningError};
use yombo_common::{CorrelationId, KeySpec};
use yombo_config::SubjectConfig;

const NAME: &str = "lib_webinterface";
const CN: &str = "gw.example.com";

struct RecordingSigner {
    tx: mpsc::UnboundedSender<CsrSubmission>,
}

#[async_trait]
impl SigningChannel for RecordingSigner {
    async fn submit(&self, request: CsrSubmission) -> Result<CorrelationId, SigningError> {
        self.tx
            .send(request)
            .map_err(|e| SigningError::Unavailable(e.to_string()))?;
        Ok(CorrelationId::new())
    }
}

struct TestCa {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
}

impl TestCa {
    fn new() -> Self {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(DnType::CommonName, "Yombo Test CA");
        let cert = params.self_signed(&key).unwrap();
        Self {
            issuer: Issuer::new(params, key),
            cert_pem: cert.pem(),
        }
    }

    fn sign(&self, submission: &CsrSubmission) -> SignedResponse {
        let mut csr = CertificateSigningRequestParams::from_pem(&submission.csr_text).unwrap();
        let now = time::OffsetDateTime::now_utc();
        csr.params.not_before = now - time::Duration::hours(1);
        csr.params.not_after = now + time::Duration::days(365);
        let cert_pem = csr.signed_by(&self.issuer).unwrap().pem();

        SignedResponse {
            sslname: submission.sslname.clone(),
            status: STATUS_SIGNED.to_string(),
            status_msg: None,
            cert_expires: Some(certificate_expiry(&cert_pem).unwrap()),
            cert_text: Some(cert_pem),
            chain_text: Some(self.cert_pem.clone()),
            cert_signed: Some(Utc::now()),
            csr_hash: Some(submission.csr_hash.clone()),
            correlation_id: None,
        }
    }
}

fn settings() -> ManagerSettings {
    ManagerSettings {
        fallback_key: KeySpec::ecdsa(),
        write_debounce: Duration::from_millis(10),
        write_max_delay: Duration::from_millis(50),
        ..ManagerSettings::default()
    }
}

async fn start(
    dir: &Path,
    settings: ManagerSettings,
) -> (CertManager, mpsc::UnboundedReceiver<CsrSubmission>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let context = Arc::new(GatewayContext::new(
        "gw_testing0000000000",
        Some("example.com".into()),
        SubjectConfig::default(),
    ));
    let manager = CertManager::start(
        context,
        CertificateStorage::new(dir).unwrap(),
        settings,
        Arc::new(RecordingSigner { tx }),
    )
    .await
    .unwrap();
    (manager, rx)
}

fn declaration() -> Declaration {
    Declaration::new(NAME, CN)
        .with_sans(["www.gw.example.com"])
        .with_key(KeySpec::ecdsa())
}

async fn next_submission(rx: &mut mpsc::UnboundedReceiver<CsrSubmission>) -> CsrSubmission {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("no CSR submitted in time")
        .expect("signing channel closed")
}

/// Poll until the `next` slot reaches `state`
async fn wait_for_next(manager: &CertManager, state: GenerationState) {
    for _ in 0..300 {
        let status = manager.status(NAME).await.unwrap().unwrap();
        let next = status.slots.iter().find(|s| s.slot == Slot::Next).unwrap();
        if next.state == state && !status.generation_in_progress {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("next slot never reached {state}");
}

#[tokio::test]
async fn test_declare_sign_promote_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let ca = TestCa::new();
    let (manager, mut rx) = start(dir.path(), settings()).await;

    let updates = Arc::new(AtomicUsize::new(0));
    let counter = updates.clone();
    manager
        .declare(declaration().on_update(move |bundle| {
            assert!(!bundle.self_signed);
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

    // Nothing signed yet
    assert!(manager.get(NAME).self_signed);

    let submission = next_submission(&mut rx).await;
    assert_eq!(submission.sslname.as_str(), NAME);
    assert!(submission.csr_text.contains("BEGIN CERTIFICATE REQUEST"));

    let response = ca.sign(&submission);
    let cert_pem = response.cert_text.clone().unwrap();
    manager.deliver(response).await.unwrap();

    let bundle = manager.get(NAME);
    assert!(!bundle.self_signed);
    assert_eq!(bundle.cert, cert_pem);
    assert_eq!(bundle.chain.as_deref(), Some(ca.cert_pem.as_str()));
    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(manager.metrics().promotions(), 1);

    // Promotion writes before the callback runs
    let storage = CertificateStorage::new(dir.path()).unwrap();
    let cert_path = storage.artifact_path(NAME, Slot::Current, Artifact::Cert);
    assert_eq!(bundle.cert_path.as_deref(), Some(cert_path.as_path()));
    assert_eq!(std::fs::read_to_string(&cert_path).unwrap(), cert_pem);

    let status = manager.status(NAME).await.unwrap().unwrap();
    assert_eq!(status.common_name, CN);

    // Current is fresh, so the next sweep stages a CSR but keeps it local
    manager.sweep().await.unwrap();
    wait_for_next(&manager, GenerationState::CsrPending).await;
    manager.sweep().await.unwrap();
    assert!(rx.try_recv().is_err());
    let staged_csr = storage.artifact_path(NAME, Slot::Next, Artifact::Csr);
    assert!(std::fs::read_to_string(&staged_csr)
        .unwrap()
        .contains("BEGIN CERTIFICATE REQUEST"));
    assert!(storage.artifact_path(NAME, Slot::Next, Artifact::Key).exists());

    manager.stop().await.unwrap();

    // A new process picks up the stored certificate without signing again
    let (manager, mut rx) = start(dir.path(), settings()).await;
    manager.declare(declaration()).unwrap();
    manager.sweep().await.unwrap();

    let bundle = manager.get(NAME);
    assert!(!bundle.self_signed);
    assert_eq!(bundle.cert, cert_pem);
    assert!(rx.try_recv().is_err());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_undeclared_name_gets_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _rx) = start(dir.path(), settings()).await;

    let bundle = manager.get("lib_unknown");
    assert!(bundle.self_signed);
    assert!(bundle.cert.contains("BEGIN CERTIFICATE"));
    let storage = CertificateStorage::new(dir.path()).unwrap();
    assert_eq!(bundle.cert_path, Some(storage.self_signed_cert_path()));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_response_before_declaration_is_buffered() {
    let dir = tempfile::tempdir().unwrap();
    let ca = TestCa::new();

    // First run: CSR goes out, process stops before the answer arrives
    let (manager, mut rx) = start(dir.path(), settings()).await;
    manager.declare(declaration()).unwrap();
    let submission = next_submission(&mut rx).await;
    manager.stop().await.unwrap();

    // Second run: the answer shows up before the consumer declares again
    let (manager, mut rx) = start(dir.path(), settings()).await;
    manager.deliver(ca.sign(&submission)).await.unwrap();
    assert!(manager.get(NAME).self_signed);

    manager.declare(declaration()).unwrap();
    manager.sweep().await.unwrap();

    let bundle = manager.get(NAME);
    assert!(!bundle.self_signed);
    assert!(rx.try_recv().is_err());

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_fqdn_change_discards_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let ca = TestCa::new();
    let (manager, mut rx) = start(dir.path(), settings()).await;

    manager.declare(declaration()).unwrap();
    let submission = next_submission(&mut rx).await;
    manager.deliver(ca.sign(&submission)).await.unwrap();
    assert!(!manager.get(NAME).self_signed);

    manager.set_fqdn(Some("other.example.com".into()));
    manager.sweep().await.unwrap();

    assert!(manager.get(NAME).self_signed);
    let storage = CertificateStorage::new(dir.path()).unwrap();
    assert!(!storage
        .artifact_path(NAME, Slot::Current, Artifact::Cert)
        .exists());

    let resubmitted = next_submission(&mut rx).await;
    assert_eq!(resubmitted.sslname.as_str(), NAME);
    assert_ne!(resubmitted.csr_hash, submission.csr_hash);

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_declare_rejects_invalid_requirements() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _rx) = start(dir.path(), settings()).await;

    let err = manager
        .declare(Declaration::new(NAME, "gw.example.org").with_key(KeySpec::ecdsa()))
        .unwrap_err();
    assert!(matches!(err, DeclareError::Requirement(_)));

    let err = manager
        .declare(Declaration::new("bad name", CN).with_key(KeySpec::ecdsa()))
        .unwrap_err();
    assert!(matches!(err, DeclareError::Requirement(_)));

    let err = manager
        .declare(Declaration::new(NAME, CN).with_key(KeySpec::rsa(1024)))
        .unwrap_err();
    assert!(matches!(err, DeclareError::Requirement(_)));

    assert!(manager.statuses().await.unwrap().is_empty());

    manager.stop().await.unwrap();
    let err = manager.declare(declaration()).unwrap_err();
    assert!(matches!(err, DeclareError::ManagerStopped));
}

#[tokio::test]
async fn test_new_key_is_on_disk_before_submission() {
    let dir = tempfile::tempdir().unwrap();
    let slow_writes = ManagerSettings {
        write_debounce: Duration::from_secs(3600),
        write_max_delay: Duration::from_secs(7200),
        ..settings()
    };
    let (manager, mut rx) = start(dir.path(), slow_writes).await;

    manager.declare(declaration()).unwrap();
    let submission = next_submission(&mut rx).await;

    let storage = CertificateStorage::new(dir.path()).unwrap();
    let csr_path = storage.artifact_path(NAME, Slot::Next, Artifact::Csr);
    assert_eq!(std::fs::read_to_string(&csr_path).unwrap(), submission.csr_text);
    assert!(storage.artifact_path(NAME, Slot::Next, Artifact::Key).exists());
    let stored = storage.load_generation(NAME, Slot::Next).unwrap().unwrap();
    assert_eq!(stored.csr_hash.as_deref(), Some(submission.csr_hash.as_str()));

    manager.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_flushes_pending_writes() {
    let dir = tempfile::tempdir().unwrap();
    let slow_writes = ManagerSettings {
        write_debounce: Duration::from_secs(3600),
        write_max_delay: Duration::from_secs(7200),
        ..settings()
    };
    let (manager, mut rx) = start(dir.path(), slow_writes).await;

    manager.declare(declaration()).unwrap();
    let submission = next_submission(&mut rx).await;

    // A refusal only schedules a write
    manager
        .deliver(SignedResponse {
            sslname: submission.sslname.clone(),
            status: "failed".to_string(),
            status_msg: Some("domain not verified".to_string()),
            cert_text: None,
            chain_text: None,
            cert_expires: None,
            cert_signed: None,
            csr_hash: Some(submission.csr_hash.clone()),
            correlation_id: None,
        })
        .await
        .unwrap();

    let storage = CertificateStorage::new(dir.path()).unwrap();
    let stored = storage.load_generation(NAME, Slot::Next).unwrap().unwrap();
    assert_eq!(stored.status_msg, None);

    manager.stop().await.unwrap();

    let stored = storage.load_generation(NAME, Slot::Next).unwrap().unwrap();
    assert_eq!(stored.status_msg.as_deref(), Some("domain not verified"));
    assert_eq!(stored.status.as_deref(), Some("failed"));
}

#[tokio::test]
async fn test_spool_inbox_delivers_responses() {
    let dir = tempfile::tempdir().unwrap();
    let spool_dir = tempfile::tempdir().unwrap();
    let ca = TestCa::new();
    let (manager, mut rx) = start(dir.path(), settings()).await;
    let spool = SpoolSigningChannel::new(spool_dir.path(), Duration::from_secs(30)).unwrap();

    manager.declare(declaration()).unwrap();
    let submission = next_submission(&mut rx).await;

    let response = ca.sign(&submission);
    std::fs::write(
        spool.inbox().join("0001.json"),
        serde_json::to_vec(&response).unwrap(),
    )
    .unwrap();
    std::fs::write(spool.inbox().join("0002.json"), b"{ not json").unwrap();

    assert_eq!(spool.poll_inbox(&manager).await.unwrap(), 1);
    assert!(!spool.inbox().join("0001.json").exists());
    assert!(spool.inbox().join("0002.rejected").exists());
    assert!(!manager.get(NAME).self_signed);

    manager.stop().await.unwrap();
}
