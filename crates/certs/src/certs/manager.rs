//! Certificate manager
//!
//! [`CertManager`] is a cheap, cloneable handle. All certificate state lives
//! in a single [`ManagerTask`] that receives [`Command`]s over a channel, so
//! sweeps, finished generations and signing responses are applied one at a
//! time without locks. Key generation runs on the blocking pool and CSR
//! submissions in their own tasks; both report back as commands.
//!
//! Consumers read certificates through [`CertManager::get`], which looks at
//! a published snapshot and never waits for the task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use yombo_common::{KeySpec, SslName};
use yombo_config::{
    check_requirement, CertificatesConfig, Config, MAX_DELAY_SECS, MAX_GENERATION_ATTEMPTS,
    MAX_INTERVAL_HOURS, MAX_RENEW_BEFORE_DAYS,
};

use super::certificate::{
    CertAction, CertIdentity, CertificateBundle, CertificateStatus, EvalContext,
    ManagedCertificate, UpdateCallback,
};
use super::context::GatewayContext;
use super::debounce::Debouncer;
use super::error::{CertError, DeclareError, GenerationError, SigningError, StorageError};
use super::generation::Slot;
use super::generator::{generate_csr_async, CsrRequest, GeneratedRequest};
use super::metrics::CertMetrics;
use super::scheduler::SweepScheduler;
use super::selfsigned::{ensure_fallback, fallback_bundle};
use super::signing::{PendingResponses, SignedResponse, SigningChannel};
use super::storage::{Artifact, CertificateStorage, Restored};

/// Timing and policy knobs for the manager
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub renew_before: chrono::Duration,
    pub resubmit_after: chrono::Duration,
    pub generation_retry: Duration,
    pub generation_max_attempts: u32,
    pub write_debounce: Duration,
    pub write_max_delay: Duration,
    pub unknown_response_ttl: Duration,
    pub sweep_interval: Duration,
    pub metrics_file: Option<PathBuf>,
    pub fallback_key: KeySpec,
}

impl ManagerSettings {
    /// Settings outside the limits `Config::validate` enforces are clamped
    pub fn from_config(config: &CertificatesConfig) -> Self {
        let secs = |value: u64| Duration::from_secs(value.min(MAX_DELAY_SECS));
        let hours = config.resubmit_after_hours.min(MAX_INTERVAL_HOURS);
        let sweep_hours = config.sweep_interval_hours.min(MAX_INTERVAL_HOURS);
        Self {
            renew_before: chrono::Duration::days(i64::from(
                config.renew_before_days.min(MAX_RENEW_BEFORE_DAYS),
            )),
            resubmit_after: chrono::Duration::hours(hours as i64),
            generation_retry: secs(config.generation_retry_secs),
            generation_max_attempts: config
                .generation_max_attempts
                .clamp(1, MAX_GENERATION_ATTEMPTS),
            write_debounce: secs(config.write_debounce_secs),
            write_max_delay: secs(config.write_max_delay_secs),
            unknown_response_ttl: secs(config.unknown_response_ttl_secs),
            sweep_interval: Duration::from_secs(sweep_hours * 3600),
            metrics_file: config.metrics_file.clone(),
            fallback_key: config.fallback,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&CertificatesConfig::default())
    }
}

/// A certificate a consumer wants managed
#[derive(Clone)]
pub struct Declaration {
    pub sslname: SslName,
    pub common_name: String,
    pub sans: Vec<String>,
    pub key: KeySpec,
    pub callback: Option<UpdateCallback>,
}

impl Declaration {
    pub fn new(sslname: impl Into<SslName>, common_name: impl Into<String>) -> Self {
        Self {
            sslname: sslname.into(),
            common_name: common_name.into(),
            sans: Vec::new(),
            key: KeySpec::default(),
            callback: None,
        }
    }

    pub fn with_sans<I, S>(mut self, sans: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sans = sans.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_key(mut self, key: KeySpec) -> Self {
        self.key = key;
        self
    }

    /// Called with the new materials every time a certificate is promoted
    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CertificateBundle) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    fn identity(&self) -> CertIdentity {
        CertIdentity {
            common_name: self.common_name.clone(),
            sans: self.sans.clone(),
            key: self.key,
        }
    }
}

impl std::fmt::Debug for Declaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Declaration")
            .field("sslname", &self.sslname)
            .field("common_name", &self.common_name)
            .field("sans", &self.sans)
            .field("key", &self.key)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Messages to the manager task
enum Command {
    Declare(Declaration),
    Sweep {
        ack: Option<oneshot::Sender<()>>,
    },
    Deliver {
        response: SignedResponse,
        ack: oneshot::Sender<Result<(), SigningError>>,
    },
    GenerationDone {
        sslname: SslName,
        seq: u64,
        fqdn: Option<String>,
        result: Result<GeneratedRequest, GenerationError>,
    },
    RetryGeneration {
        sslname: SslName,
        seq: u64,
    },
    SubmissionFailed {
        sslname: SslName,
        csr_hash: String,
    },
    Status {
        sslname: Option<SslName>,
        reply: oneshot::Sender<Vec<CertificateStatus>>,
    },
    Stop {
        ack: oneshot::Sender<()>,
    },
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    published: Arc<DashMap<SslName, Arc<CertificateBundle>>>,
    fallback: Arc<CertificateBundle>,
    context: Arc<GatewayContext>,
    metrics: CertMetrics,
    shutdown: CancellationToken,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the certificate manager
#[derive(Clone)]
pub struct CertManager {
    inner: Arc<Inner>,
}

impl CertManager {
    /// Prepare the fallback certificate, then start the manager task and
    /// the periodic sweep
    pub async fn start(
        context: Arc<GatewayContext>,
        storage: CertificateStorage,
        settings: ManagerSettings,
        signer: Arc<dyn SigningChannel>,
    ) -> Result<Self, CertError> {
        let storage = Arc::new(storage);

        let fallback_cn = context.fqdn().unwrap_or_else(|| "localhost".to_string());
        let material =
            ensure_fallback(storage.clone(), fallback_cn, settings.fallback_key, Utc::now())
                .await?;
        let fallback = Arc::new(fallback_bundle(&material, &storage));

        let metrics = CertMetrics::new()?;
        let published = Arc::new(DashMap::new());
        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();

        let task = ManagerTask {
            context: context.clone(),
            storage,
            pending: PendingResponses::new(settings.unknown_response_ttl),
            signer,
            metrics: metrics.clone(),
            published: published.clone(),
            commands: tx.downgrade(),
            rx,
            certs: HashMap::new(),
            settings: settings.clone(),
        };
        let handle = tokio::spawn(task.run());

        let manager = Self {
            inner: Arc::new(Inner {
                commands: tx,
                published,
                fallback,
                context,
                metrics,
                shutdown: shutdown.clone(),
                task: parking_lot::Mutex::new(Some(handle)),
            }),
        };

        let scheduler = SweepScheduler::new(manager.clone()).with_interval(settings.sweep_interval);
        tokio::spawn(scheduler.run(shutdown));

        info!(
            gateway_id = %manager.inner.context.gateway_id(),
            fqdn = ?manager.inner.context.fqdn(),
            "Certificate manager running"
        );
        Ok(manager)
    }

    /// Start from configuration and declare every configured certificate
    pub async fn from_config(
        config: &Config,
        signer: Arc<dyn SigningChannel>,
    ) -> Result<Self, CertError> {
        let context = Arc::new(GatewayContext::from_config(config));
        let storage = CertificateStorage::new(&config.certificates.directory)?;
        let settings = ManagerSettings::from_config(&config.certificates);
        let manager = Self::start(context, storage, settings, signer).await?;

        for req in &config.certificates.requirements {
            manager.declare(
                Declaration::new(req.sslname.as_str(), req.common_name.as_str())
                    .with_sans(req.sans.iter().cloned())
                    .with_key(req.key),
            )?;
        }
        Ok(manager)
    }

    /// Stop the sweep, write everything pending and end the manager task
    pub async fn stop(&self) -> Result<(), CertError> {
        self.inner.shutdown.cancel();

        let (ack, done) = oneshot::channel();
        if self.inner.commands.send(Command::Stop { ack }).is_err() {
            return Ok(());
        }
        done.await.map_err(|_| CertError::ManagerStopped)?;

        let handle = self.inner.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Certificate manager task failed");
            }
        }
        Ok(())
    }

    /// Register or update a certificate requirement
    ///
    /// Validation happens here, synchronously, against the live FQDN.
    pub fn declare(&self, declaration: Declaration) -> Result<(), DeclareError> {
        let fqdn = self.inner.context.fqdn();
        check_requirement(
            declaration.sslname.as_str(),
            &declaration.common_name,
            &declaration.key,
            fqdn.as_deref(),
        )?;

        debug!(sslname = %declaration.sslname, "Certificate declared");
        self.inner
            .commands
            .send(Command::Declare(declaration))
            .map_err(|_| DeclareError::ManagerStopped)
    }

    /// Current materials for a name, or the self-signed fallback
    pub fn get(&self, sslname: &str) -> Arc<CertificateBundle> {
        let now = Utc::now();
        match self.inner.published.get(sslname) {
            Some(bundle) if bundle.expires.is_some_and(|e| now < e) => Arc::clone(bundle.value()),
            _ => Arc::clone(&self.inner.fallback),
        }
    }

    pub fn fallback(&self) -> Arc<CertificateBundle> {
        Arc::clone(&self.inner.fallback)
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.inner.context
    }

    pub fn metrics(&self) -> &CertMetrics {
        &self.inner.metrics
    }

    /// Change the gateway FQDN and re-evaluate every certificate
    pub fn set_fqdn(&self, fqdn: Option<String>) {
        if self.inner.context.set_fqdn(fqdn) {
            let _ = self.inner.commands.send(Command::Sweep { ack: None });
        }
    }

    /// Evaluate every certificate now. Resolves once the pass is applied.
    pub async fn sweep(&self) -> Result<(), CertError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Sweep { ack: Some(ack) })
            .map_err(|_| CertError::ManagerStopped)?;
        done.await.map_err(|_| CertError::ManagerStopped)
    }

    /// Hand a signing response to the manager
    pub async fn deliver(&self, response: SignedResponse) -> Result<(), SigningError> {
        let (ack, done) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Deliver { response, ack })
            .map_err(|_| SigningError::Unavailable("certificate manager stopped".to_string()))?;
        done.await
            .map_err(|_| SigningError::Unavailable("certificate manager stopped".to_string()))?
    }

    pub async fn status(&self, sslname: &str) -> Result<Option<CertificateStatus>, CertError> {
        let mut statuses = self.query_status(Some(SslName::from(sslname))).await?;
        Ok(statuses.pop())
    }

    pub async fn statuses(&self) -> Result<Vec<CertificateStatus>, CertError> {
        self.query_status(None).await
    }

    async fn query_status(
        &self,
        sslname: Option<SslName>,
    ) -> Result<Vec<CertificateStatus>, CertError> {
        let (reply, done) = oneshot::channel();
        self.inner
            .commands
            .send(Command::Status { sslname, reply })
            .map_err(|_| CertError::ManagerStopped)?;
        done.await.map_err(|_| CertError::ManagerStopped)
    }
}

impl std::fmt::Debug for CertManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertManager")
            .field("gateway_id", &self.inner.context.gateway_id())
            .field("published", &self.inner.published.len())
            .finish()
    }
}

// =============================================================================
// Manager task
// =============================================================================

struct Entry {
    cert: ManagedCertificate,
    writes: Debouncer,
}

/// Owner of all certificate state
struct ManagerTask {
    context: Arc<GatewayContext>,
    storage: Arc<CertificateStorage>,
    settings: ManagerSettings,
    signer: Arc<dyn SigningChannel>,
    metrics: CertMetrics,
    published: Arc<DashMap<SslName, Arc<CertificateBundle>>>,
    /// Weak, so the task ends once every handle is gone
    commands: mpsc::WeakUnboundedSender<Command>,
    rx: mpsc::UnboundedReceiver<Command>,
    certs: HashMap<SslName, Entry>,
    pending: PendingResponses,
}

impl ManagerTask {
    async fn run(mut self) {
        debug!("Certificate manager task started");

        loop {
            let deadline = self.next_write_deadline();
            tokio::select! {
                command = self.rx.recv() => {
                    let running = match command {
                        Some(command) => self.handle(command),
                        None => {
                            self.flush_all();
                            false
                        }
                    };
                    if !running {
                        break;
                    }
                }
                _ = sleep_until(deadline) => self.flush_due(Instant::now()),
            }
        }

        info!(certificates = self.certs.len(), "Certificate manager stopped");
    }

    /// Returns false once the task should exit
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Declare(declaration) => self.declare(declaration),
            Command::Sweep { ack } => {
                self.sweep();
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Command::Deliver { response, ack } => {
                let result = self.apply_response(response);
                let _ = ack.send(result);
            }
            Command::GenerationDone {
                sslname,
                seq,
                fqdn,
                result,
            } => {
                self.metrics.record_generation(result.is_ok());
                self.with_cert(&sslname, |cert, ctx| match result {
                    Ok(generated) => cert.complete_generation(seq, fqdn, generated, ctx),
                    Err(e) => cert.generation_failed(seq, &e, ctx),
                });
            }
            Command::RetryGeneration { sslname, seq } => {
                self.with_cert(&sslname, |cert, _| cert.retry_generation(seq));
            }
            Command::SubmissionFailed { sslname, csr_hash } => {
                self.with_cert(&sslname, |cert, _| cert.submission_failed(&csr_hash));
            }
            Command::Status { sslname, reply } => {
                let now = Utc::now();
                let statuses = match sslname {
                    Some(name) => self
                        .certs
                        .get(&name)
                        .map(|e| vec![e.cert.status(now)])
                        .unwrap_or_default(),
                    None => {
                        let mut all: Vec<_> =
                            self.certs.values().map(|e| e.cert.status(now)).collect();
                        all.sort_by(|a, b| a.sslname.cmp(&b.sslname));
                        all
                    }
                };
                let _ = reply.send(statuses);
            }
            Command::Stop { ack } => {
                self.flush_all();
                let _ = ack.send(());
                return false;
            }
        }
        true
    }

    fn eval_context(&self) -> EvalContext {
        EvalContext {
            now: Utc::now(),
            fqdn: self.context.fqdn(),
            renew_before: self.settings.renew_before,
            resubmit_after: self.settings.resubmit_after,
            retry_delay: self.settings.generation_retry,
            max_attempts: self.settings.generation_max_attempts,
        }
    }

    /// Run `f` against one certificate and carry out what it asks for
    fn with_cert<F>(&mut self, sslname: &SslName, f: F)
    where
        F: FnOnce(&mut ManagedCertificate, &EvalContext) -> Vec<CertAction>,
    {
        let ctx = self.eval_context();
        let Some(entry) = self.certs.get_mut(sslname) else {
            trace!(sslname = %sslname, "Ignoring event for unknown certificate");
            return;
        };
        let actions = f(&mut entry.cert, &ctx);
        self.apply(sslname, actions);
    }

    fn declare(&mut self, declaration: Declaration) {
        let sslname = declaration.sslname.clone();
        let identity = declaration.identity();

        if self.certs.contains_key(&sslname) {
            let callback = declaration.callback;
            self.with_cert(&sslname, |cert, ctx| {
                let mut actions = cert.update_identity(identity, callback, ctx.now);
                actions.extend(cert.evaluate(ctx));
                actions
            });
            return;
        }

        let mut cert = ManagedCertificate::new(sslname.clone(), identity, declaration.callback);
        for slot in Slot::ALL {
            match self.storage.restore_generation(sslname.as_str(), slot) {
                Restored::Loaded(generation) => cert.restore(slot, generation),
                Restored::Purged => self.metrics.record_corruption_purge(),
                Restored::Missing => {}
            }
        }

        info!(sslname = %sslname, common_name = %cert.identity().common_name, "Managing certificate");
        self.certs.insert(
            sslname.clone(),
            Entry {
                cert,
                writes: Debouncer::new(self.settings.write_debounce, self.settings.write_max_delay),
            },
        );
        self.metrics.set_managed(self.certs.len());
        self.publish(&sslname);

        self.with_cert(&sslname, |cert, ctx| cert.evaluate(ctx));

        let buffered = self.pending.drain(&sslname, Instant::now());
        self.metrics.set_pending_responses(self.pending.len());
        for response in buffered {
            debug!(sslname = %sslname, "Applying buffered signing response");
            if let Err(e) = self.apply_response(response) {
                warn!(sslname = %sslname, error = %e, "Buffered signing response rejected");
            }
        }
    }

    fn sweep(&mut self) {
        let started = std::time::Instant::now();
        self.pending.prune(Instant::now());

        let names: Vec<SslName> = self.certs.keys().cloned().collect();
        for sslname in &names {
            self.with_cert(sslname, |cert, ctx| cert.evaluate(ctx));
            self.publish(sslname);
        }

        self.metrics.set_managed(self.certs.len());
        self.metrics.set_pending_responses(self.pending.len());
        if let Some(path) = &self.settings.metrics_file {
            if let Err(e) = self.metrics.write_textfile(path) {
                warn!(path = %path.display(), error = %e, "Failed to write metrics file");
            }
        }

        debug!(
            certificates = names.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Certificate sweep finished"
        );
    }

    fn apply_response(&mut self, response: SignedResponse) -> Result<(), SigningError> {
        let sslname = response.sslname.clone();
        if !self.certs.contains_key(&sslname) {
            self.pending.push(response, Instant::now());
            self.metrics.set_pending_responses(self.pending.len());
            return Ok(());
        }

        let ctx = self.eval_context();
        let result = match self.certs.get_mut(&sslname) {
            Some(entry) => entry.cert.apply_signed(response, &ctx),
            None => return Ok(()),
        };

        match result {
            Ok(actions) => {
                self.apply(&sslname, actions);
                Ok(())
            }
            Err(e) => {
                warn!(sslname = %sslname, error = %e, "Discarding signing response");
                Err(e)
            }
        }
    }

    // =========================================================================
    // Actions
    // =========================================================================

    fn apply(&mut self, sslname: &SslName, actions: Vec<CertAction>) {
        let mut notify = false;

        for action in actions {
            match action {
                CertAction::Generate { seq } => self.spawn_generation(sslname, seq),
                CertAction::RetryGeneration { seq, delay } => {
                    self.spawn_retry(sslname.clone(), seq, delay)
                }
                CertAction::Submit(submission) => self.spawn_submission(submission),
                CertAction::Persist => {
                    if let Some(entry) = self.certs.get_mut(sslname) {
                        entry.writes.trigger(Instant::now());
                    }
                }
                CertAction::PersistNow => self.flush(sslname),
                CertAction::Notify => {
                    self.metrics.record_promotion();
                    notify = true;
                }
                CertAction::Purged(slot) => {
                    if let Err(e) = self.storage.purge_slot(sslname.as_str(), slot) {
                        warn!(sslname = %sslname, slot = %slot, error = %e, "Failed to purge slot files");
                    }
                }
            }
        }

        if notify {
            // Consumers may read the files as soon as they are told
            self.flush(sslname);
        }

        let bundle = self.publish(sslname);
        if notify {
            if let (Some(bundle), Some(entry)) = (bundle, self.certs.get(sslname)) {
                if let Some(callback) = entry.cert.callback() {
                    callback(&bundle);
                }
            }
        }
    }

    /// Refresh the snapshot used by [`CertManager::get`]
    fn publish(&self, sslname: &SslName) -> Option<Arc<CertificateBundle>> {
        let entry = self.certs.get(sslname)?;
        match entry.cert.bundle(Utc::now()) {
            Some(mut bundle) => {
                let name = sslname.as_str();
                bundle.key_path = Some(self.storage.artifact_path(name, Slot::Current, Artifact::Key));
                bundle.cert_path =
                    Some(self.storage.artifact_path(name, Slot::Current, Artifact::Cert));
                bundle.chain_path =
                    Some(self.storage.artifact_path(name, Slot::Current, Artifact::Chain));
                let bundle = Arc::new(bundle);
                self.published.insert(sslname.clone(), Arc::clone(&bundle));
                Some(bundle)
            }
            None => {
                self.published.remove(sslname);
                None
            }
        }
    }

    fn spawn_generation(&self, sslname: &SslName, seq: u64) {
        let Some(entry) = self.certs.get(sslname) else {
            return;
        };
        let identity = entry.cert.identity();
        let fqdn = self.context.fqdn();
        let request = CsrRequest {
            common_name: identity.common_name.clone(),
            sans: identity.sans.clone(),
            key: identity.key,
            fqdn: fqdn.clone(),
            organizational_unit: self.context.organizational_unit(),
            subject: self.context.subject().clone(),
        };

        let commands = self.commands.clone();
        let sslname = sslname.clone();
        tokio::spawn(async move {
            let result = generate_csr_async(request).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::GenerationDone {
                    sslname,
                    seq,
                    fqdn,
                    result,
                });
            }
        });
    }

    fn spawn_retry(&self, sslname: SslName, seq: u64, delay: Duration) {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::RetryGeneration { sslname, seq });
            }
        });
    }

    fn spawn_submission(&self, submission: super::signing::CsrSubmission) {
        let signer = Arc::clone(&self.signer);
        let commands = self.commands.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let sslname = submission.sslname.clone();
            let csr_hash = submission.csr_hash.clone();
            match signer.submit(submission).await {
                Ok(correlation_id) => {
                    metrics.record_submission(true);
                    debug!(
                        sslname = %sslname,
                        correlation_id = %correlation_id,
                        "CSR submitted"
                    );
                }
                Err(e) => {
                    metrics.record_submission(false);
                    warn!(sslname = %sslname, error = %e, "CSR submission failed");
                    if let Some(tx) = commands.upgrade() {
                        let _ = tx.send(Command::SubmissionFailed { sslname, csr_hash });
                    }
                }
            }
        });
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn next_write_deadline(&self) -> Option<Instant> {
        self.certs.values().filter_map(|e| e.writes.deadline()).min()
    }

    fn flush_due(&mut self, now: Instant) {
        let due: Vec<SslName> = self
            .certs
            .iter()
            .filter(|(_, e)| e.writes.is_due(now))
            .map(|(name, _)| name.clone())
            .collect();
        for sslname in due {
            self.flush(&sslname);
        }
    }

    fn flush_all(&mut self) {
        let dirty: Vec<SslName> = self
            .certs
            .iter()
            .filter(|(_, e)| e.writes.is_pending())
            .map(|(name, _)| name.clone())
            .collect();
        for sslname in dirty {
            self.flush(&sslname);
        }
    }

    /// Write all slots of one certificate now
    fn flush(&mut self, sslname: &SslName) {
        let Some(entry) = self.certs.get_mut(sslname) else {
            return;
        };
        entry.writes.take();

        if let Err(e) = write_slots(&self.storage, sslname, &entry.cert) {
            // Stay dirty; the next trigger or shutdown tries again
            error!(sslname = %sslname, error = %e, "Failed to write certificate files");
            entry.writes.trigger(Instant::now());
        }
    }
}

fn write_slots(
    storage: &CertificateStorage,
    sslname: &SslName,
    cert: &ManagedCertificate,
) -> Result<(), StorageError> {
    for slot in Slot::ALL {
        storage.save_generation(sslname.as_str(), slot, cert.generation(slot))?;
    }
    trace!(sslname = %sslname, "Wrote certificate files");
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
