//! Rotation policy for one managed certificate
//!
//! [`ManagedCertificate`] does no I/O. Every event (a sweep, a finished
//! key generation, a signing response) mutates the three slots and returns
//! the [`CertAction`]s the manager must carry out: spawn a generation, send
//! a CSR, schedule a write, notify the consumer.
//!
//! Decision order on every evaluation:
//!
//! 1. A slot generated for another FQDN is wiped and a new CSR is submitted
//!    immediately.
//! 2. A valid `next` is promoted to `current`.
//! 3. An empty (or broken) `next` is regenerated. The CSR is submitted right
//!    away only if `current` needs renewal; otherwise it is staged.
//! 4. A pending `next` is (re)submitted if `current` needs renewal and the
//!    last submission is older than the resubmission timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use yombo_common::{sha256_hex, KeySpec, SslName};

use super::error::{GenerationError, SigningError};
use super::generation::{needs_renewal, Generation, GenerationState, Slot, Validity};
use super::generator::GeneratedRequest;
use super::signing::{CsrSubmission, SignedResponse};

/// Consumer hook invoked whenever a new certificate becomes current
pub type UpdateCallback = Arc<dyn Fn(&CertificateBundle) + Send + Sync>;

/// What a certificate is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertIdentity {
    pub common_name: String,
    pub sans: Vec<String>,
    pub key: KeySpec,
}

/// Materials handed to consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub sslname: SslName,
    pub key: String,
    pub cert: String,
    pub chain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub signed: Option<DateTime<Utc>>,
    pub self_signed: bool,
    pub key_path: Option<PathBuf>,
    pub cert_path: Option<PathBuf>,
    pub chain_path: Option<PathBuf>,
}

/// Inputs to a policy decision
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    pub fqdn: Option<String>,
    pub renew_before: chrono::Duration,
    pub resubmit_after: chrono::Duration,
    pub retry_delay: Duration,
    pub max_attempts: u32,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertAction {
    /// Generate a key and CSR for `next`
    Generate { seq: u64 },
    /// Retry a failed generation after `delay`
    RetryGeneration { seq: u64, delay: Duration },
    /// Send the CSR to the signing service
    Submit(CsrSubmission),
    /// Schedule a (debounced) write of all slots
    Persist,
    /// Write all slots before carrying out the actions that follow
    PersistNow,
    /// A new certificate became current
    Notify,
    /// A slot was wiped; its files should go too
    Purged(Slot),
}

/// Read-only view of one slot
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: Slot,
    pub state: GenerationState,
    pub validity: Validity,
    pub expires_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

impl SlotStatus {
    pub fn of(slot: Slot, generation: &Generation, now: DateTime<Utc>) -> Self {
        let state = generation.state(now);
        Self {
            slot,
            state,
            validity: state.validity(),
            expires_at: generation.expires_at,
            signed_at: generation.signed_at,
            submitted_at: generation.submitted_at,
            status: generation.status.clone(),
        }
    }
}

/// Read-only view of a managed certificate
#[derive(Debug, Clone, Serialize)]
pub struct CertificateStatus {
    pub sslname: SslName,
    pub common_name: String,
    pub generation_in_progress: bool,
    pub slots: Vec<SlotStatus>,
}

/// One certificate and its previous/current/next generations
pub struct ManagedCertificate {
    sslname: SslName,
    identity: CertIdentity,
    previous: Generation,
    current: Generation,
    next: Generation,
    callback: Option<UpdateCallback>,
    generation_in_progress: bool,
    submit_after_generation: bool,
    generation_error_count: u32,
    /// Bumped for every generation request; stale results are dropped
    generation_seq: u64,
}

impl ManagedCertificate {
    pub fn new(sslname: SslName, identity: CertIdentity, callback: Option<UpdateCallback>) -> Self {
        Self {
            sslname,
            identity,
            previous: Generation::default(),
            current: Generation::default(),
            next: Generation::default(),
            callback,
            generation_in_progress: false,
            submit_after_generation: false,
            generation_error_count: 0,
            generation_seq: 0,
        }
    }

    pub fn sslname(&self) -> &SslName {
        &self.sslname
    }

    pub fn identity(&self) -> &CertIdentity {
        &self.identity
    }

    pub fn generation(&self, slot: Slot) -> &Generation {
        match slot {
            Slot::Previous => &self.previous,
            Slot::Current => &self.current,
            Slot::Next => &self.next,
        }
    }

    fn generation_mut(&mut self, slot: Slot) -> &mut Generation {
        match slot {
            Slot::Previous => &mut self.previous,
            Slot::Current => &mut self.current,
            Slot::Next => &mut self.next,
        }
    }

    /// Install a generation restored from disk
    pub fn restore(&mut self, slot: Slot, generation: Generation) {
        *self.generation_mut(slot) = generation;
    }

    pub fn callback(&self) -> Option<&UpdateCallback> {
        self.callback.as_ref()
    }

    pub fn generation_in_progress(&self) -> bool {
        self.generation_in_progress
    }

    pub fn submit_after_generation(&self) -> bool {
        self.submit_after_generation
    }

    pub fn generation_error_count(&self) -> u32 {
        self.generation_error_count
    }

    /// Current materials, if `current` is valid
    pub fn bundle(&self, now: DateTime<Utc>) -> Option<CertificateBundle> {
        if !self.current.is_valid(now) {
            return None;
        }
        Some(CertificateBundle {
            sslname: self.sslname.clone(),
            key: self.current.key.clone()?,
            cert: self.current.cert.clone()?,
            chain: self.current.chain.clone(),
            expires: self.current.expires_at,
            created: self.current.created_at,
            signed: self.current.signed_at,
            self_signed: false,
            key_path: None,
            cert_path: None,
            chain_path: None,
        })
    }

    pub fn status(&self, now: DateTime<Utc>) -> CertificateStatus {
        CertificateStatus {
            sslname: self.sslname.clone(),
            common_name: self.identity.common_name.clone(),
            generation_in_progress: self.generation_in_progress,
            slots: Slot::ALL
                .iter()
                .map(|slot| SlotStatus::of(*slot, self.generation(*slot), now))
                .collect(),
        }
    }

    // =========================================================================
    // Policy
    // =========================================================================

    /// Run the rotation policy
    pub fn evaluate(&mut self, ctx: &EvalContext) -> Vec<CertAction> {
        let mut actions = Vec::new();
        let now = ctx.now;

        let Some(fqdn) = ctx.fqdn.as_deref() else {
            debug!(sslname = %self.sslname, "Gateway FQDN unknown, skipping evaluation");
            return actions;
        };

        let mut force_submit = false;
        for slot in [Slot::Current, Slot::Next] {
            let generation = self.generation(slot);
            if generation.is_empty() {
                continue;
            }
            let same_domain = generation
                .fqdn
                .as_deref()
                .is_some_and(|f| f.eq_ignore_ascii_case(fqdn));
            if !same_domain {
                warn!(
                    sslname = %self.sslname,
                    slot = %slot,
                    old_fqdn = ?generation.fqdn,
                    new_fqdn = %fqdn,
                    "Certificate was issued for another domain, discarding"
                );
                actions.push(self.clean_section(slot));
                force_submit = true;
            }
        }

        if self.make_next_be_current(now) {
            actions.push(CertAction::Persist);
            actions.push(CertAction::Notify);
        }

        let urgent = force_submit || needs_renewal(&self.current, now, ctx.renew_before);

        match self.next.state(now) {
            GenerationState::Empty => actions.extend(self.request_generation(urgent)),
            GenerationState::Incomplete | GenerationState::Expired => {
                debug!(
                    sslname = %self.sslname,
                    state = %self.next.state(now),
                    "Next generation is unusable, regenerating"
                );
                actions.push(self.clean_section(Slot::Next));
                actions.extend(self.request_generation(urgent));
            }
            GenerationState::CsrPending | GenerationState::Submitted => {
                if urgent && self.submission_due(ctx) {
                    actions.extend(self.submit(now));
                } else {
                    trace!(
                        sslname = %self.sslname,
                        urgent = urgent,
                        "Next generation is waiting"
                    );
                }
            }
            // Promoted above
            GenerationState::Signed => {}
        }

        actions
    }

    fn request_generation(&mut self, submit: bool) -> Vec<CertAction> {
        if self.generation_in_progress {
            if submit && !self.submit_after_generation {
                debug!(sslname = %self.sslname, "Generation already running, will submit when done");
                self.submit_after_generation = true;
            }
            return Vec::new();
        }

        self.generation_in_progress = true;
        self.submit_after_generation = submit;
        self.generation_error_count = 0;
        self.generation_seq += 1;

        info!(
            sslname = %self.sslname,
            submit = submit,
            key = %self.identity.key,
            "Requesting new key and CSR"
        );
        vec![CertAction::Generate {
            seq: self.generation_seq,
        }]
    }

    fn submission_due(&self, ctx: &EvalContext) -> bool {
        match self.next.submitted_at {
            None => true,
            Some(at) => at
                .checked_add_signed(ctx.resubmit_after)
                .is_some_and(|due| due <= ctx.now),
        }
    }

    fn submit(&mut self, now: DateTime<Utc>) -> Vec<CertAction> {
        let Some(csr) = self.next.csr.clone() else {
            return Vec::new();
        };
        let csr_hash = self
            .next
            .csr_hash
            .get_or_insert_with(|| sha256_hex(&csr))
            .clone();

        self.next.submitted_at = Some(now);
        self.next.status = Some("submitted".to_string());

        info!(sslname = %self.sslname, "Submitting CSR for signing");
        vec![
            CertAction::Persist,
            CertAction::Submit(CsrSubmission {
                sslname: self.sslname.clone(),
                csr_text: csr,
                csr_hash,
            }),
        ]
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// A key and CSR were generated
    pub fn complete_generation(
        &mut self,
        seq: u64,
        fqdn: Option<String>,
        generated: GeneratedRequest,
        ctx: &EvalContext,
    ) -> Vec<CertAction> {
        if seq != self.generation_seq || !self.generation_in_progress {
            debug!(sslname = %self.sslname, seq = seq, "Discarding superseded generation");
            return Vec::new();
        }

        self.generation_in_progress = false;
        self.generation_error_count = 0;

        if fqdn.as_deref() != ctx.fqdn.as_deref() {
            info!(sslname = %self.sslname, "FQDN changed during generation, starting over");
            return self.evaluate(ctx);
        }

        self.next = Generation::pending(generated.key_pem, generated.csr_pem, fqdn, ctx.now);
        info!(sslname = %self.sslname, "Generated new CSR");

        // Key and CSR are on disk before the CSR is submitted
        let mut actions = vec![CertAction::PersistNow];
        if std::mem::take(&mut self.submit_after_generation) {
            actions.extend(self.submit(ctx.now));
        }
        actions
    }

    /// Key or CSR generation failed
    pub fn generation_failed(
        &mut self,
        seq: u64,
        err: &GenerationError,
        ctx: &EvalContext,
    ) -> Vec<CertAction> {
        if seq != self.generation_seq || !self.generation_in_progress {
            return Vec::new();
        }

        self.generation_error_count += 1;
        if self.generation_error_count >= ctx.max_attempts {
            error!(
                sslname = %self.sslname,
                attempts = self.generation_error_count,
                error = %err,
                "Giving up on CSR generation"
            );
            self.generation_in_progress = false;
            self.submit_after_generation = false;
            return Vec::new();
        }

        warn!(
            sslname = %self.sslname,
            attempt = self.generation_error_count,
            retry_in_secs = ctx.retry_delay.as_secs(),
            error = %err,
            "CSR generation failed, will retry"
        );
        vec![CertAction::RetryGeneration {
            seq,
            delay: ctx.retry_delay,
        }]
    }

    /// The retry delay has passed
    pub fn retry_generation(&mut self, seq: u64) -> Vec<CertAction> {
        if seq != self.generation_seq || !self.generation_in_progress {
            return Vec::new();
        }
        vec![CertAction::Generate { seq }]
    }

    /// Sending the CSR failed; allow the next sweep to try again
    pub fn submission_failed(&mut self, csr_hash: &str) -> Vec<CertAction> {
        if self.next.csr_hash.as_deref() != Some(csr_hash) {
            return Vec::new();
        }
        self.next.submitted_at = None;
        self.next.status = Some("new".to_string());
        vec![CertAction::Persist]
    }

    /// Apply an answer from the signing service
    pub fn apply_signed(
        &mut self,
        response: SignedResponse,
        ctx: &EvalContext,
    ) -> Result<Vec<CertAction>, SigningError> {
        if self.next.csr.is_none() {
            return Err(SigningError::StaleCsr {
                sslname: self.sslname.to_string(),
            });
        }
        if let Some(hash) = &response.csr_hash {
            let matches = self
                .next
                .csr_hash
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(hash));
            if !matches {
                return Err(SigningError::StaleCsr {
                    sslname: self.sslname.to_string(),
                });
            }
        }

        if !response.is_signed() {
            warn!(
                sslname = %self.sslname,
                status = %response.status,
                message = ?response.status_msg,
                "Signing service did not sign the CSR"
            );
            self.next.status = Some(response.status);
            self.next.status_msg = response.status_msg;
            return Ok(vec![CertAction::Persist]);
        }

        let (Some(cert), Some(chain), Some(expires)) =
            (response.cert_text, response.chain_text, response.cert_expires)
        else {
            return Err(SigningError::Malformed(format!(
                "signed response for '{}' lacks certificate, chain or expiry",
                self.sslname
            )));
        };

        self.next.cert = Some(cert);
        self.next.chain = Some(chain);
        self.next.signed_at = Some(response.cert_signed.unwrap_or(ctx.now));
        self.next.expires_at = Some(expires);
        self.next.status = Some(response.status);
        self.next.status_msg = response.status_msg;

        info!(sslname = %self.sslname, expires = %expires, "Received signed certificate");

        let mut actions = vec![CertAction::Persist];
        actions.extend(self.evaluate(ctx));
        Ok(actions)
    }

    /// Rotate a valid `next` into `current`
    ///
    /// Does nothing and returns false when `next` is not valid.
    pub fn make_next_be_current(&mut self, now: DateTime<Utc>) -> bool {
        if !self.next.is_valid(now) {
            return false;
        }

        self.previous = std::mem::take(&mut self.current);
        self.current = std::mem::take(&mut self.next);
        self.current.csr = None;
        self.current.csr_hash = None;

        info!(
            sslname = %self.sslname,
            expires = ?self.current.expires_at,
            "Promoted next certificate to current"
        );
        true
    }

    /// Wipe one slot
    pub fn clean_section(&mut self, slot: Slot) -> CertAction {
        debug!(sslname = %self.sslname, slot = %slot, "Cleaning certificate slot");
        self.generation_mut(slot).clear();
        CertAction::Purged(slot)
    }

    /// Merge a repeated declaration
    ///
    /// A changed identity discards an unsigned `next` (and any generation in
    /// flight) so the next evaluation builds a CSR for the new identity.
    pub fn update_identity(
        &mut self,
        identity: CertIdentity,
        callback: Option<UpdateCallback>,
        now: DateTime<Utc>,
    ) -> Vec<CertAction> {
        if callback.is_some() {
            self.callback = callback;
        }
        if identity == self.identity {
            return Vec::new();
        }

        info!(
            sslname = %self.sslname,
            common_name = %identity.common_name,
            "Certificate identity changed"
        );
        self.identity = identity;

        let mut actions = Vec::new();
        if !self.next.is_empty() && !self.next.is_valid(now) {
            actions.push(self.clean_section(Slot::Next));
        }
        if self.generation_in_progress {
            self.generation_in_progress = false;
            self.submit_after_generation = false;
            self.generation_seq += 1;
        }
        actions
    }
}

impl std::fmt::Debug for ManagedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedCertificate")
            .field("sslname", &self.sslname)
            .field("identity", &self.identity)
            .field("generation_in_progress", &self.generation_in_progress)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}
