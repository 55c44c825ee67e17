//! Gateway TLS certificate management
//!
//! Keeps a signed certificate for every declared name, renewing it through
//! a remote signing service well before it expires.
//!
//! # Slots
//!
//! Each certificate has three generations on disk:
//!
//! - `current` - the certificate consumers are served
//! - `next` - a key and CSR waiting to be signed, or a signed certificate
//!   waiting to be promoted
//! - `previous` - the certificate `current` replaced, kept for reference
//!
//! A fresh CSR is staged in `next` right after each promotion, so a renewal
//! only needs a round trip to the signing service.
//!
//! # Architecture
//!
//! - [`CertManager`] - Handle used by consumers to declare and read certificates
//! - [`ManagedCertificate`] - I/O free rotation policy for one certificate
//! - [`CertificateStorage`] - Crash safe files plus SHA-256 checked meta
//! - [`SigningChannel`] - Outbound CSR transport; [`SpoolSigningChannel`]
//!   exchanges JSON files with the signing service
//! - [`SweepScheduler`] - Periodic re-evaluation
//!
//! # Example
//!
//! ```kdl
//! gateway {
//!     id "gw_1234567890abcdef"
//!     fqdn "example.yombo.net"
//! }
//!
//! certificates {
//!     directory "/var/lib/yombo/certs"
//!     renew-before-days 30
//!
//!     signing {
//!         spool "/var/spool/yombo/signing"
//!     }
//!
//!     certificate "lib_webinterface" {
//!         cn "example.yombo.net"
//!         sans "www.example.yombo.net"
//!         key-type "rsa"
//!         key-size 4096
//!     }
//! }
//! ```
//!
//! # Signing flow
//!
//! 1. A sweep finds `next` empty and spawns key and CSR generation
//! 2. The CSR goes out through the [`SigningChannel`] once `current` enters
//!    the renewal window (or immediately when there is no usable `current`)
//! 3. The signed response is delivered with [`CertManager::deliver`]
//! 4. `next` becomes `current`, files are written and the consumer callback
//!    runs with the new [`CertificateBundle`]

mod certificate;
mod context;
mod debounce;
mod error;
mod generation;
mod generator;
mod manager;
mod metrics;
mod scheduler;
mod selfsigned;
mod signing;
mod storage;

pub use certificate::{
    CertAction, CertIdentity, CertificateBundle, CertificateStatus, EvalContext,
    ManagedCertificate, SlotStatus, UpdateCallback,
};
pub use context::GatewayContext;
pub use debounce::Debouncer;
pub use error::{CertError, DeclareError, GenerationError, SigningError, StorageError};
pub use generation::{needs_renewal, Generation, GenerationState, Slot, Validity};
pub use generator::{
    certificate_expiry, csr_matches_key, generate_csr, generate_csr_async, generate_self_signed,
    CsrRequest, GeneratedRequest, SelfSignedMaterial,
};
pub use manager::{CertManager, Declaration, ManagerSettings};
pub use metrics::CertMetrics;
pub use scheduler::{SweepScheduler, DEFAULT_SWEEP_INTERVAL, MIN_SWEEP_INTERVAL};
pub use selfsigned::{ensure_fallback, fallback_bundle, SELF_SIGNED_VALIDITY_DAYS};
pub use signing::{
    CsrSubmission, PendingResponses, SignedResponse, SigningChannel, SpoolSigningChannel,
    STATUS_SIGNED,
};
pub use storage::{Artifact, CertificateStorage, GenerationMeta, Restored, SELF_SIGNED_NAME};
