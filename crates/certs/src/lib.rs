//! Yombo Gateway certificate manager
//!
//! Keeps the TLS certificates a gateway serves signed and current:
//!
//! - **Declaration**: consumers register the names they need and get a
//!   callback whenever a new certificate is promoted
//! - **Renewal**: keys and CSRs are staged ahead of time and sent to the
//!   remote signing service once a certificate nears expiry
//! - **Persistence**: every slot is written atomically with a SHA-256
//!   checked meta file, so a crash never leaves a half written certificate
//! - **Fallback**: a self-signed certificate is served until a signed one
//!   exists
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use yombo_certs::{CertManager, Declaration, SpoolSigningChannel};
//! use yombo_config::Config;
//!
//! let config = Config::from_file("/etc/yombo/certs.kdl")?;
//! let spool = SpoolSigningChannel::new(&spool_dir, poll_interval)?;
//! let manager = CertManager::from_config(&config, Arc::new(spool)).await?;
//!
//! manager.declare(
//!     Declaration::new("lib_mqtt", "mqtt.example.yombo.net")
//!         .on_update(|bundle| reload_broker(bundle)),
//! )?;
//! let bundle = manager.get("lib_mqtt");
//! ```

pub mod certs;

pub use certs::{
    CertError, CertManager, CertificateBundle, CertificateStatus, CertificateStorage,
    Declaration, DeclareError, GatewayContext, ManagerSettings, SignedResponse, SigningChannel,
    SigningError, SpoolSigningChannel,
};
