//! KDL configuration parsing.

use anyhow::Result;
use kdl::KdlDocument;
use tracing::{trace, warn};

use crate::Config;

mod certs;
pub mod helpers;

pub use certs::{parse_certificates, parse_gateway};

/// Parse a whole configuration document
pub fn parse_document(content: &str) -> Result<Config> {
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid KDL: {}", e))?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "gateway" => config.gateway = parse_gateway(node)?,
            "certificates" => config.certificates = parse_certificates(node)?,
            other => {
                warn!(node = %other, "Ignoring unknown top-level configuration block");
            }
        }
    }

    trace!(
        gateway_id = %config.gateway.id,
        certificates = config.certificates.requirements.len(),
        "Parsed configuration document"
    );

    Ok(config)
}
