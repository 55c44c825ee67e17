//! Gateway and certificate block parsing.

use ::kdl::KdlNode;
use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use yombo_common::{KeySpec, KeyType};

use crate::*;

use super::helpers::{
    child, get_bounded_entry, get_first_arg_string, get_int_entry, get_string_args,
    get_string_entry,
};

/// Parse the `gateway` block
pub fn parse_gateway(node: &KdlNode) -> Result<GatewayConfig> {
    trace!("Parsing gateway configuration block");

    let config = GatewayConfig {
        id: get_string_entry(node, "id").unwrap_or_default(),
        fqdn: get_string_entry(node, "fqdn").filter(|f| !f.trim().is_empty()),
    };

    trace!(
        id = %config.id,
        fqdn = ?config.fqdn,
        "Parsed gateway configuration"
    );
    Ok(config)
}

/// Parse the `certificates` block
pub fn parse_certificates(node: &KdlNode) -> Result<CertificatesConfig> {
    trace!("Parsing certificates configuration block");

    let subject = child(node, "subject").map(parse_subject).unwrap_or_default();
    let fallback = match child(node, "fallback") {
        Some(n) => parse_key_spec(n, "fallback")?,
        None => KeySpec::default(),
    };
    let signing = match child(node, "signing") {
        Some(n) => parse_signing(n)?,
        None => SigningConfig::default(),
    };

    let mut requirements = Vec::new();
    if let Some(children) = node.children() {
        for c in children.nodes() {
            if c.name().value() == "certificate" {
                requirements.push(parse_requirement(c)?);
            }
        }
    }

    let config = CertificatesConfig {
        directory: get_string_entry(node, "directory")
            .map(PathBuf::from)
            .unwrap_or_else(default_certs_dir),
        sweep_interval_hours: get_bounded_entry(node, "sweep-interval-hours", MAX_INTERVAL_HOURS)?
            .unwrap_or_else(default_sweep_interval_hours),
        renew_before_days: get_bounded_entry(
            node,
            "renew-before-days",
            u64::from(MAX_RENEW_BEFORE_DAYS),
        )?
        .map(u32::try_from)
        .transpose()?
        .unwrap_or_else(default_renew_before_days),
        write_debounce_secs: get_bounded_entry(node, "write-debounce-secs", MAX_DELAY_SECS)?
            .unwrap_or_else(default_write_debounce_secs),
        write_max_delay_secs: get_bounded_entry(node, "write-max-delay-secs", MAX_DELAY_SECS)?
            .unwrap_or_else(default_write_max_delay_secs),
        resubmit_after_hours: get_bounded_entry(node, "resubmit-after-hours", MAX_INTERVAL_HOURS)?
            .unwrap_or_else(default_resubmit_after_hours),
        generation_retry_secs: get_bounded_entry(node, "generation-retry-secs", MAX_DELAY_SECS)?
            .unwrap_or_else(default_generation_retry_secs),
        generation_max_attempts: get_bounded_entry(
            node,
            "generation-max-attempts",
            u64::from(MAX_GENERATION_ATTEMPTS),
        )?
        .map(u32::try_from)
        .transpose()?
        .unwrap_or_else(default_generation_max_attempts),
        unknown_response_ttl_secs: get_bounded_entry(
            node,
            "unknown-response-ttl-secs",
            MAX_DELAY_SECS,
        )?
        .unwrap_or_else(default_unknown_response_ttl_secs),
        metrics_file: get_string_entry(node, "metrics-file").map(PathBuf::from),
        subject,
        fallback,
        signing,
        requirements,
    };

    trace!(
        directory = %config.directory.display(),
        renew_before_days = config.renew_before_days,
        certificates = config.requirements.len(),
        "Parsed certificates configuration"
    );
    Ok(config)
}

fn parse_subject(node: &KdlNode) -> SubjectConfig {
    let defaults = SubjectConfig::default();
    SubjectConfig {
        country: get_string_entry(node, "country").unwrap_or(defaults.country),
        state: get_string_entry(node, "state").unwrap_or(defaults.state),
        locality: get_string_entry(node, "locality").unwrap_or(defaults.locality),
        organization: get_string_entry(node, "organization").unwrap_or(defaults.organization),
    }
}

fn parse_signing(node: &KdlNode) -> Result<SigningConfig> {
    Ok(SigningConfig {
        spool: get_string_entry(node, "spool").map(PathBuf::from),
        poll_interval_secs: get_bounded_entry(node, "poll-interval-secs", MAX_DELAY_SECS)?
            .unwrap_or_else(default_spool_poll_interval_secs),
    })
}

/// `key-type` and `key-size` children of a certificate or fallback block
fn parse_key_spec(node: &KdlNode, owner: &str) -> Result<KeySpec> {
    let key_type = match get_string_entry(node, "key-type") {
        Some(s) => s
            .parse::<KeyType>()
            .map_err(|e| anyhow::anyhow!("{}: {}", owner, e))?,
        None => KeyType::default(),
    };

    Ok(match key_type {
        KeyType::Ecdsa => KeySpec::ecdsa(),
        KeyType::Rsa => {
            let size = match get_int_entry(node, "key-size") {
                Some(v) => u32::try_from(v)
                    .map_err(|_| anyhow::anyhow!("{}: invalid key-size {}", owner, v))?,
                None => yombo_common::types::DEFAULT_KEY_SIZE,
            };
            KeySpec::rsa(size)
        }
    })
}

fn parse_requirement(node: &KdlNode) -> Result<CertificateRequirement> {
    let sslname = get_first_arg_string(node).ok_or_else(|| {
        anyhow::anyhow!(
            "Certificate requires a name argument, e.g., certificate \"lib_webinterface\" {{ ... }}"
        )
    })?;

    trace!(sslname = %sslname, "Parsing certificate requirement");

    let common_name = get_string_entry(node, "cn").ok_or_else(|| {
        anyhow::anyhow!(
            "Certificate '{}' requires a 'cn' field, e.g., cn \"gw1.example.com\"",
            sslname
        )
    })?;

    let sans = child(node, "sans").map(get_string_args).unwrap_or_default();
    let key = parse_key_spec(node, &format!("certificate '{}'", sslname))?;

    Ok(CertificateRequirement {
        sslname,
        common_name,
        sans,
        key,
    })
}
