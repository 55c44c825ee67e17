//! Yombo certificate daemon - Main entry point
//!
//! Keeps the gateway's declared TLS certificates signed, talking to the
//! signing service through a spool directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use yombo_certs::certs::{
    CertificateStorage, CsrSubmission, Slot, SlotStatus, SpoolSigningChannel,
};
use yombo_certs::{CertManager, SigningChannel, SigningError};
use yombo_common::CorrelationId;
use yombo_config::validate::validate_config;
use yombo_config::Config;

/// Yombo gateway certificate manager
#[derive(Parser, Debug)]
#[command(name = "yombo-certs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "YOMBO_CERTS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the certificate manager (default)
    Run,
    /// Validate the configuration file and exit
    Test,
    /// Print the state of every stored certificate
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Test => test_config(&config, cli.config.as_deref()),
        Commands::Status => print_status(&config),
        Commands::Run => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            runtime.block_on(run(config))
        }
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => {
            info!("No configuration specified, using defaults");
            Ok(Config::default())
        }
    }
}

/// Validate configuration and exit
fn test_config(config: &Config, path: Option<&Path>) -> Result<()> {
    let result = validate_config(config);

    for warning in &result.warnings {
        warn!("{}", warning);
    }
    for error in &result.errors {
        eprintln!("error: {}", error);
    }

    let shown = path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults)".to_string());
    if !result.is_ok() {
        anyhow::bail!(
            "configuration file {} has {} error(s)",
            shown,
            result.errors.len()
        );
    }

    info!(
        certificates = config.certificates.requirements.len(),
        warnings = result.warnings.len(),
        "Configuration test successful"
    );
    println!("yombo-certs: configuration file {} test is successful", shown);
    Ok(())
}

/// Print slot states straight from disk
///
/// Only reads. A slot that fails its integrity check is reported as
/// corrupt and left for the daemon to deal with, since it may be halfway
/// through writing it.
fn print_status(config: &Config) -> Result<()> {
    let storage = CertificateStorage::new(&config.certificates.directory)
        .context("Failed to open certificate directory")?;
    let now = Utc::now();

    let names = storage.list_names().context("Failed to list certificates")?;
    if names.is_empty() {
        println!("No certificates stored in {}", storage.base_path().display());
        return Ok(());
    }

    for name in names {
        println!("{}", name);
        for slot in Slot::ALL {
            println!("  {:<8} {}", slot.label(), describe_slot(&storage, &name, slot, now));
        }
    }
    Ok(())
}

fn describe_slot(
    storage: &CertificateStorage,
    name: &str,
    slot: Slot,
    now: DateTime<Utc>,
) -> String {
    let generation = match storage.load_generation(name, slot) {
        Ok(generation) => generation.unwrap_or_default(),
        Err(e) => return format!("{:<10} {}", "corrupt", e),
    };
    let status = SlotStatus::of(slot, &generation, now);
    format!(
        "{:<10} expires {}",
        status.state.to_string(),
        status
            .expires_at
            .map(|e| e.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    )
}

/// Signing channel used when no spool is configured
struct UnconfiguredSigner;

#[async_trait]
impl SigningChannel for UnconfiguredSigner {
    async fn submit(&self, request: CsrSubmission) -> Result<CorrelationId, SigningError> {
        Err(SigningError::Unavailable(format!(
            "no signing spool configured, cannot submit CSR for '{}'",
            request.sslname
        )))
    }
}

async fn run(config: Config) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let spool = match &config.certificates.signing.spool {
        Some(dir) => Some(
            SpoolSigningChannel::new(
                dir,
                Duration::from_secs(config.certificates.signing.poll_interval_secs),
            )
            .context("Failed to open signing spool")?,
        ),
        None => {
            warn!("No signing spool configured, certificates will stay unsigned");
            None
        }
    };
    let signer: Arc<dyn SigningChannel> = match &spool {
        Some(spool) => Arc::new(spool.clone()),
        None => Arc::new(UnconfiguredSigner),
    };

    let manager = CertManager::from_config(&config, signer)
        .await
        .context("Failed to start certificate manager")?;

    let shutdown = CancellationToken::new();
    if let Some(spool) = spool {
        tokio::spawn(spool.run(manager.clone(), shutdown.clone()));
    }

    info!(
        certificates = config.certificates.requirements.len(),
        directory = %config.certificates.directory.display(),
        "yombo-certs started"
    );

    wait_for_shutdown().await?;
    info!("Received shutdown signal, writing pending certificate files");

    shutdown.cancel();
    manager.stop().await.context("Failed to stop certificate manager")?;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for SIGINT")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use yombo_certs::certs::{generate_self_signed, Artifact, Generation};
    use yombo_common::KeySpec;

    fn signed_generation(now: DateTime<Utc>) -> Generation {
        let material = generate_self_signed("gw.example.com", &KeySpec::ecdsa(), 30).unwrap();
        Generation {
            key: Some(material.key_pem),
            cert: Some(material.cert_pem),
            created_at: Some(now),
            signed_at: Some(now),
            expires_at: Some(material.expires),
            fqdn: Some("example.com".to_string()),
            ..Generation::default()
        }
    }

    #[test]
    fn test_status_leaves_damaged_slot_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CertificateStorage::new(dir.path()).unwrap();
        let now = Utc::now();
        storage
            .save_generation("web", Slot::Current, &signed_generation(now))
            .unwrap();

        // Key swapped underneath the meta, as during a save in progress
        let key_path = storage.artifact_path("web", Slot::Current, Artifact::Key);
        std::fs::write(&key_path, "replaced").unwrap();

        let line = describe_slot(&storage, "web", Slot::Current, now);
        assert!(line.starts_with("corrupt"));
        assert!(key_path.exists());
        assert!(storage.meta_path("web", Slot::Current).exists());

        assert!(describe_slot(&storage, "web", Slot::Next, now).starts_with("empty"));
    }
}
