//! Prometheus metrics for certificate management.

use std::io::Write;
use std::path::Path;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tracing::trace;

use super::error::CertError;

/// Counters and gauges for the certificate manager
///
/// Each manager owns its registry so several managers (e.g. in tests) do
/// not collide on the global default registry.
#[derive(Debug, Clone)]
pub struct CertMetrics {
    registry: Registry,
    generations: IntCounterVec,
    submissions: IntCounterVec,
    promotions: IntCounter,
    corruption_purges: IntCounter,
    managed: IntGauge,
    pending_responses: IntGauge,
}

impl CertMetrics {
    pub fn new() -> Result<Self, CertError> {
        let registry = Registry::new_custom(Some("yombo_certs".to_string()), None)?;

        let generations = IntCounterVec::new(
            Opts::new("generations_total", "Key and CSR generations by result"),
            &["result"],
        )?;
        let submissions = IntCounterVec::new(
            Opts::new("submissions_total", "CSR submissions by result"),
            &["result"],
        )?;
        let promotions = IntCounter::new(
            "promotions_total",
            "Signed certificates promoted to current",
        )?;
        let corruption_purges = IntCounter::new(
            "corruption_purges_total",
            "Stored generations discarded after an integrity failure",
        )?;
        let managed = IntGauge::new("managed_certificates", "Declared certificates")?;
        let pending_responses = IntGauge::new(
            "pending_responses",
            "Signing responses buffered for undeclared certificates",
        )?;

        registry.register(Box::new(generations.clone()))?;
        registry.register(Box::new(submissions.clone()))?;
        registry.register(Box::new(promotions.clone()))?;
        registry.register(Box::new(corruption_purges.clone()))?;
        registry.register(Box::new(managed.clone()))?;
        registry.register(Box::new(pending_responses.clone()))?;

        Ok(Self {
            registry,
            generations,
            submissions,
            promotions,
            corruption_purges,
            managed,
            pending_responses,
        })
    }

    pub fn record_generation(&self, ok: bool) {
        self.generations
            .with_label_values(&[if ok { "success" } else { "failure" }])
            .inc();
    }

    pub fn record_submission(&self, ok: bool) {
        self.submissions
            .with_label_values(&[if ok { "success" } else { "failure" }])
            .inc();
    }

    pub fn record_promotion(&self) {
        self.promotions.inc();
    }

    pub fn record_corruption_purge(&self) {
        self.corruption_purges.inc();
    }

    pub fn set_managed(&self, count: usize) {
        self.managed.set(count as i64);
    }

    pub fn set_pending_responses(&self, count: usize) {
        self.pending_responses.set(count as i64);
    }

    pub fn promotions(&self) -> u64 {
        self.promotions.get()
    }

    pub fn corruption_purges(&self) -> u64 {
        self.corruption_purges.get()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, CertError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    /// Write the metrics for a node-exporter style textfile collector
    pub fn write_textfile(&self, path: &Path) -> Result<(), CertError> {
        let rendered = self.render()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(super::StorageError::from)?;
        tmp.write_all(rendered.as_bytes())
            .map_err(super::StorageError::from)?;
        tmp.persist(path).map_err(super::StorageError::from)?;
        trace!(path = %path.display(), "Wrote metrics textfile");
        Ok(())
    }
}
