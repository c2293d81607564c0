//! Registry metrics.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `registry_toggles_total{result}` - Local toggles by result (staged, rejected)
//! - `registry_commit_passes_total` - Commit passes run
//! - `registry_commit_items_total{outcome}` - Per-item commit outcomes
//! - `registry_catalog_snapshots_total` - Catalog snapshots received by the feed
//! - `registry_catalog_resubscribes_total` - Times the feed had to re-open its listener
//!
//! ## Gauges
//! - `registry_staged_items` - Intents waiting for the next save
//!
//! ## Histograms
//! - `registry_commit_duration_seconds` - Wall time of one commit pass

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use std::time::Duration;

/// Register all registry metric descriptions.
///
/// Call once at startup, after the recorder is installed.
pub fn register_registry_metrics() {
    describe_counter!(
        "registry_toggles_total",
        "Total number of local toggles by result (staged, rejected)"
    );
    describe_gauge!(
        "registry_staged_items",
        "Current number of staged intents waiting for the next save"
    );

    describe_counter!("registry_commit_passes_total", "Total number of commit passes");
    describe_counter!(
        "registry_commit_items_total",
        "Per-item commit outcomes (claimed, reaffirmed, released, unchanged, conflict, failed)"
    );
    describe_histogram!(
        "registry_commit_duration_seconds",
        "Time taken to run one commit pass"
    );

    describe_counter!(
        "registry_catalog_snapshots_total",
        "Total number of catalog snapshots received"
    );
    describe_counter!(
        "registry_catalog_resubscribes_total",
        "Total number of times the catalog listener was re-opened"
    );

    tracing::debug!("Registry metrics registered");
}

/// Registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record a toggle and the resulting staged count.
    #[allow(clippy::cast_precision_loss)] // Staged counts are tiny
    pub fn record_toggle(result: &'static str, staged: usize) {
        counter!("registry_toggles_total", "result" => result).increment(1);
        gauge!("registry_staged_items").set(staged as f64);
    }

    /// Record the staged count after it changed for another reason.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_staged(staged: usize) {
        gauge!("registry_staged_items").set(staged as f64);
    }

    /// Record a finished commit pass.
    pub fn record_pass(duration: Duration) {
        counter!("registry_commit_passes_total").increment(1);
        histogram!("registry_commit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record one item's commit outcome.
    pub fn record_item(outcome: &'static str) {
        counter!("registry_commit_items_total", "outcome" => outcome).increment(1);
    }

    /// Record a snapshot delivered by the catalog feed.
    pub fn record_snapshot() {
        counter!("registry_catalog_snapshots_total").increment(1);
    }

    /// Record the feed re-opening its listener.
    pub fn record_resubscribe() {
        counter!("registry_catalog_resubscribes_total").increment(1);
    }
}
