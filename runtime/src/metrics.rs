//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the runtime components:
//! - Store action processing
//! - Effect execution
//! - Catalog store transactions (attempts, optimistic-concurrency retries, contention)
//! - Retry helpers
//!
//! Nothing is exported over HTTP; the recorder keeps the samples in memory and
//! [`MetricsRecorder::render`] returns the Prometheus text format on demand.
//!
//! # Example
//!
//! ```rust,no_run
//! use gift_registry_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut recorder = MetricsRecorder::new();
//! recorder.install()?;
//!
//! if let Some(text) = recorder.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// In-process Prometheus recorder.
#[derive(Default)]
pub struct MetricsRecorder {
    handle: Option<PrometheusHandle>,
}

impl MetricsRecorder {
    /// Create a recorder that is not installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Build`] if the exporter cannot be configured,
    /// or [`MetricsError::Install`] if installing it fails for a reason other
    /// than a recorder already being present.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs
    /// a warning and leaves the recorder without a render handle.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this recorder was not the one installed.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all runtime metric descriptions.
fn register_metrics() {
    // Store Metrics
    describe_counter!(
        "store_actions_processed_total",
        "Total number of actions reduced by the store"
    );
    describe_histogram!(
        "store_reduce_duration_seconds",
        "Time taken to run the reducer for one action"
    );
    describe_counter!(
        "store_effects_executed_total",
        "Total number of effects executed, by effect type"
    );

    // Catalog Transaction Metrics
    describe_counter!(
        "catalog_transaction_attempts_total",
        "Total number of transaction body executions"
    );
    describe_counter!(
        "catalog_transaction_retries_total",
        "Total number of attempts invalidated by a concurrent write"
    );
    describe_counter!(
        "catalog_transaction_contention_total",
        "Total number of transactions that gave up after exhausting retries"
    );
    describe_counter!(
        "catalog_transaction_commits_total",
        "Total number of transactions committed"
    );

    // Retry Metrics
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record an action reduced by the store.
    pub fn record_action(duration: Duration) {
        counter!("store_actions_processed_total").increment(1);
        histogram!("store_reduce_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record an executed effect.
    pub fn record_effect(kind: &'static str) {
        counter!("store_effects_executed_total", "type" => kind).increment(1);
    }
}

/// Catalog transaction metrics recorder.
pub struct TransactionMetrics;

impl TransactionMetrics {
    /// Record one run of a transaction body.
    pub fn record_attempt() {
        counter!("catalog_transaction_attempts_total").increment(1);
    }

    /// Record an attempt invalidated by a concurrent write.
    pub fn record_retry() {
        counter!("catalog_transaction_retries_total").increment(1);
    }

    /// Record a transaction that gave up.
    pub fn record_contention() {
        counter!("catalog_transaction_contention_total").increment(1);
    }

    /// Record a committed transaction.
    pub fn record_commit() {
        counter!("catalog_transaction_commits_total").increment(1);
    }
}
