//! Prometheus metrics for the fanout scheduler
//!
//! This module provides metrics tracking for:
//! - Tasks: created, completed per terminal status
//! - Admission control: grants and denials per scope kind
//! - Batches: submissions and fan-out sizes
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails (or never happens), metric operations are no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all scheduler metrics
struct SchedulerMetrics {
    tasks_created: Counter,
    tasks_completed: CounterVec,
    batches_submitted: Counter,
    batch_fanout: Histogram,
    admissions_granted: CounterVec,
    admissions_denied: CounterVec,
}

/// Global storage for scheduler metrics
static METRICS: OnceLock<SchedulerMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup. If metric
/// registration fails, errors are surfaced here and subsequent metric
/// operations become no-ops.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = SchedulerMetrics {
        tasks_created: register_counter!(
            "fanout_tasks_created_total",
            "Total task records created"
        )?,
        tasks_completed: register_counter_vec!(
            "fanout_tasks_completed_total",
            "Total tasks reaching a terminal status",
            &["status"]
        )?,
        batches_submitted: register_counter!(
            "fanout_batches_submitted_total",
            "Total batch submissions"
        )?,
        batch_fanout: register_histogram!(
            "fanout_batch_fanout_tasks",
            "Tasks fanned out per batch",
            vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0]
        )?,
        admissions_granted: register_counter_vec!(
            "fanout_admissions_granted_total",
            "Admission tokens granted per scope kind",
            &["scope_kind"]
        )?,
        admissions_denied: register_counter_vec!(
            "fanout_admissions_denied_total",
            "Admissions denied after wait-budget exhaustion per scope kind",
            &["scope_kind"]
        )?,
    };

    METRICS
        .set(metrics)
        .map_err(|_| "Scheduler metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    METRICS.get().is_some()
}

// ============================================================================
// Recording
// ============================================================================

/// Record a task record creation
pub fn record_task_created() {
    if let Some(m) = METRICS.get() {
        m.tasks_created.inc();
    }
}

/// Record a task reaching a terminal status
pub fn record_task_completed(status: &str) {
    if let Some(m) = METRICS.get() {
        m.tasks_completed.with_label_values(&[status]).inc();
    }
}

/// Record one batch submission and its fan-out size
pub fn record_batch_submitted(task_count: usize) {
    if let Some(m) = METRICS.get() {
        m.batches_submitted.inc();
        m.batch_fanout.observe(task_count as f64);
    }
}

/// Record an admission decision for one scope kind
pub fn record_admission(scope_kind: &str, granted: bool) {
    if let Some(m) = METRICS.get() {
        if granted {
            m.admissions_granted.with_label_values(&[scope_kind]).inc();
        } else {
            m.admissions_denied.with_label_values(&[scope_kind]).inc();
        }
    }
}

// ============================================================================
// Export
// ============================================================================

/// Encode all registered metrics in the Prometheus text format
pub fn export() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
