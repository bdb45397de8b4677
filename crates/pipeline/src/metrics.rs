//! Prometheus metrics for migration passes.
//!
//! Item counters are incremented only by a pass's status task, so they agree
//! with the order in which outcomes were written to the bookkeeping store.

use crate::error::{PipelineError, PipelineResult};
use prometheus::{self, Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static PASS_ITEMS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_pass_items_total",
            "Items recorded by migration passes, by pass and outcome",
        ),
        &["pass", "outcome"],
    )
    .expect("metric creation failed")
});

pub static PASS_WORKERS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new("ferry_pass_workers", "Workers currently running, by pass"),
        &["pass"],
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(PASS_ITEMS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(PASS_WORKERS.clone()))
            .expect("metric registration failed");
    });
}

/// Text exposition of every registered metric.
pub fn render_metrics() -> PipelineResult<String> {
    register_metrics();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| PipelineError::Task(format!("failed to encode metrics: {e}")))?;
    String::from_utf8(buffer)
        .map_err(|e| PipelineError::Task(format!("metrics are not UTF-8: {e}")))
}

pub fn record_outcome(pass: &str, outcome: &str) {
    PASS_ITEMS.with_label_values(&[pass, outcome]).inc();
}

pub fn set_workers(pass: &str, workers: usize) {
    PASS_WORKERS
        .with_label_values(&[pass])
        .set(i64::try_from(workers).unwrap_or(i64::MAX));
}
