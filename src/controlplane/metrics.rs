//! Provisioner metrics
//!
//! Prometheus collectors registered on a caller-supplied registry, which the
//! metrics server gathers from.

use crate::error::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

const NAMESPACE: &str = "targetd_provisioner";

/// Operation label values
pub const OPERATION_CREATE: &str = "create";
pub const OPERATION_DELETE: &str = "delete";
pub const OPERATION_RESIZE: &str = "resize";

/// Collectors exported by the provisioner
#[derive(Clone)]
pub struct Metrics {
    /// Lifecycle operations by operation and outcome
    pub operations: IntCounterVec,
    pub operation_duration: HistogramVec,
    pub storage_classes: IntGauge,
}

impl Metrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Volume lifecycle operations by outcome")
                .namespace(NAMESPACE),
            &["operation", "outcome"],
        )?;
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "operation_duration_seconds",
                "Duration of volume lifecycle operations",
            )
            .namespace(NAMESPACE),
            &["operation"],
        )?;
        let storage_classes = IntGauge::with_opts(
            Opts::new("storage_classes", "Storage classes currently cached").namespace(NAMESPACE),
        )?;

        registry.register(Box::new(operations.clone()))?;
        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(storage_classes.clone()))?;

        Ok(Self {
            operations,
            operation_duration,
            storage_classes,
        })
    }

    /// Count one finished operation
    pub fn record(&self, operation: &str, outcome: &str, elapsed_secs: f64) {
        self.operations
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(elapsed_secs);
    }

    pub fn set_storage_classes(&self, count: usize) {
        self.storage_classes.set(count as i64);
    }
}

/// Render every metric of `registry` in the text exposition format
pub fn encode(registry: &Registry) -> Result<(String, Vec<u8>)> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    Ok((encoder.format_type().to_string(), buffer))
}
