//! Prometheus metrics owned by one pipeline instance.

use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Pipeline counters registered on a private [`Registry`], so several
/// pipelines (tests, embedded use) never collide.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    builds_total: IntCounterVec,
    build_duration_seconds: Histogram,
    deployments_total: IntCounterVec,
    rpc_retries_total: IntCounter,
}

impl PipelineMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("sol_sandbox".to_string()), None)?;

        let builds_total = IntCounterVec::new(
            Opts::new("builds_total", "Builds by outcome (success, failure)"),
            &["outcome"],
        )?;
        let build_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("build_duration_seconds", "Wall time of toolchain builds")
                .buckets(exponential_buckets(0.5, 2.0, 12)?),
        )?;
        let deployments_total = IntCounterVec::new(
            Opts::new("deployments_total", "Deployments by resulting status"),
            &["status"],
        )?;
        let rpc_retries_total =
            IntCounter::new("rpc_retries_total", "Transient RPC failures that were retried")?;

        registry.register(Box::new(builds_total.clone()))?;
        registry.register(Box::new(build_duration_seconds.clone()))?;
        registry.register(Box::new(deployments_total.clone()))?;
        registry.register(Box::new(rpc_retries_total.clone()))?;

        Ok(Self {
            registry,
            builds_total,
            build_duration_seconds,
            deployments_total,
            rpc_retries_total,
        })
    }

    pub fn observe_build(&self, success: bool, duration_ms: u64) {
        let outcome = if success { "success" } else { "failure" };
        self.builds_total.with_label_values(&[outcome]).inc();
        self.build_duration_seconds
            .observe(duration_ms as f64 / 1000.0);
    }

    pub fn inc_deployment(&self, status: &str) {
        self.deployments_total.with_label_values(&[status]).inc();
    }

    pub fn inc_rpc_retry(&self) {
        self.rpc_retries_total.inc();
    }

    pub fn builds(&self, outcome: &str) -> u64 {
        self.builds_total.with_label_values(&[outcome]).get()
    }

    pub fn deployments(&self, status: &str) -> u64 {
        self.deployments_total.with_label_values(&[status]).get()
    }

    pub fn rpc_retries(&self) -> u64 {
        self.rpc_retries_total.get()
    }

    /// Text exposition format for `GET /metrics`.
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl std::fmt::Debug for PipelineMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineMetrics").finish_non_exhaustive()
    }
}
