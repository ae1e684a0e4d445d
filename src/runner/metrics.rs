use crate::k8s_types::K8sType;

use prometheus::{exponential_buckets, Histogram, HistogramOpts, IntCounterVec, Opts, Registry};

use std::fmt::{self, Debug};

// 5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240 (ms)

const KIND_AND_OPERATION: &[&str] = &["kind", "operation"];
const KIND: &[&str] = &["kind"];
const OUTCOME: &[&str] = &["outcome"];

/// All the metrics for a deployer. Cloning is cheap, and clones share the same registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    api_server_request_times: Histogram,
    cluster_operations: IntCounterVec,
    retries_by_kind: IntCounterVec,
    goal_outcomes: IntCounterVec,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        let request_time_opts = HistogramOpts::new(
            "api_server_request_time",
            "Total time from sending the request to receiving the response headers",
        )
        .subsystem("client")
        .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let api_server_request_times = Histogram::with_opts(request_time_opts).unwrap();
        registry
            .register(Box::new(api_server_request_times.clone()))
            .unwrap();

        let operation_opts = Opts::new(
            "cluster_operations",
            "number of successful create, patch, and delete operations by resource kind",
        );
        let cluster_operations = IntCounterVec::new(operation_opts, KIND_AND_OPERATION).unwrap();
        registry
            .register(Box::new(cluster_operations.clone()))
            .unwrap();

        let retry_opts = Opts::new(
            "retries",
            "number of failed cluster operation attempts, by resource kind",
        );
        let retries_by_kind = IntCounterVec::new(retry_opts, KIND).unwrap();
        registry.register(Box::new(retries_by_kind.clone())).unwrap();

        let goal_opts = Opts::new("goal_outcomes", "number of handled goals by outcome");
        let goal_outcomes = IntCounterVec::new(goal_opts, OUTCOME).unwrap();
        registry.register(Box::new(goal_outcomes.clone())).unwrap();

        Metrics {
            registry,
            api_server_request_times,
            cluster_operations,
            retries_by_kind,
            goal_outcomes,
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            api_server_request_times: self.api_server_request_times.clone(),
        }
    }

    pub fn cluster_operation(&self, k8s_type: &K8sType, operation: &str) {
        self.cluster_operations
            .with_label_values(&[k8s_type.kind, operation])
            .inc();
    }

    pub fn attempt_failed(&self, k8s_type: &K8sType) {
        self.retries_by_kind.with_label_values(&[k8s_type.kind]).inc();
    }

    /// Records the outcome of a single goal. `outcome` is one of `success`, `failure`, or
    /// `skipped`.
    pub fn goal_handled(&self, outcome: &str) {
        self.goal_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn goal_count(&self, outcome: &str) -> u64 {
        self.goal_outcomes.with_label_values(&[outcome]).get() as u64
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

#[derive(Clone)]
pub struct ClientMetrics {
    api_server_request_times: Histogram,
}

impl Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ClientMetrics")
    }
}

impl ClientMetrics {
    pub fn request_started(&self) -> prometheus::HistogramTimer {
        self.api_server_request_times.start_timer()
    }
}
