//! Metrics for image sync observability
//!
//! Four OpenTelemetry counters, each keyed by the namespace and name of the
//! object it concerns:
//! - reconciles started (per Deployment)
//! - CronJobs updated (per CronJob)
//! - Jobs deleted (per CronJob)
//! - reconcile errors (per Deployment)
//!
//! Reconciles go through the [`SyncMetrics`] trait held by the controller
//! context. The counters are scraped from `/metrics` on the metrics address.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::error;

#[cfg(test)]
use mockall::automock;

/// Instrumentation scope of the controller counters
pub const METER_NAME: &str = "cronjob-image-sync";

/// The counters a reconcile can bump
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncCounter {
    /// A reconcile found its Deployment and started work
    ReconcilesStarted,
    /// A CronJob template was rewritten
    CronJobsUpdated,
    /// A Job owned by an updated CronJob was deleted
    JobsDeleted,
    /// A reconcile failed
    Errors,
}

impl SyncCounter {
    /// Label key for the object name
    pub fn object_label(&self) -> &'static str {
        match self {
            Self::ReconcilesStarted | Self::Errors => "deployment",
            Self::CronJobsUpdated | Self::JobsDeleted => "cronjob",
        }
    }

    /// Attribute set for an object of this counter
    pub fn attributes(&self, namespace: &str, name: &str) -> [KeyValue; 2] {
        [
            KeyValue::new("namespace", namespace.to_string()),
            KeyValue::new(self.object_label(), name.to_string()),
        ]
    }
}

/// Sink for controller counters
#[cfg_attr(test, automock)]
pub trait SyncMetrics: Send + Sync {
    /// Add one to `counter` for the object `namespace/name`
    fn increment(&self, counter: SyncCounter, namespace: &str, name: &str);
}

/// Production sink backed by OpenTelemetry counters
///
/// | counter | labels |
/// |---|---|
/// | `cronjob_image_sync_reconciles_total` | `namespace`, `deployment` |
/// | `cronjob_image_sync_cronjobs_updated_total` | `namespace`, `cronjob` |
/// | `cronjob_image_sync_jobs_deleted_total` | `namespace`, `cronjob` |
/// | `cronjob_image_sync_errors_total` | `namespace`, `deployment` |
pub struct OtelSyncMetrics {
    reconciles: Counter<u64>,
    cronjobs_updated: Counter<u64>,
    jobs_deleted: Counter<u64>,
    errors: Counter<u64>,
}

impl OtelSyncMetrics {
    /// Create the four counters on `meter`
    pub fn new(meter: &Meter) -> Self {
        let counter = |name: &'static str, description: &'static str, unit: &'static str| {
            meter
                .u64_counter(name)
                .with_description(description)
                .with_unit(unit)
                .build()
        };
        Self {
            reconciles: counter(
                "cronjob_image_sync_reconciles_total",
                "Total number of reconciles for deployments",
                "{reconciles}",
            ),
            cronjobs_updated: counter(
                "cronjob_image_sync_cronjobs_updated_total",
                "Total number of cronjobs updated",
                "{cronjobs}",
            ),
            jobs_deleted: counter(
                "cronjob_image_sync_jobs_deleted_total",
                "Total number of jobs deleted by the controller",
                "{jobs}",
            ),
            errors: counter(
                "cronjob_image_sync_errors_total",
                "Total number of errors during reconcile",
                "{errors}",
            ),
        }
    }

    /// Counters on the global meter provider installed by
    /// [`init_telemetry`](crate::telemetry::init_telemetry)
    pub fn global() -> Self {
        Self::new(&global::meter(METER_NAME))
    }

    fn instrument(&self, counter: SyncCounter) -> &Counter<u64> {
        match counter {
            SyncCounter::ReconcilesStarted => &self.reconciles,
            SyncCounter::CronJobsUpdated => &self.cronjobs_updated,
            SyncCounter::JobsDeleted => &self.jobs_deleted,
            SyncCounter::Errors => &self.errors,
        }
    }
}

impl SyncMetrics for OtelSyncMetrics {
    fn increment(&self, counter: SyncCounter, namespace: &str, name: &str) {
        self.instrument(counter)
            .add(1, &counter.attributes(namespace, name));
    }
}

/// Build the scrape router
///
/// - `GET /metrics` → Prometheus text exposition of `registry`
pub fn metrics_routes(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(registry)
}

async fn scrape(State(registry): State<Registry>) -> Response {
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        Ok(()) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], buffer).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve `/metrics` on `addr` until the process exits
pub async fn start_metrics_server(addr: SocketAddr, registry: Registry) {
    crate::health::serve(addr, metrics_routes(registry), "Metrics").await;
}
