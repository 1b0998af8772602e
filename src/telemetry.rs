//! Telemetry initialization for OpenTelemetry tracing and metrics
//!
//! Provides unified telemetry setup with:
//! - W3C TraceContext propagation for distributed tracing
//! - A meter provider that always feeds a Prometheus registry, plus OTLP
//!   export for traces and metrics when an endpoint is configured
//! - Kubernetes resource detection (pod, namespace, node)
//! - JSON or plain-text structured logging

use clap::ValueEnum;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::TracerProvider;
use opentelemetry_sdk::{runtime, Resource};
use prometheus::Registry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::Error;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str =
    "info,cronjob_image_sync=debug,kube=info,tower=warn,hyper=warn";

/// Log line encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable lines
    Text,
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces and metrics
    pub service_name: String,

    /// OTLP endpoint for trace and metric export (e.g., "http://otel-collector:4317")
    /// If None, traces and metrics are only logged locally
    pub otlp_endpoint: Option<String>,

    /// Log line encoding
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: crate::CONTROLLER_NAME.to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            log_format: LogFormat::default(),
        }
    }
}

/// Initialize telemetry with the given configuration
///
/// Must be called once, before the controller starts. Returns the registry
/// the controller counters are exported through.
pub fn init_telemetry(config: TelemetryConfig) -> Result<Registry, Error> {
    global::set_text_map_propagator(TraceContextPropagator::new());

    let registry = Registry::new();
    let meter_provider = meter_provider(
        &registry,
        &config.service_name,
        config.otlp_endpoint.as_deref(),
    )?;
    global::set_meter_provider(meter_provider);

    let resource = build_resource(&config.service_name);

    // Option<Layer> implements Layer, so absent layers compose as no-ops
    let otel_layer = if let Some(endpoint) = &config.otlp_endpoint {
        let provider = init_otlp_tracer(endpoint, resource)?;
        let tracer = provider.tracer(config.service_name.clone());
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json_layer = (config.log_format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
    });
    let text_layer = (config.log_format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| Error::telemetry(format!("failed to initialize tracing subscriber: {e}")))?;

    Ok(registry)
}

/// Meter provider exporting into `registry`, and to OTLP when `otlp_endpoint` is set
pub fn meter_provider(
    registry: &Registry,
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<SdkMeterProvider, Error> {
    // Units stay on the instruments for OTLP; Prometheus names carry none
    let prometheus = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .without_units()
        .build()
        .map_err(|e| Error::telemetry(format!("failed to initialize prometheus exporter: {e}")))?;

    let mut builder = SdkMeterProvider::builder()
        .with_reader(prometheus)
        .with_resource(build_resource(service_name));

    if let Some(endpoint) = otlp_endpoint {
        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| Error::telemetry(format!("failed to initialize metrics exporter: {e}")))?;
        let reader =
            opentelemetry_sdk::metrics::PeriodicReader::builder(exporter, runtime::Tokio).build();
        builder = builder.with_reader(reader);
    }

    Ok(builder.build())
}

/// Build OpenTelemetry resource with service info and K8s detection
fn build_resource(service_name: &str) -> Resource {
    let mut attributes = vec![KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_NAME,
        service_name.to_string(),
    )];

    // Set via the Deployment downward API
    for (var, key) in [
        ("POD_NAME", "k8s.pod.name"),
        ("POD_NAMESPACE", "k8s.namespace.name"),
        ("NODE_NAME", "k8s.node.name"),
    ] {
        if let Ok(value) = std::env::var(var) {
            attributes.push(KeyValue::new(key, value));
        }
    }

    attributes.push(KeyValue::new(
        opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
        env!("CARGO_PKG_VERSION"),
    ));

    Resource::new(attributes)
}

fn init_otlp_tracer(endpoint: &str, resource: Resource) -> Result<TracerProvider, Error> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| Error::telemetry(format!("failed to initialize tracer: {e}")))?;

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(resource)
        .build();

    global::set_tracer_provider(provider.clone());

    Ok(provider)
}
