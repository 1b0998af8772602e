//! Command-line and environment configuration

use std::net::SocketAddr;

use clap::Parser;

use crate::sync::MatchRules;
use crate::telemetry::{LogFormat, TelemetryConfig};
use crate::{Error, CONTROLLER_NAME};

/// Keeps CronJob job-template images in sync with their Deployments
#[derive(Parser, Debug, Clone)]
#[command(name = "cronjob-image-sync", version, about, long_about = None)]
pub struct ControllerArgs {
    /// Only watch Deployments in this namespace (all namespaces if unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Number of Deployments reconciled in parallel
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES", default_value_t = 2)]
    pub max_concurrent_reconciles: u16,

    /// Address serving /healthz and /readyz
    #[arg(long, env = "HEALTH_PROBE_ADDR", default_value = "0.0.0.0:8081")]
    pub health_probe_addr: SocketAddr,

    /// Address serving Prometheus /metrics
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Run only while holding the leader Lease
    #[arg(long, env = "LEADER_ELECT")]
    pub leader_elect: bool,

    /// Name of the leader Lease
    #[arg(
        long,
        env = "LEADER_ELECTION_ID",
        default_value = "cronjob-controller.example.com"
    )]
    pub leader_election_id: String,

    /// Namespace of the leader Lease
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub leader_election_namespace: String,

    /// Do not relate CronJobs to a Deployment just because they share an image
    #[arg(long, env = "DISABLE_IMAGE_MATCH")]
    pub disable_image_match: bool,

    /// OTLP collector endpoint for traces and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Log line encoding
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    pub log_format: LogFormat,
}

impl ControllerArgs {
    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_concurrent_reconciles == 0 {
            return Err(Error::invalid_config(
                "--max-concurrent-reconciles must be at least 1",
            ));
        }
        if self.leader_elect && self.leader_election_id.is_empty() {
            return Err(Error::invalid_config(
                "--leader-election-id must not be empty when leader election is on",
            ));
        }
        Ok(())
    }

    /// CronJob matching rules selected by the flags
    pub fn match_rules(&self) -> MatchRules {
        MatchRules {
            shared_image: !self.disable_image_match,
        }
    }

    /// Telemetry settings selected by the flags
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: CONTROLLER_NAME.to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            log_format: self.log_format,
        }
    }
}
