//! cronjob-image-sync - keeps CronJob images in step with their Deployments
//!
//! Whenever a Deployment changes, the controller finds the CronJobs related
//! to it, rewrites their job-template container images to match, and
//! deletes the Jobs (and their Pods) those CronJobs already spawned so the
//! next run starts from the new image.
//!
//! # Modules
//!
//! - [`sync`] - Pure matching and image-diff logic
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`events`] - Kubernetes Event publishing
//! - [`metrics`] - OpenTelemetry counters
//! - [`backoff`] - Per-key requeue backoff
//! - [`config`] - Command-line configuration
//! - [`health`] - Liveness and readiness probes
//! - [`leader_election`] - Lease-based leader election
//! - [`telemetry`] - Tracing and metrics export setup
//! - [`error`] - Error types for the controller

#![deny(missing_docs)]

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod health;
pub mod leader_election;
pub mod metrics;
pub mod object;
pub mod sync;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Name reported on Events and used as field manager
pub const CONTROLLER_NAME: &str = "cronjob-controller";

/// Kind named in owner references of Jobs spawned by a CronJob
pub const CRONJOB_KIND: &str = "CronJob";

/// Label the Job controller puts on every Pod of a Job
pub const JOB_NAME_LABEL: &str = "job-name";

/// CronJob label naming the Deployment that manages it
pub const MANAGED_BY_LABEL: &str = "managed-by-deployment";

/// CronJob annotation naming the managing Deployment as `<namespace>/<name>`
pub const MANAGED_BY_ANNOTATION: &str = "controller.example.com/managed-by-deployment";
