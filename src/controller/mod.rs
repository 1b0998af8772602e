//! Deployment controller
//!
//! Watches Deployments and, for each one, keeps the job templates of its
//! CronJobs on the same images, clearing out Jobs spawned from the old
//! template. Controllers follow the Kubernetes observe-diff-act pattern.

pub mod client;
mod invalidate;
mod reconcile;
mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{KubeClient, KubeClientImpl};
pub use invalidate::invalidate_jobs;
pub use reconcile::{
    error_policy, reconcile, reconcile_key, Context, ContextBuilder, ReconcileSummary,
};
pub use runner::{build_controller, deployment_api};
