//! Deployment → CronJob relation discovery
//!
//! A CronJob is considered managed by a Deployment when any of three rules
//! holds:
//!
//! 1. label `managed-by-deployment=<deployment name>`
//! 2. annotation `controller.example.com/managed-by-deployment=<ns>/<name>`
//! 3. the CronJob runs at least one image the Deployment also runs
//!
//! Rule 3 is a heuristic. Two unrelated workloads built on the same base
//! image will match each other. It can be switched off with
//! [`MatchRules::shared_image`].

use std::collections::BTreeSet;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use kube::ResourceExt;

use crate::object::{cronjob_containers, deployment_containers, image_of};
use crate::{MANAGED_BY_ANNOTATION, MANAGED_BY_LABEL};

/// Which matching rules are active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRules {
    /// Match CronJobs that share any container image with the Deployment
    pub shared_image: bool,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self { shared_image: true }
    }
}

/// Rule 1: the CronJob's `managed-by-deployment` label names the Deployment
pub fn label_matches(deployment: &Deployment, cronjob: &CronJob) -> bool {
    let name = deployment.name_any();
    cronjob
        .labels()
        .get(MANAGED_BY_LABEL)
        .is_some_and(|v| *v == name)
}

/// Rule 2: the CronJob's managed-by annotation is `<namespace>/<name>` of the Deployment
pub fn annotation_matches(deployment: &Deployment, cronjob: &CronJob) -> bool {
    let expected = format!(
        "{}/{}",
        deployment.namespace().unwrap_or_default(),
        deployment.name_any()
    );
    cronjob
        .annotations()
        .get(MANAGED_BY_ANNOTATION)
        .is_some_and(|v| *v == expected)
}

/// Rule 3: the CronJob and the Deployment run at least one common image
pub fn shares_image(deployment: &Deployment, cronjob: &CronJob) -> bool {
    let images: BTreeSet<&str> = deployment_containers(deployment)
        .iter()
        .map(image_of)
        .collect();
    cronjob_containers(cronjob)
        .iter()
        .any(|c| images.contains(image_of(c)))
}

/// Whether the CronJob is managed by the Deployment under the given rules
pub fn is_managed_by(deployment: &Deployment, cronjob: &CronJob, rules: MatchRules) -> bool {
    label_matches(deployment, cronjob)
        || annotation_matches(deployment, cronjob)
        || (rules.shared_image && shares_image(deployment, cronjob))
}

/// Select the CronJobs managed by the Deployment, keeping store order
///
/// Each candidate is tested once, so a CronJob that satisfies several rules
/// still appears a single time.
pub fn find_managed(
    deployment: &Deployment,
    candidates: Vec<CronJob>,
    rules: MatchRules,
) -> Vec<CronJob> {
    candidates
        .into_iter()
        .filter(|cj| is_managed_by(deployment, cj, rules))
        .collect()
}
