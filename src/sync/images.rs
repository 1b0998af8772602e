//! Image diff between a Deployment and a CronJob's job template
//!
//! Containers are matched by name. A CronJob container whose name the
//! Deployment does not declare falls back to the Deployment's first
//! container image. Only `image` is ever written.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Container;

use crate::object::{cronjob_containers_mut, deployment_containers, image_of};

/// Authoritative images taken from a Deployment's pod template
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredImages {
    by_name: BTreeMap<String, String>,
    fallback: Option<String>,
}

impl DesiredImages {
    /// Collect the images of a Deployment's containers
    pub fn from_deployment(deployment: &Deployment) -> Self {
        Self::from_containers(deployment_containers(deployment))
    }

    /// Collect images from a container list in declaration order
    ///
    /// The first container's image becomes the fallback for unknown names.
    pub fn from_containers(containers: &[Container]) -> Self {
        let by_name = containers
            .iter()
            .map(|c| (c.name.clone(), image_of(c).to_string()))
            .collect();
        let fallback = containers.first().map(|c| image_of(c).to_string());
        Self { by_name, fallback }
    }

    /// The image a container with this name should run, if any
    pub fn target_for(&self, container_name: &str) -> Option<&str> {
        self.by_name
            .get(container_name)
            .or(self.fallback.as_ref())
            .map(String::as_str)
    }
}

/// One container image rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageChange {
    /// Container name in the CronJob template
    pub container: String,
    /// Image before the rewrite (empty if unset)
    pub from: String,
    /// Image after the rewrite
    pub to: String,
}

impl fmt::Display for ImageChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.container, self.from, self.to)
    }
}

/// Bring container images in line with the desired images
///
/// Returns the changes made, in container order. An empty result means the
/// containers were already in sync and nothing was touched.
pub fn sync_containers(desired: &DesiredImages, containers: &mut [Container]) -> Vec<ImageChange> {
    let mut changes = Vec::new();
    for container in containers.iter_mut() {
        let Some(target) = desired.target_for(&container.name) else {
            continue;
        };
        let current = image_of(container);
        if current != target {
            changes.push(ImageChange {
                container: container.name.clone(),
                from: current.to_string(),
                to: target.to_string(),
            });
            container.image = Some(target.to_string());
        }
    }
    changes
}

/// Sync the job-template containers of a CronJob in place
pub fn sync_cronjob(desired: &DesiredImages, cronjob: &mut CronJob) -> Vec<ImageChange> {
    match cronjob_containers_mut(cronjob) {
        Some(containers) => sync_containers(desired, containers),
        None => Vec::new(),
    }
}
