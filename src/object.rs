//! Identity keys and container accessors for the watched object kinds
//!
//! Deployments, CronJobs and Jobs nest their pod specs at different depths
//! and keep almost everything optional. These helpers flatten that so the
//! sync logic can work with plain slices.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::Container;
use kube::{Resource, ResourceExt};

use crate::Error;

/// Namespaced identity of an object (the reconcile key for Deployments)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object namespace
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a key from any namespaced resource
    ///
    /// Fails when the object has no name or no namespace.
    pub fn of<K>(obj: &K) -> Result<Self, Error>
    where
        K: Resource<DynamicType = ()>,
    {
        let kind = K::kind(&());
        let name = obj
            .meta()
            .name
            .clone()
            .ok_or_else(|| Error::missing_field(kind.as_ref(), "metadata.name"))?;
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::missing_field(kind.as_ref(), "metadata.namespace"))?;
        Ok(Self { namespace, name })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Containers declared in a Deployment's pod template, in declaration order
pub fn deployment_containers(deployment: &Deployment) -> &[Container] {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default()
}

/// Containers declared in a CronJob's job template, in declaration order
pub fn cronjob_containers(cronjob: &CronJob) -> &[Container] {
    cronjob
        .spec
        .as_ref()
        .and_then(|s| s.job_template.spec.as_ref())
        .and_then(|j| j.template.spec.as_ref())
        .map(|p| p.containers.as_slice())
        .unwrap_or_default()
}

/// Mutable view of a CronJob's job-template containers
///
/// Returns `None` when the CronJob has no pod spec to edit.
pub fn cronjob_containers_mut(cronjob: &mut CronJob) -> Option<&mut Vec<Container>> {
    cronjob
        .spec
        .as_mut()
        .and_then(|s| s.job_template.spec.as_mut())
        .and_then(|j| j.template.spec.as_mut())
        .map(|p| &mut p.containers)
}

/// Image of a container, treating an unset image as empty
pub fn image_of(container: &Container) -> &str {
    container.image.as_deref().unwrap_or_default()
}
