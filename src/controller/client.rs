//! Cluster store operations used by the image sync controller

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, PostParams, PropagationPolicy};
use kube::{Client, ResourceExt};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::error::{is_conflict, is_not_found};
use crate::{Error, CRONJOB_KIND};

/// Trait abstracting Kubernetes client operations for image sync
///
/// This trait allows substituting an in-memory store in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Deployment, or `None` if it no longer exists
    async fn get_deployment(&self, namespace: &str, name: &str)
        -> Result<Option<Deployment>, Error>;

    /// List all CronJobs in a namespace, in store order
    async fn list_cronjobs(&self, namespace: &str) -> Result<Vec<CronJob>, Error>;

    /// Replace a CronJob, guarded by its `resourceVersion`
    ///
    /// Returns [`Error::Conflict`] when the CronJob changed since it was read.
    async fn replace_cronjob(&self, cronjob: &CronJob) -> Result<CronJob, Error>;

    /// List all Jobs in a namespace, in store order
    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, Error>;

    /// Delete a Job with the given propagation policy
    ///
    /// A Job that is already gone is not an error.
    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<(), Error>;

    /// Delete every Pod in the namespace matching a label selector
    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(deployment) => Ok(Some(deployment)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_cronjobs(&self, namespace: &str) -> Result<Vec<CronJob>, Error> {
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_cronjob(&self, cronjob: &CronJob) -> Result<CronJob, Error> {
        let namespace = cronjob
            .namespace()
            .ok_or_else(|| Error::missing_field(CRONJOB_KIND, "metadata.namespace"))?;
        let name = cronjob.name_any();
        let api: Api<CronJob> = Api::namespaced(self.client.clone(), &namespace);

        // replace() sends metadata.resourceVersion; a stale one yields 409
        match api.replace(&name, &PostParams::default(), cronjob).await {
            Ok(updated) => Ok(updated),
            Err(e) if is_conflict(&e) => Err(Error::conflict(CRONJOB_KIND, namespace, name)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<(), Error> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let params = DeleteParams {
            propagation_policy: Some(propagation),
            ..Default::default()
        };
        match api.delete(name, &params).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(job = %name, namespace = %namespace, "job already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(label_selector),
        )
        .await?;
        Ok(())
    }
}
