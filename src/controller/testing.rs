//! In-memory store and recording reporters for controller tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{ObjectReference, Pod};
use kube::api::PropagationPolicy;
use kube::runtime::events::EventType;
use kube::ResourceExt;

use crate::events::EventPublisher;
use crate::metrics::{SyncCounter, SyncMetrics};
use crate::{Error, CRONJOB_KIND};

use super::client::KubeClient;
use super::Context;

#[derive(Default)]
struct Store {
    deployments: Vec<Deployment>,
    cronjobs: Vec<CronJob>,
    jobs: Vec<Job>,
    pods: Vec<Pod>,
    cronjob_writes: Vec<String>,
    job_deletions: Vec<(String, PropagationPolicy)>,
    pod_selectors: Vec<String>,
}

/// A namespaced object store that behaves like the API server for the
/// operations the controller uses, including resourceVersion conflicts
#[derive(Default)]
pub struct FakeCluster {
    store: Mutex<Store>,
}

fn in_namespace<K: ResourceExt>(obj: &K, namespace: &str) -> bool {
    obj.namespace().as_deref() == Some(namespace)
}

fn same_object<K: ResourceExt>(obj: &K, namespace: &str, name: &str) -> bool {
    in_namespace(obj, namespace) && obj.name_any() == name
}

impl FakeCluster {
    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store.lock().expect("mutex should not be poisoned")
    }

    pub fn with_deployments(self, deployments: Vec<Deployment>) -> Self {
        self.lock().deployments = deployments;
        self
    }

    pub fn with_cronjobs(self, cronjobs: Vec<CronJob>) -> Self {
        self.lock().cronjobs = cronjobs;
        self
    }

    pub fn with_jobs(self, jobs: Vec<Job>) -> Self {
        self.lock().jobs = jobs;
        self
    }

    pub fn with_pods(self, pods: Vec<Pod>) -> Self {
        self.lock().pods = pods;
        self
    }

    /// Replace a Deployment's stored state, as an external actor would
    pub fn put_deployment(&self, deployment: Deployment) {
        let mut store = self.lock();
        let ns = deployment.namespace().unwrap_or_default();
        let name = deployment.name_any();
        store
            .deployments
            .retain(|d| !same_object(d, &ns, &name));
        store.deployments.push(deployment);
    }

    pub fn remove_deployment(&self, namespace: &str, name: &str) {
        self.lock()
            .deployments
            .retain(|d| !same_object(d, namespace, name));
    }

    pub fn cronjob(&self, namespace: &str, name: &str) -> Option<CronJob> {
        self.lock()
            .cronjobs
            .iter()
            .find(|c| same_object(*c, namespace, name))
            .cloned()
    }

    pub fn job_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .jobs
            .iter()
            .filter(|j| in_namespace(*j, namespace))
            .map(|j| j.name_any())
            .collect()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.lock()
            .pods
            .iter()
            .filter(|p| in_namespace(*p, namespace))
            .map(|p| p.name_any())
            .collect()
    }

    /// Names of CronJobs written, in write order
    pub fn cronjob_writes(&self) -> Vec<String> {
        self.lock().cronjob_writes.clone()
    }

    pub fn job_deletions(&self) -> Vec<(String, PropagationPolicy)> {
        self.lock().job_deletions.clone()
    }

    pub fn pod_selectors(&self) -> Vec<String> {
        self.lock().pod_selectors.clone()
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Deployment>, Error> {
        Ok(self
            .lock()
            .deployments
            .iter()
            .find(|d| same_object(*d, namespace, name))
            .cloned())
    }

    async fn list_cronjobs(&self, namespace: &str) -> Result<Vec<CronJob>, Error> {
        Ok(self
            .lock()
            .cronjobs
            .iter()
            .filter(|c| in_namespace(*c, namespace))
            .cloned()
            .collect())
    }

    async fn replace_cronjob(&self, cronjob: &CronJob) -> Result<CronJob, Error> {
        let ns = cronjob.namespace().unwrap_or_default();
        let name = cronjob.name_any();
        let mut store = self.lock();

        let Some(stored) = store
            .cronjobs
            .iter_mut()
            .find(|c| same_object(*c, &ns, &name))
        else {
            return Err(Error::missing_field(CRONJOB_KIND, format!("{ns}/{name} in store")));
        };
        if stored.metadata.resource_version != cronjob.metadata.resource_version {
            return Err(Error::conflict(CRONJOB_KIND, ns, name));
        }

        let next_version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        *stored = cronjob.clone();
        stored.metadata.resource_version = Some(next_version.to_string());
        let updated = stored.clone();
        store.cronjob_writes.push(name);
        Ok(updated)
    }

    async fn list_jobs(&self, namespace: &str) -> Result<Vec<Job>, Error> {
        Ok(self
            .lock()
            .jobs
            .iter()
            .filter(|j| in_namespace(*j, namespace))
            .cloned()
            .collect())
    }

    async fn delete_job(
        &self,
        namespace: &str,
        name: &str,
        propagation: PropagationPolicy,
    ) -> Result<(), Error> {
        let mut store = self.lock();
        store.jobs.retain(|j| !same_object(j, namespace, name));
        store.job_deletions.push((name.to_string(), propagation));
        Ok(())
    }

    async fn delete_pods(&self, namespace: &str, label_selector: &str) -> Result<(), Error> {
        let mut store = self.lock();
        if let Some((key, value)) = label_selector.split_once('=') {
            store.pods.retain(|p| {
                !(in_namespace(p, namespace)
                    && p.labels().get(key).map(String::as_str) == Some(value))
            });
        }
        store.pod_selectors.push(label_selector.to_string());
        Ok(())
    }
}

/// One published event, flattened for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: String,
    pub name: String,
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// Event publisher that keeps every event in memory
#[derive(Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .expect("mutex should not be poisoned")
            .clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.all().into_iter().map(|e| e.reason).collect()
    }

    pub fn warnings(&self) -> Vec<RecordedEvent> {
        self.all().into_iter().filter(|e| e.warning).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events
            .lock()
            .expect("mutex should not be poisoned")
            .push(RecordedEvent {
                kind: resource_ref.kind.clone().unwrap_or_default(),
                name: resource_ref.name.clone().unwrap_or_default(),
                warning: matches!(type_, EventType::Warning),
                reason: reason.to_string(),
                note,
            });
    }
}

/// Counter sink that keeps every increment in memory
#[derive(Default)]
pub struct RecordingMetrics {
    increments: Mutex<Vec<(SyncCounter, String, String)>>,
}

impl RecordingMetrics {
    pub fn count(&self, counter: SyncCounter, namespace: &str, name: &str) -> usize {
        self.increments
            .lock()
            .expect("mutex should not be poisoned")
            .iter()
            .filter(|(c, ns, n)| *c == counter && ns == namespace && n == name)
            .count()
    }

    pub fn total(&self, counter: SyncCounter) -> usize {
        self.increments
            .lock()
            .expect("mutex should not be poisoned")
            .iter()
            .filter(|(c, _, _)| *c == counter)
            .count()
    }
}

impl SyncMetrics for RecordingMetrics {
    fn increment(&self, counter: SyncCounter, namespace: &str, name: &str) {
        self.increments
            .lock()
            .expect("mutex should not be poisoned")
            .push((counter, namespace.to_string(), name.to_string()));
    }
}

impl Context {
    /// Context over a fake cluster, returning handles to inspect afterwards
    pub fn with_fakes(
        cluster: FakeCluster,
    ) -> (
        Context,
        Arc<FakeCluster>,
        Arc<RecordingEvents>,
        Arc<RecordingMetrics>,
    ) {
        let cluster = Arc::new(cluster);
        let events = Arc::new(RecordingEvents::default());
        let metrics = Arc::new(RecordingMetrics::default());
        let ctx = Context::for_testing(cluster.clone(), events.clone(), metrics.clone());
        (ctx, cluster, events, metrics)
    }
}
