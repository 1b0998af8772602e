//! Shared fixtures for the kind stories

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, Namespace, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::api::{Api, DeleteParams, PostParams};
use kube::Client;
use tokio::task::JoinHandle;

use cronjob_image_sync::controller::{build_controller, deployment_api, Context};
use cronjob_image_sync::health::Readiness;
use cronjob_image_sync::sync::MatchRules;

/// How long a story waits for the controller to converge
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect to the current kubeconfig context
pub async fn client() -> Client {
    Client::try_default()
        .await
        .expect("kind cluster should be reachable via kubeconfig")
}

/// Create a fresh namespace for one story
pub async fn create_namespace(client: &Client, prefix: &str) -> String {
    let name = format!("{prefix}-{}", std::process::id());
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = Namespace {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        ..Default::default()
    };
    api.create(&PostParams::default(), &ns)
        .await
        .expect("namespace should be created");
    name
}

/// Delete a story's namespace, ignoring errors
pub async fn delete_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Run the controller for one namespace until the handle is aborted
pub fn spawn_controller(client: &Client, namespace: &str, rules: MatchRules) -> JoinHandle<()> {
    let ctx = Arc::new(Context::builder(client.clone()).match_rules(rules).build());
    let deployments = deployment_api(client.clone(), Some(namespace));
    tokio::spawn(build_controller(deployments, ctx, 2, Readiness::default()))
}

/// Poll `check` until it returns true or the timeout passes
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    loop {
        if check().await {
            return;
        }
        if start.elapsed() > CONVERGE_TIMEOUT {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn pod_template(labels: Option<BTreeMap<String, String>>, container: &str, image: &str) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels,
            ..Default::default()
        }),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: container.to_string(),
                image: Some(image.to_string()),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
    }
}

/// A Deployment with zero replicas so no image needs pulling
pub fn deployment(namespace: &str, name: &str, container: &str, image: &str) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    let mut template = pod_template(Some(labels.clone()), container, image);
    if let Some(spec) = template.spec.as_mut() {
        spec.restart_policy = None;
    }
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(0),
            selector: LabelSelector {
                match_labels: Some(labels),
                ..Default::default()
            },
            template,
            ..Default::default()
        }),
        status: None,
    }
}

/// A suspended CronJob so the cluster never schedules it on its own
pub fn cronjob(
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    container: &str,
    image: &str,
) -> CronJob {
    CronJob {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(CronJobSpec {
            schedule: "0 0 1 1 *".to_string(),
            suspend: Some(true),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(JobSpec {
                    template: pod_template(None, container, image),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// A suspended Job owned by `owner`, as the CronJob controller would create it
pub fn job_owned_by(owner: &CronJob, name: &str, container: &str, image: &str) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: owner.metadata.namespace.clone(),
            owner_references: Some(vec![OwnerReference {
                api_version: "batch/v1".to_string(),
                kind: "CronJob".to_string(),
                name: owner.metadata.name.clone().unwrap_or_default(),
                uid: owner.metadata.uid.clone().unwrap_or_default(),
                controller: Some(true),
                block_owner_deletion: Some(true),
            }]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            suspend: Some(true),
            template: pod_template(None, container, image),
            ..Default::default()
        }),
        status: None,
    }
}

/// First job-template image of a CronJob
pub fn template_image(cronjob: &CronJob) -> Option<String> {
    cronjob
        .spec
        .as_ref()?
        .job_template
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .first()?
        .image
        .clone()
}
