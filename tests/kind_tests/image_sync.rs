//! Stories about Deployment rollouts reaching their CronJobs
//!
//! A platform team ships a web Deployment and a nightly report CronJob from
//! the same image. When the Deployment rolls forward, the CronJob must run
//! the new image on its next schedule, and any Job still holding the old
//! image must go away.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::api::{Api, Patch, PatchParams, PostParams};
use serde_json::json;

use cronjob_image_sync::sync::MatchRules;
use cronjob_image_sync::MANAGED_BY_LABEL;

use super::helpers::*;

/// Story: the web Deployment moves from nginx:1.21 to nginx:1.22. The
/// report CronJob, labeled as managed by web, follows it, and the Job it
/// spawned from the old template is deleted.
#[tokio::test]
#[ignore]
async fn story_rollout_updates_labeled_cronjob_and_clears_old_job() {
    let client = client().await;
    let ns = create_namespace(&client, "image-sync-rollout").await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &ns);
    let cronjobs: Api<CronJob> = Api::namespaced(client.clone(), &ns);
    let jobs: Api<Job> = Api::namespaced(client.clone(), &ns);

    deployments
        .create(
            &PostParams::default(),
            &deployment(&ns, "web", "nginx", "nginx:1.21"),
        )
        .await
        .expect("deployment should be created");
    let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), "web".to_string())]);
    let report = cronjobs
        .create(
            &PostParams::default(),
            &cronjob(&ns, "report", labels, "nginx", "nginx:1.21"),
        )
        .await
        .expect("cronjob should be created");
    jobs.create(
        &PostParams::default(),
        &job_owned_by(&report, "report-manual", "nginx", "nginx:1.21"),
    )
    .await
    .expect("job should be created");

    let controller = spawn_controller(&client, &ns, MatchRules::default());

    let patch = json!({
        "spec": {"template": {"spec": {"containers": [{"name": "nginx", "image": "nginx:1.22"}]}}}
    });
    deployments
        .patch("web", &PatchParams::default(), &Patch::Strategic(&patch))
        .await
        .expect("deployment image should be patched");

    wait_for("cronjob image to follow the deployment", || {
        let cronjobs = cronjobs.clone();
        async move {
            cronjobs
                .get("report")
                .await
                .ok()
                .and_then(|cj| template_image(&cj))
                .as_deref()
                == Some("nginx:1.22")
        }
    })
    .await;

    wait_for("stale job to be deleted", || {
        let jobs = jobs.clone();
        async move { jobs.get_opt("report-manual").await.ok().flatten().is_none() }
    })
    .await;

    controller.abort();
    delete_namespace(&client, &ns).await;
}

/// Story: with the shared-image rule switched off, an unlabeled CronJob
/// that happens to run the same image is left on its old version.
#[tokio::test]
#[ignore]
async fn story_unlabeled_cronjob_is_ignored_without_image_rule() {
    let client = client().await;
    let ns = create_namespace(&client, "image-sync-strict").await;

    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &ns);
    let cronjobs: Api<CronJob> = Api::namespaced(client.clone(), &ns);

    deployments
        .create(
            &PostParams::default(),
            &deployment(&ns, "web", "nginx", "nginx:1.21"),
        )
        .await
        .expect("deployment should be created");
    cronjobs
        .create(
            &PostParams::default(),
            &cronjob(&ns, "billing", BTreeMap::new(), "nginx", "nginx:1.21"),
        )
        .await
        .expect("unlabeled cronjob should be created");
    let labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), "web".to_string())]);
    cronjobs
        .create(
            &PostParams::default(),
            &cronjob(&ns, "report", labels, "nginx", "nginx:1.21"),
        )
        .await
        .expect("labeled cronjob should be created");

    let controller = spawn_controller(&client, &ns, MatchRules { shared_image: false });

    let patch = json!({
        "spec": {"template": {"spec": {"containers": [{"name": "nginx", "image": "nginx:1.22"}]}}}
    });
    deployments
        .patch("web", &PatchParams::default(), &Patch::Strategic(&patch))
        .await
        .expect("deployment image should be patched");

    // Once the labeled CronJob moved, the pass that would have touched
    // billing is over
    wait_for("labeled cronjob to follow the deployment", || {
        let cronjobs = cronjobs.clone();
        async move {
            cronjobs
                .get("report")
                .await
                .ok()
                .and_then(|cj| template_image(&cj))
                .as_deref()
                == Some("nginx:1.22")
        }
    })
    .await;

    let billing = cronjobs.get("billing").await.expect("billing should exist");
    assert_eq!(template_image(&billing).as_deref(), Some("nginx:1.21"));

    controller.abort();
    delete_namespace(&client, &ns).await;
}
