//! cronjob-image-sync controller binary

use std::sync::Arc;

use clap::Parser;
use kube::Client;

use cronjob_image_sync::config::ControllerArgs;
use cronjob_image_sync::controller::{build_controller, deployment_api, Context};
use cronjob_image_sync::health::{start_health_server, Readiness};
use cronjob_image_sync::leader_election::LeaderElector;
use cronjob_image_sync::metrics::start_metrics_server;
use cronjob_image_sync::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ControllerArgs::parse();
    args.validate()?;

    let registry = init_telemetry(args.telemetry())?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kubernetes client: {}", e))?;

    tokio::spawn(start_metrics_server(args.metrics_addr, registry));

    let readiness = Readiness::default();
    tokio::spawn(start_health_server(
        args.health_probe_addr,
        readiness.clone(),
    ));

    let mut guard = if args.leader_elect {
        let identity = std::env::var("POD_NAME")
            .unwrap_or_else(|_| format!("cronjob-image-sync-{}", std::process::id()));
        let elector = Arc::new(LeaderElector::new(
            client.clone(),
            &args.leader_election_id,
            &args.leader_election_namespace,
            &identity,
        ));
        Some(elector.acquire().await)
    } else {
        None
    };

    let ctx = Arc::new(
        Context::builder(client.clone())
            .match_rules(args.match_rules())
            .build(),
    );
    let deployments = deployment_api(client, args.watch_namespace.as_deref());

    tracing::info!(
        namespace = args.watch_namespace.as_deref().unwrap_or("<all>"),
        image_match = !args.disable_image_match,
        "Starting cronjob image sync controller"
    );
    let controller = build_controller(
        deployments,
        ctx,
        args.max_concurrent_reconciles,
        readiness,
    );

    match guard.as_mut() {
        Some(leader) => {
            let lost = tokio::select! {
                _ = controller => false,
                _ = leader.lost() => true,
            };
            if lost {
                tracing::error!("Leadership lost, exiting");
                return Err(anyhow::anyhow!("leadership lost"));
            }
            tracing::info!("Controller stopped, releasing leadership");
            if let Err(e) = leader.release_leadership().await {
                tracing::warn!(error = %e, "Failed to release leadership");
            }
        }
        None => controller.await,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
