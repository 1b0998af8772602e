//! Leader election using Kubernetes Leases
//!
//! Only the replica holding the `coordination.k8s.io/v1` Lease runs the
//! controller. Standbys poll until the lease expires or is released.
//!
//! # Atomicity
//!
//! Every write carries the resourceVersion that was read. If the lease
//! changed in between, the write fails with 409 and the attempt counts as
//! not acquired, so two replicas can never both believe they lead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{is_conflict, is_not_found};
use crate::{Error, CONTROLLER_NAME};

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// What a replica may do with the lease it just read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseDecision {
    /// We hold it; bump the renew time
    Renew,
    /// Nobody holds a live lease; take it over
    TakeOver,
    /// Someone else holds a live lease
    Wait,
}

/// Whether a lease spec has lapsed at `now`
///
/// A lease without renew time or duration counts as expired.
pub fn lease_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let renew_time = spec.and_then(|s| s.renew_time.as_ref());
    let duration_secs = spec.and_then(|s| s.lease_duration_seconds);
    match (renew_time, duration_secs) {
        (Some(rt), Some(duration)) => now > rt.0 + chrono::Duration::seconds(duration as i64),
        _ => true,
    }
}

/// Decide how `identity` should treat an existing lease
pub fn decide(lease: &Lease, identity: &str, now: DateTime<Utc>) -> LeaseDecision {
    let spec = lease.spec.as_ref();
    let holder = spec.and_then(|s| s.holder_identity.as_deref());

    if holder == Some(identity) {
        LeaseDecision::Renew
    } else if holder.is_none() || lease_expired(spec, now) {
        LeaseDecision::TakeOver
    } else {
        LeaseDecision::Wait
    }
}

/// Leader elector using Kubernetes Leases
pub struct LeaderElector {
    client: Client,
    lease_name: String,
    namespace: String,
    identity: String,
    lease_duration: Duration,
    renew_interval: Duration,
    retry_interval: Duration,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    /// Create a new leader elector with default timing (30s lease, 10s renew, 5s retry)
    pub fn new(client: Client, lease_name: &str, namespace: &str, identity: &str) -> Self {
        Self {
            client,
            lease_name: lease_name.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            lease_duration: LEASE_DURATION,
            renew_interval: RENEW_INTERVAL,
            retry_interval: RETRY_INTERVAL,
            is_leader: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this replica currently holds the lease
    pub fn is_leader(&self) -> bool {
        self.is_leader.load(Ordering::SeqCst)
    }

    /// Block until leadership is acquired, then return a guard
    ///
    /// The guard keeps renewing the lease in the background.
    pub async fn acquire(self: Arc<Self>) -> LeaderGuard {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            "Waiting for leadership..."
        );

        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Leadership acquired");
                    self.is_leader.store(true, Ordering::SeqCst);
                    return self.create_guard();
                }
                Ok(false) => {
                    debug!(
                        identity = %self.identity,
                        retry_secs = self.retry_interval.as_secs(),
                        "Lease held by another, waiting..."
                    );
                }
                Err(e) => {
                    warn!(
                        identity = %self.identity,
                        error = %e,
                        retry_secs = self.retry_interval.as_secs(),
                        "Failed to acquire lease, retrying..."
                    );
                }
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    fn create_guard(self: &Arc<Self>) -> LeaderGuard {
        let (lost_tx, lost_rx) = oneshot::channel();
        let elector = Arc::clone(self);
        let renewal_task = tokio::spawn(async move {
            elector.renewal_loop(lost_tx).await;
        });

        LeaderGuard {
            elector: Arc::clone(self),
            renewal_task,
            lost_rx: Some(lost_rx),
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let now = Utc::now();

        let lease = match api.get(&self.lease_name).await {
            Ok(lease) => lease,
            Err(e) if is_not_found(&e) => return self.create_lease(&api, now).await,
            Err(e) => return Err(e.into()),
        };

        match decide(&lease, &self.identity, now) {
            LeaseDecision::Renew => {
                let mut renewed = lease;
                if let Some(spec) = renewed.spec.as_mut() {
                    spec.renew_time = Some(MicroTime(now));
                }
                self.write_lease(&api, &renewed, "Lease renewed").await
            }
            LeaseDecision::TakeOver => {
                let transitions = lease
                    .spec
                    .as_ref()
                    .and_then(|s| s.lease_transitions)
                    .unwrap_or(0);
                let resource_version = lease
                    .metadata
                    .resource_version
                    .clone()
                    .ok_or_else(|| Error::leader_election("lease is missing resourceVersion"))?;
                let mut taken = self.lease_for(now, transitions + 1);
                taken.metadata.resource_version = Some(resource_version);
                self.write_lease(&api, &taken, "Took over expired lease").await
            }
            LeaseDecision::Wait => Ok(false),
        }
    }

    fn lease_for(&self, now: DateTime<Utc>, transitions: i32) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(self.lease_duration.as_secs() as i32),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(transitions),
                ..Default::default()
            }),
        }
    }

    async fn create_lease(&self, api: &Api<Lease>, now: DateTime<Utc>) -> Result<bool, Error> {
        match api.create(&PostParams::default(), &self.lease_for(now, 0)).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created new lease");
                Ok(true)
            }
            Err(e) if is_conflict(&e) => {
                debug!(identity = %self.identity, "Lease creation conflict, will retry");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the lease, guarded by the resourceVersion it carries
    async fn write_lease(&self, api: &Api<Lease>, lease: &Lease, done: &str) -> Result<bool, Error> {
        match api
            .replace(&self.lease_name, &PostParams::default(), lease)
            .await
        {
            Ok(_) => {
                debug!(identity = %self.identity, "{}", done);
                Ok(true)
            }
            Err(e) if is_conflict(&e) => {
                debug!(identity = %self.identity, "Lease write conflict");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn renewal_loop(&self, lost_tx: oneshot::Sender<()>) {
        loop {
            tokio::time::sleep(self.renew_interval).await;

            match self.try_acquire_or_renew().await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(identity = %self.identity, "Leadership lost");
                    self.is_leader.store(false, Ordering::SeqCst);
                    let _ = lost_tx.send(());
                    return;
                }
            }
        }
    }

    /// Clear the holder so a standby can take over without waiting for expiry
    async fn release_lease(&self) -> Result<(), Error> {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);

        let lease = match api.get(&self.lease_name).await {
            Ok(l) => l,
            Err(e) if is_not_found(&e) => {
                debug!(identity = %self.identity, "Lease not found, nothing to release");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let holder = lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref());
        if holder != Some(self.identity.as_str()) {
            debug!(identity = %self.identity, "Not the lease holder, nothing to release");
            return Ok(());
        }

        let patch = release_patch(Utc::now())?;
        let params = PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        api.patch(&self.lease_name, &params, &Patch::Merge(&patch))
        .await?;

        info!(identity = %self.identity, "Lease released for fast failover");
        Ok(())
    }
}

/// Merge patch that drops the holder and backdates the renew time
///
/// `renewTime` is a `MicroTime`; the API server only accepts it with
/// microsecond precision and a `Z` suffix.
fn release_patch(now: DateTime<Utc>) -> Result<serde_json::Value, Error> {
    let past = MicroTime(now - chrono::Duration::seconds(60));
    let renew_time = serde_json::to_value(&past)
        .map_err(|e| Error::leader_election(format!("failed to encode renew time: {e}")))?;
    Ok(json!({
        "spec": {
            "holderIdentity": null,
            "renewTime": renew_time
        }
    }))
}

/// Guard that maintains leadership
///
/// The renewal task is aborted when the guard is dropped.
pub struct LeaderGuard {
    elector: Arc<LeaderElector>,
    renewal_task: JoinHandle<()>,
    lost_rx: Option<oneshot::Receiver<()>>,
}

impl LeaderGuard {
    /// Wait until leadership is lost
    pub async fn lost(&mut self) {
        if let Some(rx) = self.lost_rx.take() {
            let _ = rx.await;
        }
    }

    /// Release leadership by clearing the lease holder
    pub async fn release_leadership(&self) -> Result<(), Error> {
        self.elector.release_lease().await
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.elector.is_leader.store(false, Ordering::SeqCst);
        self.renewal_task.abort();
        info!(identity = %self.elector.identity, "Leadership released");
    }
}
