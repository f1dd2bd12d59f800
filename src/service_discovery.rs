use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::types::ConsumerEndpoint;

/// Opaque worker identity supplied by the service-discovery registry.
pub type WorkerId = String;

/// Current worker set for one work-pulling router: each worker's opaque
/// identity paired with the endpoint the router writes `SequencedMessage`s
/// to. The registry resolves identities to reachable endpoints; this crate
/// never assumes anything about how that resolution happens.
pub type WorkerSnapshot<A> = HashMap<WorkerId, ConsumerEndpoint<A>>;

/// Service-discovery registry that supplies the current worker set for a
/// work-pulling router.
///
/// Additions and removals are observed with eventual consistency; callers
/// must tolerate duplicate notifications and missed terminations (handled by
/// the producer-controller-level resend logic inside
/// [`crate::work_pulling_router`], not here).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ServiceDiscovery<A>: Send + Sync
where
    A: Send + 'static,
{
    /// Subscribes to `service_key` and returns a watch channel carrying
    /// periodic snapshots of the current worker set.
    async fn subscribe(&self, service_key: &str) -> anyhow::Result<watch::Receiver<WorkerSnapshot<A>>>;
}

/// Reference `ServiceDiscovery` implementation that serves a fixed, never
/// changing snapshot. Useful for tests and for simple deployments with a
/// statically known worker set (spec.md §1 treats the registry itself as an
/// external collaborator; this crate only needs to define and drive the
/// interface).
pub struct StaticServiceDiscovery<A> {
    workers: WorkerSnapshot<A>,
}

impl<A> StaticServiceDiscovery<A> {
    pub fn new(workers: impl IntoIterator<Item = (WorkerId, ConsumerEndpoint<A>)>) -> Self {
        Self {
            workers: workers.into_iter().collect(),
        }
    }
}

#[async_trait]
impl<A> ServiceDiscovery<A> for StaticServiceDiscovery<A>
where
    A: Send + Sync + 'static,
{
    async fn subscribe(&self, _service_key: &str) -> anyhow::Result<watch::Receiver<WorkerSnapshot<A>>> {
        let (_tx, rx) = watch::channel(self.workers.clone());
        Ok(rx)
    }
}

/// Reference `ServiceDiscovery` implementation whose snapshot can be updated
/// at runtime via the returned sender, for driving membership-change tests
/// against [`crate::work_pulling_router::WorkPullingRouter`].
pub struct WatchServiceDiscovery<A> {
    tx: watch::Sender<WorkerSnapshot<A>>,
}

impl<A> WatchServiceDiscovery<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub fn new(
        initial: impl IntoIterator<Item = (WorkerId, ConsumerEndpoint<A>)>,
    ) -> (Self, watch::Sender<WorkerSnapshot<A>>) {
        let (tx, _rx) = watch::channel(initial.into_iter().collect());
        (Self { tx: tx.clone() }, tx)
    }
}

#[async_trait]
impl<A> ServiceDiscovery<A> for WatchServiceDiscovery<A>
where
    A: Clone + Send + Sync + 'static,
{
    async fn subscribe(&self, _service_key: &str) -> anyhow::Result<watch::Receiver<WorkerSnapshot<A>>> {
        Ok(self.tx.subscribe())
    }
}
