use std::time::Duration;

/// Recognized configuration for a [`crate::producer_controller::ProducerController`].
#[derive(Debug, Clone)]
pub struct ProducerControllerConfig {
    /// Initial resend-support hint used until the first `Request` arrives.
    pub support_resend_default: bool,

    /// Fixed delay between `ResendFirst` timer ticks.
    pub resend_first_interval: Duration,
}

impl Default for ProducerControllerConfig {
    fn default() -> Self {
        Self {
            support_resend_default: true,
            resend_first_interval: Duration::from_secs(1),
        }
    }
}

/// Recognized configuration for a [`crate::work_pulling_router::WorkPullingRouter`].
#[derive(Debug, Clone)]
pub struct WorkPullingRouterConfig {
    /// Max messages queued in `buffered_messages` while no worker has demand.
    pub buffer_size: usize,

    /// Per-worker `ResendFirst` interval, same semantics as
    /// [`ProducerControllerConfig::resend_first_interval`].
    pub resend_first_interval: Duration,

    /// Initial resend-support hint for newly registered workers.
    pub support_resend_default: bool,
}

impl Default for WorkPullingRouterConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            resend_first_interval: Duration::from_secs(1),
            support_resend_default: true,
        }
    }
}

/// Safety-net fallback used by an adjacent ask-adapter layer in the companion
/// replication subsystem. Not read or enforced by this crate; recorded here
/// so a host wiring an ask-adapter on top of
/// [`crate::producer_controller::ProducerControllerHandle`] has the documented
/// default to hand.
pub const REPLICATOR_MESSAGE_ADAPTER_UNEXPECTED_ASK_TIMEOUT: Duration = Duration::from_secs(20);

/// Pruning interval for the service-discovery consumer side. Irrelevant to
/// the producer-controller core; recorded for the same reason as
/// [`REPLICATOR_MESSAGE_ADAPTER_UNEXPECTED_ASK_TIMEOUT`].
pub const PRUNING_INTERVAL: Duration = Duration::from_secs(3);
