use std::sync::{Arc, Once};
use std::time::Duration;

use reliable_delivery::config::{ProducerControllerConfig, WorkPullingRouterConfig};
use reliable_delivery::durable_queue::DurableProducerQueue;
use reliable_delivery::producer_controller::{self, ProducerControllerHandle};
use reliable_delivery::service_discovery::ServiceDiscovery;
use reliable_delivery::types::{RequestNext, SequencedMessage};
use reliable_delivery::work_pulling_router::{self, WorkPullingRouterHandle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::level_filters::LevelFilter;

static TRACING: Once = Once::new();

/// Installs a test-scoped tracing subscriber exactly once per process,
/// mirroring `rabbitmq_client`'s `tests/common::init_test_environment`
/// (`tracing_subscriber::fmt().with_test_writer()`), minus its
/// `dotenvy`/live-broker setup this crate has no equivalent for.
fn init_test_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(LevelFilter::DEBUG)
            .with_target(false)
            .with_test_writer()
            .init();
    });
}

/// Fast-ticking config so tests observe the `ResendFirst` timer in
/// milliseconds rather than the real 1-second default, the same way
/// `websocket_connection.rs` shrinks `ping_interval` in its own tests
/// instead of pausing the clock.
pub fn test_producer_controller_config() -> ProducerControllerConfig {
    ProducerControllerConfig {
        support_resend_default: true,
        resend_first_interval: Duration::from_millis(50),
    }
}

pub fn test_work_pulling_router_config() -> WorkPullingRouterConfig {
    WorkPullingRouterConfig {
        buffer_size: 100,
        resend_first_interval: Duration::from_millis(50),
        support_resend_default: true,
    }
}

/// Starts a producer controller, bootstraps it to the active state, and
/// returns its handle alongside the producer/consumer channels.
///
/// ### returns
/// - task handle
/// - producer controller handle
/// - producer_rx - `RequestNext` notifications for the user producer
/// - consumer_rx - `SequencedMessage`s emitted to the consumer
pub fn start_test_producer_controller(
    producer_id: &str,
    config: ProducerControllerConfig,
) -> (
    JoinHandle<()>,
    ProducerControllerHandle<&'static str>,
    mpsc::UnboundedReceiver<RequestNext<&'static str>>,
    mpsc::UnboundedReceiver<SequencedMessage<&'static str>>,
) {
    init_test_tracing();

    let controller = producer_controller::spawn(producer_id.to_string(), config, None);

    let (producer_tx, producer_rx) = mpsc::unbounded_channel();
    let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();

    controller.handle.start(producer_tx);
    controller.handle.register_consumer(consumer_tx);

    (controller.task, controller.handle, producer_rx, consumer_rx)
}

pub fn start_test_producer_controller_with_durable_queue(
    producer_id: &str,
    config: ProducerControllerConfig,
    durable_queue: Arc<dyn DurableProducerQueue<&'static str>>,
) -> (
    JoinHandle<()>,
    ProducerControllerHandle<&'static str>,
    mpsc::UnboundedReceiver<RequestNext<&'static str>>,
    mpsc::UnboundedReceiver<SequencedMessage<&'static str>>,
) {
    init_test_tracing();

    let controller = producer_controller::spawn(producer_id.to_string(), config, Some(durable_queue));

    let (producer_tx, producer_rx) = mpsc::unbounded_channel();
    let (consumer_tx, consumer_rx) = mpsc::unbounded_channel();

    controller.handle.start(producer_tx);
    controller.handle.register_consumer(consumer_tx);

    (controller.task, controller.handle, producer_rx, consumer_rx)
}

/// Starts a work-pulling router bound to `service_key` on `service_discovery`
/// and bootstraps it with a producer reply address.
///
/// ### returns
/// - task handle
/// - router handle
/// - producer_rx - `RequestNext` notifications for the user producer
pub fn start_test_work_pulling_router(
    producer_id: &str,
    config: WorkPullingRouterConfig,
    service_discovery: Arc<dyn ServiceDiscovery<&'static str>>,
    service_key: &str,
) -> (
    JoinHandle<()>,
    WorkPullingRouterHandle<&'static str>,
    mpsc::UnboundedReceiver<RequestNext<&'static str>>,
) {
    init_test_tracing();

    let router = work_pulling_router::spawn(producer_id.to_string(), config, service_discovery, service_key.to_string());

    let (producer_tx, producer_rx) = mpsc::unbounded_channel();
    router.handle.start(producer_tx);

    (router.task, router.handle, producer_rx)
}
