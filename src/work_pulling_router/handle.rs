use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::WorkPullingRouterConfig;
use crate::types::{Ack, ConsumerEvent, ProducerEvent, Request, RequestNext, Resend, SeqNr};
use crate::service_discovery::{ServiceDiscovery, WorkerId};

use super::task::Task;

/// Control-plane events accepted by a [`WorkPullingRouter`]: producer
/// lifecycle (`Start`), the diagnostic `GetWorkerStats` query, and every
/// consumer-side protocol message tagged with the worker it came from
/// (spec.md §4.2 "Public contract").
#[derive(Debug)]
pub(crate) enum ControlEvent<A> {
    Start(mpsc::UnboundedSender<RequestNext<A>>),
    GetWorkerStats(oneshot::Sender<WorkerStats>),
    Consumer(WorkerId, ConsumerEvent),
}

/// Reply to `GetWorkerStats` (spec.md §4.2 names the operation; the reply
/// shape is a supplement — see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker_count: usize,
    pub demanding_count: usize,
}

/// Cloneable handle to a running work-pulling router task.
#[derive(Clone)]
pub struct WorkPullingRouterHandle<A> {
    control_tx: mpsc::UnboundedSender<ControlEvent<A>>,
    submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,
}

/// Handle to a spawned work-pulling router: the cloneable
/// [`WorkPullingRouterHandle`] plus the task's `JoinHandle`.
pub struct WorkPullingRouter<A> {
    pub handle: WorkPullingRouterHandle<A>,
    pub task: JoinHandle<()>,
}

impl<A> WorkPullingRouterHandle<A>
where
    A: Clone + Send + 'static,
{
    /// Binds/rebinds the producer reply address (spec.md §4.2 `Start`).
    pub fn start(&self, producer_ref: mpsc::UnboundedSender<RequestNext<A>>) {
        let _ = self.control_tx.send(ControlEvent::Start(producer_ref));
    }

    /// Submits a message without confirmation (spec.md §4.2 `Msg`). Must only
    /// be called in response to a `RequestNext` notification.
    pub fn msg(&self, payload: A) {
        let _ = self.submit_tx.send(ProducerEvent::Msg(payload));
    }

    /// Submits a message requesting confirmation (spec.md §4.2
    /// `MessageWithConfirmation`). Must only be called in response to a
    /// `RequestNext` notification.
    pub fn msg_with_confirmation(&self, payload: A) -> oneshot::Receiver<SeqNr> {
        let (reply_to, reply_rx) = oneshot::channel();
        let _ = self
            .submit_tx
            .send(ProducerEvent::MessageWithConfirmation(payload, reply_to));
        reply_rx
    }

    /// Queries the current worker count and how many currently hold
    /// outstanding demand (spec.md §4.2 `GetWorkerStats`).
    pub fn get_worker_stats(&self) -> oneshot::Receiver<WorkerStats> {
        let (reply_to, reply_rx) = oneshot::channel();
        let _ = self.control_tx.send(ControlEvent::GetWorkerStats(reply_to));
        reply_rx
    }

    /// Consumer-side `Request` from a specific worker (spec.md §3/§4.1,
    /// applied per-worker by §4.2).
    pub fn request(&self, worker_id: WorkerId, request: Request) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(worker_id, ConsumerEvent::Request(request)));
    }

    /// Consumer-side `Ack` from a specific worker.
    pub fn ack(&self, worker_id: WorkerId, ack: Ack) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(worker_id, ConsumerEvent::Ack(ack)));
    }

    /// Consumer-side `Resend` from a specific worker.
    pub fn resend(&self, worker_id: WorkerId, resend: Resend) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(worker_id, ConsumerEvent::Resend(resend)));
    }
}

/// Spawns a work-pulling router bound to `producer_id`, subscribing to
/// `service_key` on `service_discovery` for its worker set (spec.md §2
/// "WorkPullingRouter (WPR) — one per logical producer stream").
pub fn spawn<A>(
    producer_id: impl Into<String>,
    config: WorkPullingRouterConfig,
    service_discovery: Arc<dyn ServiceDiscovery<A>>,
    service_key: impl Into<String>,
) -> WorkPullingRouter<A>
where
    A: Clone + Send + Sync + 'static,
{
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (submit_tx, submit_rx) = mpsc::unbounded_channel();

    let handle = WorkPullingRouterHandle {
        control_tx,
        submit_tx,
    };

    let task_fut = Task::new(
        producer_id.into(),
        config,
        service_discovery,
        service_key.into(),
        control_rx,
        submit_tx.clone(),
        submit_rx,
    );
    let task = tokio::spawn(task_fut.run());

    WorkPullingRouter { handle, task }
}
