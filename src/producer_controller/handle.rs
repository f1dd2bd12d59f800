use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::ProducerControllerConfig;
use crate::durable_queue::DurableProducerQueue;
use crate::types::{Ack, ConsumerEndpoint, ConsumerEvent, ProducerEvent, Request, RequestNext, Resend, SeqNr};

use super::task::Task;

/// Control-plane events accepted by a [`ProducerController`]: producer
/// lifecycle (`Start`) and everything the consumer side sends (spec.md §4.1
/// "Operations accepted from the consumer side").
#[derive(Debug)]
pub(crate) enum ControlEvent<A> {
    Start(mpsc::UnboundedSender<RequestNext<A>>),
    RegisterConsumer(ConsumerEndpoint<A>),
    Consumer(ConsumerEvent),
}

/// Cloneable handle to a running producer controller task. Mirrors the
/// teacher's `RabbitmqProducer`: a thin handle over channels plus a join
/// handle to the task actually driving the protocol.
#[derive(Clone)]
pub struct ProducerControllerHandle<A> {
    control_tx: mpsc::UnboundedSender<ControlEvent<A>>,
    submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,
}

/// Handle to a spawned producer controller: the cloneable
/// [`ProducerControllerHandle`] plus the task's `JoinHandle`.
pub struct ProducerController<A> {
    pub handle: ProducerControllerHandle<A>,
    pub task: JoinHandle<()>,
}

impl<A> ProducerControllerHandle<A>
where
    A: Clone + Send + 'static,
{
    /// Binds/rebinds the producer reply address (spec.md §4.1 `Start`). May
    /// be called at any time; on rebind no protocol state is reset.
    pub fn start(&self, producer_ref: mpsc::UnboundedSender<RequestNext<A>>) {
        let _ = self.control_tx.send(ControlEvent::Start(producer_ref));
    }

    /// Binds/rebinds the outbound consumer endpoint (spec.md §4.1
    /// `RegisterConsumer`).
    pub fn register_consumer(&self, consumer: ConsumerEndpoint<A>) {
        let _ = self
            .control_tx
            .send(ControlEvent::RegisterConsumer(consumer));
    }

    /// Consumer-side `Request` (spec.md §3/§4.1).
    pub fn request(&self, request: Request) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(ConsumerEvent::Request(request)));
    }

    /// Consumer-side `Ack` (spec.md §3/§4.1).
    pub fn ack(&self, ack: Ack) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(ConsumerEvent::Ack(ack)));
    }

    /// Consumer-side `Resend` (spec.md §3/§4.1).
    pub fn resend(&self, resend: Resend) {
        let _ = self
            .control_tx
            .send(ControlEvent::Consumer(ConsumerEvent::Resend(resend)));
    }

    /// Submits a message without confirmation (spec.md §4.1 `Msg`). Must only
    /// be called in response to a `RequestNext` notification.
    pub fn msg(&self, payload: A) {
        let _ = self.submit_tx.send(ProducerEvent::Msg(payload));
    }

    /// Submits a message requesting confirmation once it is durably
    /// confirmed (spec.md §4.1 `MessageWithConfirmation`). Must only be
    /// called in response to a `RequestNext` notification.
    pub fn msg_with_confirmation(&self, payload: A) -> oneshot::Receiver<SeqNr> {
        let (reply_to, reply_rx) = oneshot::channel();
        let _ = self
            .submit_tx
            .send(ProducerEvent::MessageWithConfirmation(payload, reply_to));
        reply_rx
    }
}

/// Spawns a producer controller task bound to `producer_id`, returning a
/// cloneable handle and the task's `JoinHandle` (spec.md §2 "ProducerController
/// (PC) — one per producer instance, bound at startup to a stable
/// `producer_id` string").
pub fn spawn<A>(
    producer_id: impl Into<String>,
    config: ProducerControllerConfig,
    durable_queue: Option<Arc<dyn DurableProducerQueue<A>>>,
) -> ProducerController<A>
where
    A: Clone + Send + Sync + 'static,
{
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (submit_tx, submit_rx) = mpsc::unbounded_channel();

    let handle = ProducerControllerHandle {
        control_tx,
        submit_tx,
    };

    let task_fut = Task::new(
        producer_id.into(),
        config,
        durable_queue,
        control_rx,
        submit_tx.clone(),
        submit_rx,
    );
    let task = tokio::spawn(task_fut.run());

    ProducerController { handle, task }
}
