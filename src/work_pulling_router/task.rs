use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::WorkPullingRouterConfig;
use crate::producer_controller::sequencing::SequencingState;
use crate::service_discovery::{ServiceDiscovery, WorkerId, WorkerSnapshot};
use crate::types::{Ack, ConsumerEndpoint, ConsumerEvent, ProducerEvent, Request, RequestNext, Resend, SeqNr};

use super::handle::{ControlEvent, WorkerStats};

/// Per-worker sub-state: an embedded producer-controller-equivalent sliding
/// window plus the timer driving its own `ResendFirst` (spec.md §3 "WPR
/// State"). `SequencingState::has_demand` realizes the "has_demand flag"
/// spec.md lists alongside it — tracked inside the embedded state rather than
/// duplicated, since the two can never disagree.
struct WorkerState<A> {
    sequencing: SequencingState<A>,
    consumer_ref: ConsumerEndpoint<A>,
    resend_first_deadline: Option<Instant>,
}

/// Internal state machine driving one work-pulling router (spec.md §4.2).
/// Single-threaded cooperative state machine exactly like
/// [`crate::producer_controller::task::Task`]: one input processed to
/// completion before the next is taken (spec.md §5).
pub(crate) struct Task<A> {
    producer_id: String,
    config: WorkPullingRouterConfig,
    service_discovery: Arc<dyn ServiceDiscovery<A>>,
    service_key: String,

    control_rx: mpsc::UnboundedReceiver<ControlEvent<A>>,
    submit_rx: mpsc::UnboundedReceiver<ProducerEvent<A>>,
    submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,

    producer_ref: Option<mpsc::UnboundedSender<RequestNext<A>>>,
    producer_demand_outstanding: bool,

    workers: HashMap<WorkerId, WorkerState<A>>,
    buffered: VecDeque<ProducerEvent<A>>,
}

impl<A> Task<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        producer_id: String,
        config: WorkPullingRouterConfig,
        service_discovery: Arc<dyn ServiceDiscovery<A>>,
        service_key: String,
        control_rx: mpsc::UnboundedReceiver<ControlEvent<A>>,
        submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,
        submit_rx: mpsc::UnboundedReceiver<ProducerEvent<A>>,
    ) -> Self {
        Self {
            producer_id,
            config,
            service_discovery,
            service_key,
            control_rx,
            submit_rx,
            submit_tx,
            producer_ref: None,
            producer_demand_outstanding: false,
            workers: HashMap::new(),
            buffered: VecDeque::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        self.run_instrumented().await;
    }

    #[tracing::instrument(name = "WorkPullingRouter", skip_all, fields(producer_id = %self.producer_id))]
    async fn run_instrumented(&mut self) {
        let mut discovery_rx = match self.service_discovery.subscribe(&self.service_key).await {
            Ok(rx) => rx,
            Err(err) => {
                tracing::error!(%err, "failed to subscribe to service discovery, router cannot start");
                return;
            }
        };

        self.reconcile_workers(discovery_rx.borrow_and_update().clone());
        tracing::info!(workers = self.workers.len(), "active");

        loop {
            let deadline = self.next_resend_first_deadline();

            tokio::select! {
                biased;

                Some(event) = self.control_rx.recv() => {
                    self.handle_control(event);
                }

                Some(event) = self.submit_rx.recv() => {
                    self.handle_submit(event);
                }

                changed = discovery_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            let snapshot = discovery_rx.borrow_and_update().clone();
                            self.reconcile_workers(snapshot);
                        }
                        Err(_) => tracing::warn!("service discovery channel closed"),
                    }
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_resend_first_ticks();
                }

                else => break,
            }
        }

        tracing::info!("work pulling router finished");
    }

    fn next_resend_first_deadline(&self) -> Option<Instant> {
        self.workers.values().filter_map(|w| w.resend_first_deadline).min()
    }

    fn handle_control(&mut self, event: ControlEvent<A>) {
        match event {
            ControlEvent::Start(producer_ref) => {
                self.producer_ref = Some(producer_ref);
                self.after_demand_change();
            }
            ControlEvent::GetWorkerStats(reply_to) => {
                let demanding_count = self.workers.values().filter(|w| w.sequencing.has_demand()).count();
                let _ = reply_to.send(WorkerStats {
                    worker_count: self.workers.len(),
                    demanding_count,
                });
            }
            ControlEvent::Consumer(worker_id, ConsumerEvent::Request(request)) => {
                self.handle_request(&worker_id, request);
            }
            ControlEvent::Consumer(worker_id, ConsumerEvent::Ack(ack)) => {
                self.handle_ack(&worker_id, ack);
            }
            ControlEvent::Consumer(worker_id, ConsumerEvent::Resend(resend)) => {
                self.handle_resend(&worker_id, resend);
            }
        }
    }

    /// spec.md §4.2 "Membership changes": diffs the new snapshot against the
    /// current worker set, registering arrivals and rehoming departures.
    fn reconcile_workers(&mut self, snapshot: WorkerSnapshot<A>) {
        let departed: Vec<WorkerId> = self
            .workers
            .keys()
            .filter(|id| !snapshot.contains_key(*id))
            .cloned()
            .collect();
        for worker_id in departed {
            self.remove_worker(&worker_id);
        }

        for (worker_id, endpoint) in snapshot {
            if !self.workers.contains_key(&worker_id) {
                self.register_worker(worker_id, endpoint);
            }
        }

        self.after_demand_change();
    }

    /// spec.md §4.2 "Worker registered: create per-worker state; handshake
    /// seeds the new worker with any buffered head of the queue as its first
    /// message."
    fn register_worker(&mut self, worker_id: WorkerId, consumer_ref: ConsumerEndpoint<A>) {
        let mut sequencing = SequencingState::new(
            format!("{}-{}", self.producer_id, worker_id),
            self.config.support_resend_default,
        );
        sequencing.grant_initial_demand();

        let mut state = WorkerState {
            sequencing,
            consumer_ref,
            resend_first_deadline: None,
        };

        if let Some(event) = self.buffered.pop_front() {
            Self::dispatch_to_worker(&mut state, event, &self.config, &worker_id);
        }

        tracing::info!(worker = %worker_id, "worker registered");
        self.workers.insert(worker_id, state);
    }

    /// spec.md §4.2 "Worker deregistered / observed to terminate: move any
    /// messages in that worker's unconfirmed buffer to the front of
    /// `buffered_messages` ... then re-dispatch them to other workers as
    /// demand permits."
    fn remove_worker(&mut self, worker_id: &WorkerId) {
        let Some(mut state) = self.workers.remove(worker_id) else {
            return;
        };

        let rehomed = state.sequencing.drain_unconfirmed();
        if !rehomed.is_empty() {
            tracing::warn!(worker = %worker_id, count = rehomed.len(), "worker lost, rehoming unconfirmed messages");
        }

        let mut front: VecDeque<ProducerEvent<A>> = rehomed
            .into_iter()
            .map(|(payload, confirmation)| match confirmation {
                Some(reply_to) => ProducerEvent::MessageWithConfirmation(payload, reply_to),
                None => ProducerEvent::Msg(payload),
            })
            .collect();
        front.append(&mut self.buffered);
        self.buffered = front;

        tracing::info!(worker = %worker_id, "worker deregistered");
    }

    fn handle_request(&mut self, worker_id: &WorkerId, request: Request) {
        let Some(state) = self.workers.get_mut(worker_id) else {
            return;
        };

        let outcome = state.sequencing.on_request(request);
        if outcome.cancel_resend_first_timer {
            state.resend_first_deadline = None;
        }
        for message in outcome.resend_messages {
            let _ = state.consumer_ref.send(message);
        }

        self.after_demand_change();
    }

    fn handle_ack(&mut self, worker_id: &WorkerId, ack: Ack) {
        let Some(state) = self.workers.get_mut(worker_id) else {
            return;
        };

        let outcome = state.sequencing.on_ack(ack);
        if outcome.cancel_resend_first_timer {
            state.resend_first_deadline = None;
        }
        for message in outcome.resend_messages {
            let _ = state.consumer_ref.send(message);
        }
    }

    fn handle_resend(&mut self, worker_id: &WorkerId, resend: Resend) {
        let Some(state) = self.workers.get_mut(worker_id) else {
            return;
        };

        match state.sequencing.on_resend(resend) {
            Ok(messages) => {
                for message in messages {
                    let _ = state.consumer_ref.send(message);
                }
            }
            Err(err) => {
                tracing::error!(%err, worker = %worker_id, "fatal protocol violation from worker, removing");
                self.remove_worker(worker_id);
                self.after_demand_change();
            }
        }
    }

    fn handle_resend_first_ticks(&mut self) {
        let now = Instant::now();
        let due: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.resend_first_deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| id.clone())
            .collect();

        for worker_id in due {
            let Some(state) = self.workers.get_mut(&worker_id) else {
                continue;
            };
            match state.sequencing.on_resend_first_tick() {
                Some(message) => {
                    tracing::debug!(worker = %worker_id, seq_nr = %message.seq_nr, "resending first message");
                    let _ = state.consumer_ref.send(message);
                    state.resend_first_deadline = Some(now + self.config.resend_first_interval);
                }
                None => {
                    state.resend_first_deadline = None;
                }
            }
        }
    }

    /// spec.md §4.2 "Routing policy": selects one worker uniformly at random
    /// from the set of workers with outstanding demand; buffers the message
    /// if none currently has demand.
    fn handle_submit(&mut self, event: ProducerEvent<A>) {
        self.producer_demand_outstanding = false;

        let demanding: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|(_, w)| w.sequencing.has_demand())
            .map(|(id, _)| id.clone())
            .collect();

        match demanding.choose(&mut rand::thread_rng()) {
            Some(worker_id) => {
                let state = self.workers.get_mut(worker_id).expect("selected from workers map");
                Self::dispatch_to_worker(state, event, &self.config, worker_id);
            }
            None => {
                if self.buffered.len() >= self.config.buffer_size {
                    tracing::warn!(
                        buffer_size = self.config.buffer_size,
                        "buffered_messages at configured capacity"
                    );
                }
                self.buffered.push_back(event);
            }
        }

        self.after_demand_change();
    }

    fn dispatch_to_worker(state: &mut WorkerState<A>, event: ProducerEvent<A>, config: &WorkPullingRouterConfig, worker_id: &WorkerId) {
        let (payload, confirmation) = match event {
            ProducerEvent::Msg(payload) => (payload, None),
            ProducerEvent::MessageWithConfirmation(payload, reply_to) => (payload, Some(reply_to)),
        };

        match state.sequencing.submit(payload, confirmation) {
            Ok(outcome) => {
                if outcome.restart_resend_first_timer {
                    state.resend_first_deadline = Some(Instant::now() + config.resend_first_interval);
                }
                let _ = state.consumer_ref.send(outcome.message);
            }
            Err(err) => {
                // Selected because it reported demand; a race against a
                // concurrent protocol violation is still possible in principle.
                tracing::error!(%err, worker = %worker_id, "fatal protocol violation dispatching to worker");
            }
        }
    }

    /// Drains buffered messages into any worker currently holding demand,
    /// then pulls fresh demand from the producer if headroom remains
    /// (spec.md §4.2 "When demand arises from any worker and the WPR is
    /// currently not holding outstanding demand toward the user producer, it
    /// issues a `RequestNext`").
    fn after_demand_change(&mut self) {
        loop {
            if self.buffered.is_empty() {
                break;
            }

            let demanding: Vec<WorkerId> = self
                .workers
                .iter()
                .filter(|(_, w)| w.sequencing.has_demand())
                .map(|(id, _)| id.clone())
                .collect();

            let Some(worker_id) = demanding.choose(&mut rand::thread_rng()).cloned() else {
                break;
            };

            let event = self.buffered.pop_front().expect("checked non-empty above");
            let state = self.workers.get_mut(&worker_id).expect("selected from workers map");
            Self::dispatch_to_worker(state, event, &self.config, &worker_id);
        }

        self.maybe_notify_producer();
    }

    fn maybe_notify_producer(&mut self) {
        if self.producer_demand_outstanding {
            return;
        }
        if self.buffered.len() >= self.config.buffer_size {
            return;
        }
        if !self.workers.values().any(|w| w.sequencing.has_demand()) {
            return;
        }

        let Some(producer_ref) = &self.producer_ref else {
            return;
        };

        // A single combined notification stands in for spec.md's per-PC
        // `current_seq_nr`/`confirmed_seq_nr` fields, which have no single
        // value across a worker pool; downstream consumers of this
        // notification only need an address to submit the next message to.
        let request_next = RequestNext {
            producer_id: self.producer_id.clone(),
            current_seq_nr: SeqNr::ZERO,
            confirmed_seq_nr: SeqNr::ZERO,
            send_next_to: self.submit_tx.clone(),
            ask_next_to: self.submit_tx.clone(),
        };

        if producer_ref.send(request_next).is_ok() {
            self.producer_demand_outstanding = true;
        }
    }
}
