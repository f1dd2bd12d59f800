use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::config::ProducerControllerConfig;
use crate::durable_queue::DurableProducerQueue;
use crate::error::Error;
use crate::types::{Ack, ConsumerEndpoint, ConsumerEvent, ProducerEvent, Request, RequestNext, Resend, SequencedMessage};

use super::handle::ControlEvent;
use super::sequencing::SequencingState;

/// Internal state machine driving one producer controller (spec.md §4.1).
/// Owns all protocol state exclusively; every input is processed to
/// completion before the next is taken from either channel (spec.md §5
/// "Concurrency & Resource Model").
pub(crate) struct Task<A> {
    producer_id: String,
    config: ProducerControllerConfig,
    durable_queue: Option<Arc<dyn DurableProducerQueue<A>>>,

    control_rx: mpsc::UnboundedReceiver<ControlEvent<A>>,
    submit_rx: mpsc::UnboundedReceiver<ProducerEvent<A>>,
    submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,

    sequencing: SequencingState<A>,
    producer_ref: Option<mpsc::UnboundedSender<RequestNext<A>>>,
    consumer_ref: Option<ConsumerEndpoint<A>>,

    resend_first_deadline: Option<Instant>,
}

impl<A> Task<A>
where
    A: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        producer_id: String,
        config: ProducerControllerConfig,
        durable_queue: Option<Arc<dyn DurableProducerQueue<A>>>,
        control_rx: mpsc::UnboundedReceiver<ControlEvent<A>>,
        submit_tx: mpsc::UnboundedSender<ProducerEvent<A>>,
        submit_rx: mpsc::UnboundedReceiver<ProducerEvent<A>>,
    ) -> Self {
        let sequencing = SequencingState::new(producer_id.clone(), config.support_resend_default);

        Self {
            producer_id,
            config,
            durable_queue,
            control_rx,
            submit_rx,
            submit_tx,
            sequencing,
            producer_ref: None,
            consumer_ref: None,
            resend_first_deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        self.run_instrumented().await;
    }

    #[tracing::instrument(name = "ProducerController", skip_all, fields(producer_id = %self.producer_id))]
    async fn run_instrumented(&mut self) {
        if let Some(durable_queue) = self.durable_queue.clone() {
            match durable_queue.load_state().await {
                Ok(loaded) => {
                    tracing::info!(
                        current_seq_nr = %loaded.current_seq_nr,
                        unconfirmed = loaded.unconfirmed_messages.len(),
                        "recovered state from durable queue"
                    );
                    self.sequencing = SequencingState::from_loaded_state(
                        self.producer_id.clone(),
                        self.config.support_resend_default,
                        loaded.current_seq_nr,
                        loaded.unconfirmed_messages,
                    );
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to load durable queue state, starting fresh");
                }
            }
        }

        if !self.await_active().await {
            tracing::info!("shutting down before becoming active");
            return;
        }

        tracing::info!("active");
        self.sequencing.grant_initial_demand();
        self.notify_request_next();

        loop {
            let deadline = self.resend_first_deadline;

            tokio::select! {
                biased;

                Some(event) = self.control_rx.recv() => {
                    self.handle_control(event).await;
                }

                Some(event) = self.submit_rx.recv() => {
                    self.handle_submit(event).await;
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.handle_resend_first_tick();
                }

                else => break,
            }
        }

        tracing::info!("producer controller finished");
    }

    /// Waits until both `Start` and `RegisterConsumer` have arrived (spec.md
    /// §4.1 "A PC is not active until it has received both a `Start` and a
    /// `RegisterConsumer`; they may arrive in either order."). Returns
    /// `false` if both channels closed before that happened.
    async fn await_active(&mut self) -> bool {
        while self.producer_ref.is_none() || self.consumer_ref.is_none() {
            tokio::select! {
                biased;

                event = self.control_rx.recv() => {
                    match event {
                        Some(ControlEvent::Start(producer_ref)) => {
                            self.producer_ref = Some(producer_ref);
                        }
                        Some(ControlEvent::RegisterConsumer(consumer_ref)) => {
                            // Routed through `handle_register_consumer` rather than
                            // set directly: a durable-recovered unconfirmed tail
                            // (loaded before `await_active` runs) must bootstrap to
                            // this consumer the same way a mid-stream replacement
                            // does (spec.md §6).
                            self.handle_register_consumer(consumer_ref);
                        }
                        Some(ControlEvent::Consumer(_)) => {
                            tracing::debug!("ignoring consumer protocol message before becoming active");
                        }
                        None => return false,
                    }
                }

                event = self.submit_rx.recv() => {
                    match event {
                        Some(_) => tracing::debug!("ignoring producer submission before becoming active"),
                        None if self.control_rx.is_closed() => return false,
                        None => {}
                    }
                }
            }
        }

        true
    }

    async fn handle_control(&mut self, event: ControlEvent<A>) {
        match event {
            ControlEvent::Start(producer_ref) => {
                self.producer_ref = Some(producer_ref);
            }
            ControlEvent::RegisterConsumer(consumer_ref) => {
                self.handle_register_consumer(consumer_ref);
            }
            ControlEvent::Consumer(ConsumerEvent::Request(request)) => {
                self.handle_request(request).await;
            }
            ControlEvent::Consumer(ConsumerEvent::Ack(ack)) => {
                self.handle_ack(ack).await;
            }
            ControlEvent::Consumer(ConsumerEvent::Resend(resend)) => {
                self.handle_resend(resend);
            }
        }
    }

    fn handle_register_consumer(&mut self, consumer_ref: ConsumerEndpoint<A>) {
        self.consumer_ref = Some(consumer_ref);

        let outcome = self.sequencing.on_register_consumer();
        if let Some(message) = outcome.resend_first_message {
            self.restart_resend_first_timer();
            self.emit(message);
        }
    }

    async fn handle_request(&mut self, request: Request) {
        let outcome = self.sequencing.on_request(request);

        if outcome.cancel_resend_first_timer {
            self.resend_first_deadline = None;
        }
        self.persist_confirmed().await;

        for message in outcome.resend_messages {
            self.emit(message);
        }

        if outcome.issue_request_next {
            self.notify_request_next();
        }
    }

    async fn handle_ack(&mut self, ack: Ack) {
        let outcome = self.sequencing.on_ack(ack);

        if outcome.cancel_resend_first_timer {
            self.resend_first_deadline = None;
        }
        self.persist_confirmed().await;

        for message in outcome.resend_messages {
            self.emit(message);
        }
    }

    fn handle_resend(&mut self, resend: Resend) {
        match self.sequencing.on_resend(resend) {
            Ok(messages) => {
                for message in messages {
                    self.emit(message);
                }
            }
            Err(err) => self.fail(err),
        }
    }

    fn handle_resend_first_tick(&mut self) {
        match self.sequencing.on_resend_first_tick() {
            Some(message) => {
                tracing::debug!(seq_nr = %message.seq_nr, "resending first message");
                self.emit(message);
                self.restart_resend_first_timer();
            }
            None => {
                self.resend_first_deadline = None;
            }
        }
    }

    async fn handle_submit(&mut self, event: ProducerEvent<A>) {
        let (payload, confirmation) = match event {
            ProducerEvent::Msg(payload) => (payload, None),
            ProducerEvent::MessageWithConfirmation(payload, reply_to) => (payload, Some(reply_to)),
        };

        if let Some(durable_queue) = self.durable_queue.clone() {
            // Durable mode: the confirmation reply fires once the durable
            // store reports persistence, not on consumer `Ack` (spec.md §6).
            let ack_requested = confirmation.is_some();
            let outcome = match self.sequencing.submit(payload.clone(), None) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };
            let seq_nr = outcome.message.seq_nr;

            if outcome.restart_resend_first_timer {
                self.restart_resend_first_timer();
            }
            self.emit(outcome.message);
            if self.sequencing.has_demand() {
                self.notify_request_next();
            }

            match durable_queue
                .store_message_sent(seq_nr, payload, ack_requested)
                .await
            {
                Ok(()) => {
                    if let Some(reply_to) = confirmation {
                        let _ = reply_to.send(seq_nr);
                    }
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to persist sent message to durable queue");
                }
            }
        } else {
            let outcome = match self.sequencing.submit(payload, confirmation) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };

            if outcome.restart_resend_first_timer {
                self.restart_resend_first_timer();
            }
            self.emit(outcome.message);
            if self.sequencing.has_demand() {
                self.notify_request_next();
            }
        }
    }

    async fn persist_confirmed(&self) {
        if let Some(durable_queue) = &self.durable_queue {
            if let Err(err) = durable_queue
                .store_message_confirmed(self.sequencing.confirmed_seq_nr())
                .await
            {
                tracing::warn!(%err, "failed to persist confirmation to durable queue");
            }
        }
    }

    fn emit(&self, message: SequencedMessage<A>) {
        if let Some(consumer_ref) = &self.consumer_ref {
            let _ = consumer_ref.send(message);
        }
    }

    fn notify_request_next(&mut self) {
        let Some(producer_ref) = &self.producer_ref else {
            return;
        };

        let request_next = RequestNext {
            producer_id: self.producer_id.clone(),
            current_seq_nr: self.sequencing.current_seq_nr(),
            confirmed_seq_nr: self.sequencing.confirmed_seq_nr(),
            send_next_to: self.submit_tx.clone(),
            ask_next_to: self.submit_tx.clone(),
        };

        let _ = producer_ref.send(request_next);
    }

    fn restart_resend_first_timer(&mut self) {
        self.resend_first_deadline = Some(Instant::now() + self.config.resend_first_interval);
    }

    /// spec.md §7 "Protocol violations (fatal): ... The PC terminates; the
    /// user producer is responsible for observing termination and
    /// restarting."
    fn fail(&mut self, err: Error) {
        tracing::error!(%err, "fatal protocol violation, stopping producer controller");
        self.control_rx.close();
        self.submit_rx.close();
    }
}
