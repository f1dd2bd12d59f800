use std::collections::{BTreeMap, VecDeque};

use crate::error::Error;
use crate::types::{Ack, ConfirmationReplyTo, Request, Resend, SeqNr, SequencedMessage};

/// Optional resend buffer (spec.md §9 design note: "model as a tagged variant
/// `{Enabled(queue), Disabled}` to statically distinguish the two protocol
/// modes and reject `Resend` in the disabled variant").
#[derive(Debug)]
enum ResendBuffer<A> {
    Enabled(VecDeque<SequencedMessage<A>>),
    Disabled,
}

impl<A> ResendBuffer<A> {
    fn new(support_resend: bool) -> Self {
        if support_resend {
            ResendBuffer::Enabled(VecDeque::new())
        } else {
            ResendBuffer::Disabled
        }
    }

    fn is_enabled(&self) -> bool {
        matches!(self, ResendBuffer::Enabled(_))
    }
}

/// Sliding-window sequencing core shared by a standalone
/// [`crate::producer_controller::ProducerController`] and each per-worker
/// slot inside a [`crate::work_pulling_router::WorkPullingRouter`] (spec.md
/// §3 "PC State", §4.2 "each registered worker... an embedded PC-equivalent
/// state"). Intentionally free of any I/O or timer plumbing so it can be
/// driven synchronously in tests; the owning task applies the returned
/// outcomes to its `send`/timer side effects.
#[derive(Debug)]
pub(crate) struct SequencingState<A> {
    producer_id: String,
    current_seq_nr: SeqNr,
    confirmed_seq_nr: SeqNr,
    requested_seq_nr: SeqNr,
    requested: bool,
    first_seq_nr: SeqNr,
    resend_buffer: ResendBuffer<A>,
    pending_replies: BTreeMap<SeqNr, ConfirmationReplyTo>,
    /// Set by `on_register_consumer` when it left messages unsent beyond the
    /// bootstrap one; forces the *next* `Request`/`Ack` from the new
    /// consumer to flush the remaining buffer, regardless of that event's
    /// own retransmission trigger (spec.md §8 scenario 4).
    pending_full_resend: bool,
}

/// What the owning task must do after a successful `submit`.
pub(crate) struct SubmitOutcome<A> {
    pub message: SequencedMessage<A>,
    /// `seq == first_seq_nr`: (re)start the 1-second `ResendFirst` timer.
    pub restart_resend_first_timer: bool,
}

/// What the owning task must do after a `Request`.
pub(crate) struct RequestOutcome<A> {
    /// Cancel the `ResendFirst` timer (`confirmed == first_seq_nr`).
    pub cancel_resend_first_timer: bool,
    /// Messages to retransmit, in seq order (possibly empty).
    pub resend_messages: Vec<SequencedMessage<A>>,
    /// A new `RequestNext` should be issued to the producer.
    pub issue_request_next: bool,
}

/// What the owning task must do after an `Ack`.
pub(crate) struct AckOutcome<A> {
    pub cancel_resend_first_timer: bool,
    pub resend_messages: Vec<SequencedMessage<A>>,
}

/// What the owning task must do after a `RegisterConsumer`.
pub(crate) struct RegisterConsumerOutcome<A> {
    pub first_seq_nr: SeqNr,
    /// Only the buffer head (seq = `first_seq_nr`), with `first = true`, if
    /// anything is buffered. spec.md §8 scenario 4 is explicit that a fresh
    /// consumer sees exactly this one bootstrap message, not the whole
    /// unconfirmed tail — the rest resends once a `Request`/`Ack`/`Resend`
    /// arrives from the new consumer, same as any other PC-resend trigger.
    pub resend_first_message: Option<SequencedMessage<A>>,
}

impl<A> SequencingState<A>
where
    A: Clone,
{
    pub(crate) fn new(producer_id: impl Into<String>, support_resend_default: bool) -> Self {
        Self {
            producer_id: producer_id.into(),
            current_seq_nr: SeqNr::FIRST,
            confirmed_seq_nr: SeqNr::ZERO,
            requested_seq_nr: SeqNr::ZERO,
            requested: false,
            first_seq_nr: SeqNr::FIRST,
            resend_buffer: ResendBuffer::new(support_resend_default),
            pending_replies: BTreeMap::new(),
            pending_full_resend: false,
        }
    }

    /// Recreates state from a durably-persisted snapshot (spec.md §6
    /// `load_state`): resumes with `current_seq_nr` and treats
    /// `unconfirmed_messages` as the already-sent, not-yet-confirmed tail.
    pub(crate) fn from_loaded_state(
        producer_id: impl Into<String>,
        support_resend_default: bool,
        current_seq_nr: SeqNr,
        unconfirmed_messages: Vec<(SeqNr, A, bool)>,
    ) -> Self {
        let mut state = Self::new(producer_id, support_resend_default);
        state.current_seq_nr = current_seq_nr;

        if let Some((first_seq, ..)) = unconfirmed_messages.first() {
            state.first_seq_nr = *first_seq;
        } else {
            state.first_seq_nr = current_seq_nr;
        }

        if let ResendBuffer::Enabled(buf) = &mut state.resend_buffer {
            for (seq_nr, payload, ack) in unconfirmed_messages {
                buf.push_back(SequencedMessage {
                    producer_id: state.producer_id.clone(),
                    seq_nr,
                    payload,
                    first: seq_nr == state.first_seq_nr,
                    ack,
                });
            }
        }

        state
    }

    pub(crate) fn current_seq_nr(&self) -> SeqNr {
        self.current_seq_nr
    }

    pub(crate) fn confirmed_seq_nr(&self) -> SeqNr {
        self.confirmed_seq_nr
    }

    pub(crate) fn requested_seq_nr(&self) -> SeqNr {
        self.requested_seq_nr
    }

    pub(crate) fn first_seq_nr(&self) -> SeqNr {
        self.first_seq_nr
    }

    /// Demand outstanding the producer may fill right now.
    pub(crate) fn has_demand(&self) -> bool {
        self.requested
    }

    /// Grants initial demand for seq 1 on entering the active state (spec.md
    /// §4.1 "On entering active state, the PC immediately issues the first
    /// `RequestNext`"). No-op if demand is already outstanding.
    pub(crate) fn grant_initial_demand(&mut self) -> bool {
        if self.requested {
            return false;
        }

        self.requested = true;
        true
    }

    /// spec.md §4.1 "Normal send path".
    pub(crate) fn submit(
        &mut self,
        payload: A,
        confirmation: Option<ConfirmationReplyTo>,
    ) -> Result<SubmitOutcome<A>, Error> {
        if !self.requested {
            return Err(Error::DemandExhausted);
        }

        let seq = self.current_seq_nr;
        let first = seq == self.first_seq_nr;
        let ack = confirmation.is_some();

        let message = SequencedMessage {
            producer_id: self.producer_id.clone(),
            seq_nr: seq,
            payload,
            first,
            ack,
        };

        if let ResendBuffer::Enabled(buf) = &mut self.resend_buffer {
            buf.push_back(message.clone());
        }

        self.requested = seq < self.requested_seq_nr;
        self.current_seq_nr = seq + 1;

        if let Some(reply_to) = confirmation {
            self.pending_replies.insert(seq, reply_to);
        }

        Ok(SubmitOutcome {
            message,
            restart_resend_first_timer: first,
        })
    }

    /// Applies cumulative acknowledgement up to and including `confirmed`:
    /// dispatches pending replies in ascending order, trims the resend
    /// buffer, advances `confirmed_seq_nr`, and re-derives `first_seq_nr`
    /// from the new earliest unconfirmed seq (spec.md §9: "After a consumer
    /// replacement or partial confirmation, `first_seq_nr` is re-derived
    /// from the earliest unconfirmed seq"). Idempotent: `apply_ack(k)` then
    /// `apply_ack(k')` with `k' <= k` only advances state by the first call
    /// (spec.md §8 "Round-trip and idempotence laws").
    fn apply_ack(&mut self, confirmed: SeqNr) {
        if confirmed <= self.confirmed_seq_nr {
            return;
        }

        let dispatch_seqs: Vec<SeqNr> = self
            .pending_replies
            .range(..=confirmed)
            .map(|(seq, _)| *seq)
            .collect();
        for seq in dispatch_seqs {
            if let Some(reply_to) = self.pending_replies.remove(&seq) {
                let _ = reply_to.send(seq);
            }
        }

        if let ResendBuffer::Enabled(buf) = &mut self.resend_buffer {
            while matches!(buf.front(), Some(m) if m.seq_nr <= confirmed) {
                buf.pop_front();
            }
        }

        self.confirmed_seq_nr = confirmed;
        self.first_seq_nr = if self.confirmed_seq_nr + 1 < self.current_seq_nr {
            self.confirmed_seq_nr + 1
        } else {
            self.current_seq_nr
        };
    }

    fn buffered_messages(&self) -> Vec<SequencedMessage<A>> {
        match &self.resend_buffer {
            ResendBuffer::Enabled(buf) => buf.iter().cloned().collect(),
            ResendBuffer::Disabled => Vec::new(),
        }
    }

    /// Drains every unconfirmed message still buffered, pairing each back up
    /// with its `pending_replies` entry (if any), in ascending seq order.
    /// Used only by [`crate::work_pulling_router::WorkPullingRouter`] when a
    /// worker disappears: the drained payloads are rehomed to the front of
    /// `buffered_messages` and re-dispatched to other workers (spec.md §4.2
    /// "Worker deregistered / observed to terminate").
    pub(crate) fn drain_unconfirmed(&mut self) -> Vec<(A, Option<ConfirmationReplyTo>)> {
        let messages = match &mut self.resend_buffer {
            ResendBuffer::Enabled(buf) => std::mem::take(buf),
            ResendBuffer::Disabled => VecDeque::new(),
        };

        messages
            .into_iter()
            .map(|message| {
                let reply_to = self.pending_replies.remove(&message.seq_nr);
                (message.payload, reply_to)
            })
            .collect()
    }

    /// spec.md §4.1 "On `Request(confirmed, up_to, support_resend,
    /// via_timeout)`".
    pub(crate) fn on_request(&mut self, request: Request) -> RequestOutcome<A> {
        let cancel_resend_first_timer = request.confirmed_seq_nr == self.first_seq_nr;

        self.apply_ack(request.confirmed_seq_nr);

        match (self.resend_buffer.is_enabled(), request.support_resend) {
            (true, false) => self.resend_buffer = ResendBuffer::Disabled,
            (false, true) => self.resend_buffer = ResendBuffer::Enabled(VecDeque::new()),
            _ => {}
        }

        let full_resend_trigger = request.via_timeout || cancel_resend_first_timer;
        let flush_pending_tail = std::mem::take(&mut self.pending_full_resend);
        let resend_messages = if full_resend_trigger {
            self.buffered_messages()
        } else if flush_pending_tail {
            // The buffer head already went out as the RegisterConsumer
            // bootstrap (with `first=true`); only the rest is still owed
            // (spec.md §8 scenario 4: "observe seq 4 emitted once").
            self.buffered_messages().into_iter().skip(1).collect()
        } else {
            Vec::new()
        };

        let mut issue_request_next = false;
        if request.requested_seq_nr > self.requested_seq_nr {
            self.requested_seq_nr = request.requested_seq_nr;
        }
        if !self.requested && self.requested_seq_nr > self.current_seq_nr - 1 {
            self.requested = true;
            issue_request_next = true;
        }

        RequestOutcome {
            cancel_resend_first_timer,
            resend_messages,
            issue_request_next,
        }
    }

    /// spec.md §4.1 "On `Ack(confirmed)`".
    pub(crate) fn on_ack(&mut self, ack: Ack) -> AckOutcome<A> {
        let cancel_resend_first_timer = ack.confirmed_seq_nr == self.first_seq_nr;

        self.apply_ack(ack.confirmed_seq_nr);

        let flush_pending_tail = std::mem::take(&mut self.pending_full_resend);
        let resend_messages = if cancel_resend_first_timer {
            self.buffered_messages()
        } else if flush_pending_tail {
            self.buffered_messages().into_iter().skip(1).collect()
        } else {
            Vec::new()
        };

        AckOutcome {
            cancel_resend_first_timer,
            resend_messages,
        }
    }

    /// spec.md §4.1 "On `Resend(from)`". Clamps `from` to the buffer head
    /// when it names a seq below the earliest buffered one (spec.md §9,
    /// resolved ambiguity).
    pub(crate) fn on_resend(&mut self, resend: Resend) -> Result<Vec<SequencedMessage<A>>, Error> {
        match &self.resend_buffer {
            ResendBuffer::Disabled => Err(Error::ResendUnsupported),
            ResendBuffer::Enabled(buf) => Ok(buf
                .iter()
                .filter(|m| m.seq_nr >= resend.from_seq_nr)
                .cloned()
                .collect()),
        }
    }

    /// spec.md §4.1 "On `ResendFirst` timer tick". Returns `None` when the
    /// timer should be cancelled (the head has moved past `first_seq_nr`, or
    /// there is nothing buffered).
    pub(crate) fn on_resend_first_tick(&mut self) -> Option<SequencedMessage<A>> {
        match &self.resend_buffer {
            ResendBuffer::Enabled(buf) => match buf.front() {
                Some(message) if message.seq_nr == self.first_seq_nr => {
                    let mut message = message.clone();
                    message.first = true;
                    Some(message)
                }
                _ => None,
            },
            ResendBuffer::Disabled => None,
        }
    }

    /// spec.md §4.1 "On `RegisterConsumer(new_consumer)`". Recomputes
    /// `first_seq_nr` and resends only the buffer head to the new consumer,
    /// with `first = true`, to bootstrap its `Request` state (spec.md §8
    /// scenario 4: the remaining unconfirmed tail resends only once the new
    /// consumer's own `Request`/`Ack`/`Resend` arrives).
    pub(crate) fn on_register_consumer(&mut self) -> RegisterConsumerOutcome<A> {
        self.first_seq_nr = match &self.resend_buffer {
            ResendBuffer::Enabled(buf) => buf.front().map(|m| m.seq_nr).unwrap_or(self.current_seq_nr),
            ResendBuffer::Disabled => self.current_seq_nr,
        };

        let resend_first_message = match &self.resend_buffer {
            ResendBuffer::Enabled(buf) => buf.front().cloned().map(|mut message| {
                message.first = true;
                message
            }),
            ResendBuffer::Disabled => None,
        };

        // More than the bootstrap message is still unconfirmed: withhold it
        // until the new consumer's first `Request`/`Ack` (spec.md §8 scenario
        // 4), rather than flushing the whole tail right away.
        self.pending_full_resend = matches!(&self.resend_buffer, ResendBuffer::Enabled(buf) if buf.len() > 1);

        RegisterConsumerOutcome {
            first_seq_nr: self.first_seq_nr,
            resend_first_message,
        }
    }
}
