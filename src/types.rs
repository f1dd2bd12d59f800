use std::fmt;
use std::ops::{Add, Sub};

use tokio::sync::{mpsc, oneshot};

/// 64-bit monotonically increasing sequence number. Starts at 1 per producer
/// controller instance, never reused, never skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeqNr(pub u64);

impl SeqNr {
    pub const ZERO: SeqNr = SeqNr(0);
    pub const FIRST: SeqNr = SeqNr(1);
}

impl fmt::Display for SeqNr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add<u64> for SeqNr {
    type Output = SeqNr;

    fn add(self, rhs: u64) -> SeqNr {
        SeqNr(self.0 + rhs)
    }
}

impl Sub<u64> for SeqNr {
    type Output = SeqNr;

    fn sub(self, rhs: u64) -> SeqNr {
        SeqNr(self.0 - rhs)
    }
}

/// The outbound endpoint a producer controller writes `SequencedMessage`s to.
/// Modeled as a replaceable handle rather than a captured closure so it can
/// be rebound on `RegisterConsumer` without tearing down the task.
pub type ConsumerEndpoint<A> = mpsc::UnboundedSender<SequencedMessage<A>>;

/// Wire record emitted from a producer controller to a consumer endpoint.
#[derive(Debug, Clone)]
pub struct SequencedMessage<A> {
    pub producer_id: String,
    pub seq_nr: SeqNr,
    pub payload: A,
    /// Set on the current earliest unconfirmed message; prompts the consumer's
    /// initial `Request`.
    pub first: bool,
    /// Requests an explicit per-message `Ack` reply.
    pub ack: bool,
}

/// Consumer grants demand up to `requested_seq_nr` (inclusive) and acknowledges
/// everything up to and including `confirmed_seq_nr`. Invariant:
/// `confirmed_seq_nr < requested_seq_nr`.
#[derive(Debug, Clone, Copy)]
pub struct Request {
    pub confirmed_seq_nr: SeqNr,
    pub requested_seq_nr: SeqNr,
    /// `false` declares the consumer will never ask for retransmissions and
    /// permits the producer controller to discard its resend buffer.
    pub support_resend: bool,
    /// `true` means this `Request` was resent without receiving new messages
    /// (a liveness probe), not in response to fresh traffic.
    pub via_timeout: bool,
}

/// Cumulative acknowledgement with no new demand.
#[derive(Debug, Clone, Copy)]
pub struct Ack {
    pub confirmed_seq_nr: SeqNr,
}

/// Retransmit every buffered message with `seq_nr >= from_seq_nr`.
#[derive(Debug, Clone, Copy)]
pub struct Resend {
    pub from_seq_nr: SeqNr,
}

/// Single inbound type the consumer side of a producer controller sends
/// through the `reply_to` address carried in `SequencedMessage` (grounded on
/// `rabbitmq_client`'s practice of wrapping one direction of traffic in one
/// enum, e.g. `ConnectionCallback`'s single dispatch entry point).
#[derive(Debug, Clone)]
pub enum ConsumerEvent {
    Request(Request),
    Ack(Ack),
    Resend(Resend),
}

/// "You may now submit exactly one message." At most one outstanding
/// `RequestNext` per producer at a time.
#[derive(Debug)]
pub struct RequestNext<A> {
    pub producer_id: String,
    pub current_seq_nr: SeqNr,
    pub confirmed_seq_nr: SeqNr,
    /// Submit the next plain message here.
    pub send_next_to: mpsc::UnboundedSender<ProducerEvent<A>>,
    /// Submit the next confirmation-seeking message here.
    pub ask_next_to: mpsc::UnboundedSender<ProducerEvent<A>>,
}

/// Confirmation reply delivered after a `MessageWithConfirmation`'s seq_nr
/// enters the cumulative confirmed range (non-durable mode) or is durably
/// persisted (durable mode).
pub type ConfirmationReplyTo = oneshot::Sender<SeqNr>;

/// Inbound type accepted from the user producer by a producer controller or a
/// work-pulling router.
#[derive(Debug)]
pub enum ProducerEvent<A> {
    Msg(A),
    MessageWithConfirmation(A, ConfirmationReplyTo),
}
