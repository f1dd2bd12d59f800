/// Fatal protocol violations. Either terminates the owning task (a standalone
/// [`crate::producer_controller::ProducerController`]) or a single worker's state
/// inside a [`crate::work_pulling_router::WorkPullingRouter`], per spec §7.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// A `Msg`/`MessageWithConfirmation` arrived with no outstanding demand.
    #[error("submitted message without outstanding demand (current_seq_nr > requested_seq_nr)")]
    DemandExhausted,

    /// A `Resend` arrived while the resend buffer is disabled
    /// (`support_resend=false` was last declared by the consumer).
    #[error("received resend request but resend buffer is disabled")]
    ResendUnsupported,
}
