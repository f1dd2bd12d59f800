//! One producer talking to one consumer over a sliding window of
//! unconfirmed messages, with gap-triggered and timer-triggered
//! retransmission (spec.md §3, §4.1).

mod handle;
mod task;

pub(crate) mod sequencing;

pub use handle::{spawn, ProducerController, ProducerControllerHandle};
