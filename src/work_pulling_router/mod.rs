//! Multiplexes a single producer over a dynamically-changing pool of
//! consumer ("worker") endpoints, embedding one
//! [`crate::producer_controller::sequencing::SequencingState`] per worker so
//! each worker gets its own independently-sequenced, independently-resent
//! delivery window (spec.md §2, §4.2).

mod handle;
mod task;

pub use handle::{spawn, WorkPullingRouter, WorkPullingRouterHandle, WorkerStats};
