//! Reliable, flow-controlled message delivery core.
//!
//! Two cooperating components (spec.md §2):
//!
//! - [`producer_controller`] — the per-producer sequenced-delivery state
//!   machine talking to exactly one consumer endpoint at a time.
//! - [`work_pulling_router`] — multiplexes a single producer over a
//!   dynamically-changing pool of consumer ("worker") endpoints, embedding one
//!   producer-controller-equivalent state per worker.
//!
//! Serialization, transport, the host task runtime, the durable queue backing
//! store, and the service-discovery registry are external collaborators;
//! this crate defines and drives their interfaces ([`durable_queue`],
//! [`service_discovery`]) without implementing them for production use.

pub mod config;
pub mod durable_queue;
pub mod error;
pub mod producer_controller;
pub mod retry;
pub mod service_discovery;
pub mod types;
pub mod work_pulling_router;
