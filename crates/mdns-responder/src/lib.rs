//! The multicast DNS protocol engine: a responder and querier for one
//! network link, conforming to RFC 6762 (multicast DNS) and RFC 6763
//! (DNS-based service discovery).
//!
//! The engine performs no I/O and keeps no clock of its own.  The
//! embedder owns the multicast socket and the event loop, and drives a
//! [`Responder`] through three calls:
//!
//! - [`Responder::input`] with each decoded inbound message,
//! - [`Responder::output`] drained until `None` after any call that
//!   might produce traffic,
//! - [`Responder::sleep`] to learn when to call `output` next.
//!
//! Time is a caller-supplied monotonic millisecond counter, which makes
//! the whole state machine deterministic under test: feed it messages
//! and clock values, observe what it emits.
//!
//! Everything else - probing owned names for uniqueness, announcing,
//! answering queries with known-answer suppression and response
//! aggregation, goodbyes on withdrawal, caching what other responders
//! multicast, and re-asking questions on a backoff schedule - happens
//! inside.

pub mod responder;
pub mod service;
pub mod store;
pub mod tracker;

pub use responder::{Responder, Stats};
pub use service::{ServiceHandles, ServiceRegistration};
pub use store::{PublishState, RecordHandle};
pub use tracker::QueryHandle;
