//! The persistence gate: append-only debate records, the durable event log,
//! match/rating/position/flip rows, and per-module schema versioning.
//!
//! The [`store::Store`] trait is the capability the engine depends on; the
//! default implementation is [`jsonl::JsonlStore`], JSONL append files with a
//! bounded in-memory ring per record kind.

pub mod jsonl;
pub mod migrate;
pub mod store;

pub use jsonl::JsonlStore;
pub use store::{DebateSeal, Store};
