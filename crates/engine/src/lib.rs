//! The debate execution engine.
//!
//! Composes the event bus, agent invoker, orchestrator state machine and the
//! ranking/flip engine over capability traits ([`bus::EventSink`],
//! [`ag_storage::Store`], [`caller::AgentCaller`], [`embed::Embedder`]), so
//! the gateway wires everything together at the edge and tests swap in
//! scripted fakes.

pub mod bus;
pub mod caller;
pub mod cancel;
pub mod convergence;
pub mod elo;
pub mod embed;
pub mod flips;
pub mod invoker;
pub mod orchestrator;
pub mod testing;
pub mod voting;

pub use bus::{EventBus, EventFilter, EventSink};
pub use cancel::{CancelMap, CancelToken};
pub use orchestrator::{DebateRequest, Orchestrator};
