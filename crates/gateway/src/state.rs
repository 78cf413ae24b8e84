//! Shared application state: the composed engine value built once at
//! startup and passed explicitly to every handler.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use ag_domain::config::Config;
use ag_domain::error::Result;
use ag_domain::event::Event;
use ag_engine::bus::{EventBus, EventSink};
use ag_engine::cancel::CancelMap;
use ag_engine::orchestrator::Orchestrator;
use ag_storage::Store;

use crate::api::auth::TokenSigner;
use crate::metrics::Metrics;
use crate::ratelimit::TokenBuckets;

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern:
/// - **Engine** — store, event bus, orchestrator, cancellation
/// - **Gate** — token signer (None = dev mode), rate buckets
/// - **Observability** — metrics, component health booleans
#[derive(Clone)]
pub struct AppState {
    // ── Engine ────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    /// The orchestrator's event sink (bus + publish counter).
    pub sink: Arc<MeteredSink>,
    pub orchestrator: Arc<Orchestrator>,
    pub cancel_map: Arc<CancelMap>,
    /// Join handles of running debate tasks, pruned as they finish.
    pub active: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,

    // ── Gate ──────────────────────────────────────────────────────────
    /// `None` = auth disabled (no HMAC key configured).
    pub signer: Option<Arc<TokenSigner>>,
    pub buckets: Arc<TokenBuckets>,

    // ── Observability ─────────────────────────────────────────────────
    pub metrics: Arc<Metrics>,
    pub providers_ok: bool,
    pub embeddings_ok: bool,
}

impl AppState {
    /// Drop handles of debates that have finished.
    pub fn prune_active(&self) {
        self.active.lock().retain(|_, handle| !handle.is_finished());
    }

    pub fn active_debates(&self) -> usize {
        self.prune_active();
        self.active.lock().len()
    }
}

/// [`EventSink`] wrapper that counts publishes for `/metrics` before
/// delegating to the bus.
pub struct MeteredSink {
    bus: Arc<EventBus>,
    published: std::sync::atomic::AtomicU64,
}

impl MeteredSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            published: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn published(&self) -> u64 {
        self.published.load(std::sync::atomic::Ordering::Relaxed)
    }
}

impl EventSink for MeteredSink {
    fn publish(&self, event: Event) -> Result<Arc<Event>> {
        let stored = self.bus.publish(event)?;
        self.published
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(stored)
    }
}
