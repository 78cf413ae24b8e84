//! Process-wide counters exposed in Prometheus text exposition format.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    pub debates_started: AtomicU64,
    pub debates_completed: AtomicU64,
    pub debates_failed: AtomicU64,
    pub debates_canceled: AtomicU64,
    pub ws_connections: AtomicI64,
    pub ws_slow_drops: AtomicU64,
    pub ws_coalesced: AtomicU64,
    pub rate_limited: AtomicU64,
    pub auth_failures: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Render the `/metrics` payload. One gauge/counter per line with a
    /// `# HELP` / `# TYPE` header, as Prometheus expects.
    pub fn render(&self, events_published: u64, active_debates: usize) -> String {
        let mut out = String::with_capacity(1024);
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!(
                "# HELP aragora_{name} {help}\n# TYPE aragora_{name} counter\naragora_{name} {value}\n"
            ));
        };
        counter(
            "debates_started_total",
            "Debates admitted by the orchestrator.",
            self.debates_started.load(Ordering::Relaxed),
        );
        counter(
            "debates_completed_total",
            "Debates sealed with consensus or no_consensus.",
            self.debates_completed.load(Ordering::Relaxed),
        );
        counter(
            "debates_failed_total",
            "Debates sealed with outcome=error.",
            self.debates_failed.load(Ordering::Relaxed),
        );
        counter(
            "debates_canceled_total",
            "Debates sealed with outcome=canceled.",
            self.debates_canceled.load(Ordering::Relaxed),
        );
        counter(
            "events_published_total",
            "Events appended to the durable log.",
            events_published,
        );
        counter(
            "ws_slow_drops_total",
            "Subscriber connections dropped for falling behind.",
            self.ws_slow_drops.load(Ordering::Relaxed),
        );
        counter(
            "ws_coalesced_events_total",
            "Token deltas merged under back-pressure.",
            self.ws_coalesced.load(Ordering::Relaxed),
        );
        counter(
            "rate_limited_total",
            "Requests rejected by the rate limiter.",
            self.rate_limited.load(Ordering::Relaxed),
        );
        counter(
            "auth_failures_total",
            "Requests rejected by the auth gate.",
            self.auth_failures.load(Ordering::Relaxed),
        );

        out.push_str(&format!(
            "# HELP aragora_ws_connections Current WebSocket subscribers.\n\
             # TYPE aragora_ws_connections gauge\naragora_ws_connections {}\n",
            self.ws_connections.load(Ordering::Relaxed)
        ));
        out.push_str(&format!(
            "# HELP aragora_active_debates Debates currently running.\n\
             # TYPE aragora_active_debates gauge\naragora_active_debates {active_debates}\n"
        ));
        out
    }
}
