//! The storage capability interface.
//!
//! All write paths that touch multiple rows (a match plus its rating
//! updates, a position plus its rating counters) execute as one atomic unit:
//! readers never observe a partially applied match.

use ag_domain::debate::{Debate, DebateMessage, DebateOutcome};
use ag_domain::error::Result;
use ag_domain::event::Event;
use ag_domain::ranking::{AgentRating, Flip, MatchRecord, Position};
use serde::{Deserialize, Serialize};

/// Final payload applied when a debate is sealed.
///
/// Sealing is idempotent: a second seal with an equal payload is a no-op, a
/// second seal with a different payload is an integrity error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebateSeal {
    pub rounds_used: u32,
    pub outcome: DebateOutcome,
    pub consensus_reached: bool,
    pub confidence: Option<f64>,
    pub final_artifact: Option<serde_json::Value>,
}

/// Narrow interface over the embedded store.
///
/// Guarantees per operation:
/// - `append_event` — durable before return; a monotone sequence number is
///   assigned under the global event-log lock (strictly increasing, hence
///   strictly increasing per debate).
/// - `create_debate` — unique slug enforced.
/// - `seal_debate` — idempotent (see [`DebateSeal`]).
/// - `append_message` — unique `(debate_id, round, agent, role)` enforced.
/// - `record_match` — atomic with the rating updates of all participants.
/// - read paths — bounded; default limits enforced; newest first.
pub trait Store: Send + Sync {
    // ── Events ───────────────────────────────────────────────────────
    /// Append the event, assigning its sequence number. Returns the stored
    /// event (with `seq` filled in).
    fn append_event(&self, event: Event) -> Result<Event>;

    /// Read events after `after_seq` (exclusive), oldest first, optionally
    /// restricted to one debate.
    fn read_events(
        &self,
        debate_id: Option<&str>,
        after_seq: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Event>>;

    // ── Debates ──────────────────────────────────────────────────────
    fn create_debate(&self, debate: &Debate) -> Result<()>;
    /// Look up by slug or by debate id.
    fn get_debate(&self, slug_or_id: &str) -> Result<Option<Debate>>;
    /// Newest first; `cursor` is the last debate id of the previous page.
    fn list_debates(
        &self,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<(Vec<Debate>, Option<String>)>;
    fn seal_debate(&self, debate_id: &str, seal: &DebateSeal) -> Result<()>;

    // ── Messages ─────────────────────────────────────────────────────
    fn append_message(&self, message: &DebateMessage) -> Result<()>;
    fn messages_for(&self, debate_id: &str) -> Result<Vec<DebateMessage>>;

    // ── Ranking ──────────────────────────────────────────────────────
    /// Atomic: the match row and every participant's rating commit together.
    /// Returns the updated ratings.
    fn record_match(&self, record: &MatchRecord) -> Result<Vec<AgentRating>>;

    /// Atomic: the flip row plus the flipping agent's rating counters and
    /// recomputed consistency.
    fn record_flip(&self, flip: &Flip, qualification_weight: f64) -> Result<AgentRating>;

    /// Atomic: the position row plus the agent's `total_positions` counter.
    fn append_position(&self, position: &Position, qualification_weight: f64)
        -> Result<AgentRating>;

    /// Last-K scan of an agent's prior positions, newest first. `domain`
    /// restricts the scan; `None` scans across all domains.
    fn positions_for_agent(
        &self,
        agent: &str,
        domain: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Position>>;

    fn recent_matches(&self, limit: usize) -> Result<Vec<MatchRecord>>;
    fn recent_flips(&self, limit: usize) -> Result<Vec<Flip>>;
    fn rating(&self, agent: &str, domain: &str) -> Result<Option<AgentRating>>;
    /// Ordered by ELO descending. `domain = None` lists every domain row.
    fn leaderboard(&self, domain: Option<&str>, limit: usize) -> Result<Vec<AgentRating>>;

    // ── Schema ───────────────────────────────────────────────────────
    fn schema_version(&self, module: &str) -> Result<u32>;
}
