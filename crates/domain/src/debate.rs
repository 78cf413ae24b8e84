//! Debate entities: the durable record of one coordinated multi-agent
//! exchange plus its per-turn messages and votes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status / outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Created,
    Running,
    Voting,
    Sealing,
    Sealed,
}

impl DebateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sealed)
    }
}

/// Final outcome recorded when a debate is sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateOutcome {
    Consensus,
    NoConsensus,
    Canceled,
    Error,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Debate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The identity-bearing debate record.
///
/// Invariants: `rounds_used <= rounds_planned`; `confidence` is present iff
/// `consensus_reached`. Identity-bearing fields are frozen once sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Debate {
    pub debate_id: String,
    /// Human-readable unique slug, derived from the task text.
    pub slug: String,
    pub task: String,
    /// Ordered list of participating agent identifiers.
    pub agents: Vec<String>,
    pub rounds_planned: u32,
    pub rounds_used: u32,
    pub status: DebateStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DebateOutcome>,
    pub consensus_reached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_artifact: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<DateTime<Utc>>,
}

impl Debate {
    pub fn new(task: &str, agents: Vec<String>, rounds_planned: u32) -> Self {
        let debate_id = Uuid::new_v4().to_string();
        let slug = slugify(task, &debate_id);
        Self {
            debate_id,
            slug,
            task: task.to_string(),
            agents,
            rounds_planned,
            rounds_used: 0,
            status: DebateStatus::Created,
            outcome: None,
            consensus_reached: false,
            confidence: None,
            final_artifact: None,
            domain: None,
            created_at: Utc::now(),
            sealed_at: None,
        }
    }
}

/// Derive a unique, URL-safe slug from the task text.
///
/// Lowercased alphanumeric words joined by `-`, capped at 48 chars, with the
/// first uuid segment appended so identical tasks never collide.
pub fn slugify(task: &str, debate_id: &str) -> String {
    let mut words = String::new();
    for c in task.chars() {
        if words.len() >= 48 {
            break;
        }
        if c.is_ascii_alphanumeric() {
            words.push(c.to_ascii_lowercase());
        } else if !words.ends_with('-') && !words.is_empty() {
            words.push('-');
        }
    }
    let words = words.trim_matches('-');
    let tail = debate_id.split('-').next().unwrap_or("0");
    if words.is_empty() {
        format!("debate-{tail}")
    } else {
        format!("{words}-{tail}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The role a message was produced under. Together with `(debate_id, round,
/// agent)` this uniquely identifies a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    Proposer,
    Critic,
    Reviser,
    Voter,
    Judge,
    Researcher,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposer => "proposer",
            Self::Critic => "critic",
            Self::Reviser => "reviser",
            Self::Voter => "voter",
            Self::Judge => "judge",
            Self::Researcher => "researcher",
        }
    }
}

/// One agent turn, append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateMessage {
    pub debate_id: String,
    /// 1-based round number; `round <= rounds_planned`.
    pub round: u32,
    pub agent: String,
    pub role: TurnRole,
    /// Rotating cognitive stance tag (e.g. "skeptic"), when role rotation
    /// is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_role: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<String>,
    pub ts: DateTime<Utc>,
}

impl DebateMessage {
    /// Storage key enforcing the uniqueness invariant.
    pub fn unique_key(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.debate_id,
            self.round,
            self.agent,
            self.role.as_str()
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One agent's vote over the candidate proposals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub voter: String,
    /// The agent whose proposal was chosen.
    pub choice: String,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Result of applying a consensus policy to the collected votes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub reached: bool,
    /// Winning proposal's agent, when one was selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    /// The policy's natural statistic (fraction agreeing, judge confidence).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_debate_defaults() {
        let d = Debate::new("Pick X or Y", vec!["a".into(), "b".into()], 3);
        assert_eq!(d.status, DebateStatus::Created);
        assert_eq!(d.rounds_used, 0);
        assert!(!d.consensus_reached);
        assert!(d.confidence.is_none());
        assert!(d.slug.starts_with("pick-x-or-y-"));
    }

    #[test]
    fn slug_is_url_safe_and_unique_per_id() {
        let s1 = slugify("Use µservices? Really!?", "aaaa-bbbb");
        assert!(s1.starts_with("use-services-really-"));
        let s2 = slugify("Use µservices? Really!?", "cccc-dddd");
        assert_ne!(s1, s2);
    }

    #[test]
    fn slug_for_empty_task() {
        assert_eq!(slugify("!!!", "1234-5"), "debate-1234");
    }

    #[test]
    fn message_unique_key_includes_role() {
        let mut m = DebateMessage {
            debate_id: "d1".into(),
            round: 1,
            agent: "a".into(),
            role: TurnRole::Proposer,
            cognitive_role: None,
            content: "x".into(),
            confidence: None,
            citations: vec![],
            ts: Utc::now(),
        };
        let k1 = m.unique_key();
        m.role = TurnRole::Critic;
        assert_ne!(k1, m.unique_key());
    }

    #[test]
    fn status_terminal_only_when_sealed() {
        assert!(DebateStatus::Sealed.is_terminal());
        assert!(!DebateStatus::Voting.is_terminal());
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let j = serde_json::to_string(&DebateOutcome::NoConsensus).unwrap();
        assert_eq!(j, "\"no_consensus\"");
    }
}
