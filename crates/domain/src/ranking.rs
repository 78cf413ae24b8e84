//! Ranking entities: positions extracted from debate messages, the flip
//! relation between them, ELO match events and per-agent ratings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Positions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionOutcome {
    Pending,
    Correct,
    Incorrect,
    Unknown,
}

/// A discrete claim attributable to one agent in one debate at one round.
///
/// Each position points to exactly one source message, identified by
/// `(debate_id, round, agent)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub agent: String,
    pub claim: String,
    pub confidence: f64,
    pub domain: String,
    pub debate_id: String,
    pub round: u32,
    pub outcome: PositionOutcome,
    /// Semantic centroid of the claim. Empty when no embedder ran.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub ts: DateTime<Utc>,
}

impl Position {
    pub fn new(agent: &str, claim: &str, confidence: f64, domain: &str, debate_id: &str, round: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            agent: agent.to_string(),
            claim: claim.to_string(),
            confidence,
            domain: domain.to_string(),
            debate_id: debate_id.to_string(),
            round,
            outcome: PositionOutcome::Pending,
            embedding: Vec::new(),
            ts: Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Flips
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipKind {
    Contradiction,
    Retraction,
    Qualification,
    Refinement,
}

impl FlipKind {
    /// Contradictions and retractions count against consistency.
    pub fn hurts_consistency(self) -> bool {
        matches!(self, Self::Contradiction | Self::Retraction)
    }
}

/// A typed relation between two positions of the same agent. Edges always
/// point from the older position to the newer one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flip {
    pub id: String,
    pub agent: String,
    pub original_position: String,
    pub new_position: String,
    /// Cosine similarity between the two claims, in [0, 1].
    pub similarity: f64,
    pub kind: FlipKind,
    pub domain: String,
    pub ts: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Matches & ratings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ELO event produced at the end of a rankable debate.
///
/// `elo_changes` sums to zero within floating tolerance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRecord {
    pub id: String,
    pub debate_id: String,
    /// At least two agents.
    pub participants: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub elo_changes: HashMap<String, f64>,
    pub domain: String,
    pub ts: DateTime<Utc>,
}

impl MatchRecord {
    /// `|Σ elo_changes|` for the zero-sum invariant check.
    pub fn elo_sum(&self) -> f64 {
        self.elo_changes.values().sum()
    }
}

pub const DEFAULT_ELO: f64 = 1200.0;

/// Per-agent, per-domain rating row. Counters are monotone; `elo` is mutated
/// only through match recording; `consistency` is recomputed from the flip
/// counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRating {
    pub agent: String,
    pub domain: String,
    pub elo: f64,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    pub consistency: f64,
    pub total_positions: u32,
    pub contradictions: u32,
    pub retractions: u32,
    pub qualifications: u32,
    pub updated_at: DateTime<Utc>,
}

impl AgentRating {
    pub fn new(agent: &str, domain: &str) -> Self {
        Self {
            agent: agent.to_string(),
            domain: domain.to_string(),
            elo: DEFAULT_ELO,
            wins: 0,
            losses: 0,
            draws: 0,
            consistency: 1.0,
            total_positions: 0,
            contradictions: 0,
            retractions: 0,
            qualifications: 0,
            updated_at: Utc::now(),
        }
    }

    /// Recompute the consistency score from the flip counters, clamped to
    /// [0, 1]. `qualification_weight` is the policy knob for whether (and
    /// how much) qualifications count; 0.0 means they do not.
    pub fn recompute_consistency(&mut self, qualification_weight: f64) {
        let hurtful = self.contradictions as f64
            + self.retractions as f64
            + qualification_weight * self.qualifications as f64;
        let total = (self.total_positions as f64).max(1.0);
        self.consistency = (1.0 - hurtful / total).clamp(0.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rating_starts_consistent() {
        let r = AgentRating::new("a", "general");
        assert_eq!(r.elo, DEFAULT_ELO);
        assert_eq!(r.consistency, 1.0);
    }

    #[test]
    fn consistency_clamped_and_counted() {
        let mut r = AgentRating::new("a", "general");
        r.total_positions = 4;
        r.contradictions = 1;
        r.retractions = 1;
        r.recompute_consistency(0.0);
        assert!((r.consistency - 0.5).abs() < 1e-9);

        r.contradictions = 10;
        r.recompute_consistency(0.0);
        assert_eq!(r.consistency, 0.0);
    }

    #[test]
    fn qualification_weight_knob() {
        let mut r = AgentRating::new("a", "general");
        r.total_positions = 10;
        r.qualifications = 5;
        r.recompute_consistency(0.0);
        assert_eq!(r.consistency, 1.0);
        r.recompute_consistency(0.5);
        assert!((r.consistency - 0.75).abs() < 1e-9);
    }

    #[test]
    fn consistency_with_zero_positions() {
        let mut r = AgentRating::new("a", "general");
        r.recompute_consistency(0.0);
        assert_eq!(r.consistency, 1.0);
    }

    #[test]
    fn elo_sum_of_zero_sum_match() {
        let mut changes = HashMap::new();
        changes.insert("a".to_string(), 16.0);
        changes.insert("b".to_string(), -16.0);
        let m = MatchRecord {
            id: "m1".into(),
            debate_id: "d1".into(),
            participants: vec!["a".into(), "b".into()],
            winner: Some("a".into()),
            elo_changes: changes,
            domain: "general".into(),
            ts: Utc::now(),
        };
        assert!(m.elo_sum().abs() < 1e-6);
    }

    #[test]
    fn flip_kind_consistency_impact() {
        assert!(FlipKind::Contradiction.hurts_consistency());
        assert!(FlipKind::Retraction.hurts_consistency());
        assert!(!FlipKind::Qualification.hurts_consistency());
        assert!(!FlipKind::Refinement.hurts_consistency());
    }
}
