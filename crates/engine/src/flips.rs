//! Flip detection: typed change relations between an agent's positions.
//!
//! For each new position the engine scans the agent's most recent prior
//! positions (same domain first, all domains when none exist), compares
//! embeddings with cosine, and classifies the relation. Edges always point
//! from the older position to the newer one, so the flip graph is acyclic
//! by construction.

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use ag_domain::config::RankingConfig;
use ag_domain::ranking::{Flip, FlipKind, Position};

use crate::embed::cosine;

pub struct FlipEngine {
    cfg: RankingConfig,
    negation: Regex,
    withdrawal: Regex,
}

impl FlipEngine {
    pub fn new(cfg: RankingConfig) -> Self {
        let negation = Regex::new(
            r"(?i)\b(not|no|never|don't|do not|doesn't|does not|won't|will not|shouldn't|should not|avoid|against|isn't|is not|aren't|are not)\b",
        )
        .expect("negation regex");
        let withdrawal = Regex::new(
            r"(?i)\b(withdraw|retract|i was wrong|no longer (believe|think|hold|stand)|take (that|it) back)\b",
        )
        .expect("withdrawal regex");
        Self {
            cfg,
            negation,
            withdrawal,
        }
    }

    /// Bound on the prior-position scan.
    pub fn scan_limit(&self) -> usize {
        self.cfg.position_scan_limit
    }

    /// Compare a new position against the agent's priors and return the
    /// detected flip, if any. `priors` must belong to the same agent and be
    /// ordered newest first.
    pub fn detect(&self, new: &Position, priors: &[Position]) -> Option<Flip> {
        // Most semantically similar prior is the comparison anchor.
        let (best, similarity) = priors
            .iter()
            .filter(|p| p.id != new.id)
            .map(|p| (p, cosine(&p.embedding, &new.embedding)))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        let kind = self.classify(best, new, similarity)?;

        Some(Flip {
            id: Uuid::new_v4().to_string(),
            agent: new.agent.clone(),
            original_position: best.id.clone(),
            new_position: new.id.clone(),
            similarity,
            kind,
            domain: new.domain.clone(),
            ts: Utc::now(),
        })
    }

    fn classify(&self, old: &Position, new: &Position, similarity: f64) -> Option<FlipKind> {
        let t = &self.cfg;

        if similarity >= t.tau_same && normalized(&old.claim) == normalized(&new.claim) {
            // Same claim restated.
            return None;
        }
        if similarity >= t.tau_refine {
            return if new.confidence >= old.confidence {
                Some(FlipKind::Refinement)
            } else {
                Some(FlipKind::Qualification)
            };
        }
        if similarity >= t.tau_qual {
            return Some(FlipKind::Qualification);
        }
        // Low similarity: only a stance reversal or an explicit withdrawal
        // counts; an unrelated claim is not a flip.
        if self.is_contradiction(&old.claim, &new.claim) {
            return Some(FlipKind::Contradiction);
        }
        if self.withdrawal.is_match(&new.claim) {
            return Some(FlipKind::Retraction);
        }
        None
    }

    /// Opposite stance: a negation signal in exactly one of the claims,
    /// over shared subject matter.
    fn is_contradiction(&self, old_claim: &str, new_claim: &str) -> bool {
        let old_negated = self.negation.is_match(old_claim);
        let new_negated = self.negation.is_match(new_claim);
        if old_negated == new_negated {
            return false;
        }
        shared_content_words(old_claim, new_claim) >= 2
    }
}

fn normalized(claim: &str) -> String {
    claim
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Count distinct non-trivial words appearing in both claims.
fn shared_content_words(a: &str, b: &str) -> usize {
    let words = |s: &str| {
        s.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(|w| w.to_lowercase())
            .collect::<std::collections::HashSet<_>>()
    };
    words(a).intersection(&words(b)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::LexicalEmbedder;

    fn engine() -> FlipEngine {
        FlipEngine::new(RankingConfig::default())
    }

    fn position(agent: &str, claim: &str, confidence: f64, embedding: Vec<f32>) -> Position {
        let mut p = Position::new(agent, claim, confidence, "general", "d1", 1);
        p.embedding = embedding;
        p
    }

    fn lexical_position(agent: &str, claim: &str, confidence: f64) -> Position {
        position(agent, claim, confidence, LexicalEmbedder::embed_one(claim))
    }

    #[test]
    fn restated_claim_is_not_a_flip() {
        let old = lexical_position("a", "cache size 1 MB is best", 0.8);
        let new = lexical_position("a", "Cache size 1 MB is best!", 0.8);
        assert!(engine().detect(&new, &[old]).is_none());
    }

    #[test]
    fn added_assumption_with_higher_confidence_is_refinement() {
        let old = lexical_position("a", "cache size 1 MB is best for reads always", 0.80);
        let new = lexical_position(
            "a",
            "cache size 1 MB is best for reads always assuming workload W",
            0.82,
        );
        let flip = engine().detect(&new, &[old]).expect("flip expected");
        assert_eq!(flip.kind, FlipKind::Refinement);
        assert!(flip.similarity >= 0.85);
    }

    #[test]
    fn similar_claim_with_lower_confidence_is_qualification() {
        let old = lexical_position("a", "cache size 1 MB is best for reads always", 0.9);
        let new = lexical_position(
            "a",
            "cache size 1 MB is best for reads always assuming workload W",
            0.5,
        );
        let flip = engine().detect(&new, &[old]).expect("flip expected");
        assert_eq!(flip.kind, FlipKind::Qualification);
    }

    #[test]
    fn negated_restatement_is_contradiction() {
        // Orthogonal embeddings force the low-similarity branch; the
        // negation signal over shared words does the rest.
        let mut e1 = vec![0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0f32; 8];
        e2[1] = 1.0;
        let old = position("a", "use microservices for the backend", 0.8, e1);
        let new = position("a", "do not use microservices for the backend", 0.8, e2);
        let flip = engine().detect(&new, &[old]).expect("flip expected");
        assert_eq!(flip.kind, FlipKind::Contradiction);
    }

    #[test]
    fn explicit_withdrawal_is_retraction() {
        let mut e1 = vec![0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0f32; 8];
        e2[1] = 1.0;
        let old = position("a", "sharding is the right call here", 0.8, e1);
        let new = position("a", "I retract my earlier recommendation", 0.6, e2);
        let flip = engine().detect(&new, &[old]).expect("flip expected");
        assert_eq!(flip.kind, FlipKind::Retraction);
    }

    #[test]
    fn unrelated_claim_is_not_a_flip() {
        let mut e1 = vec![0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0f32; 8];
        e2[1] = 1.0;
        let old = position("a", "use microservices for the backend", 0.8, e1);
        let new = position("a", "the logo should be blue", 0.8, e2);
        assert!(engine().detect(&new, &[old]).is_none());
    }

    #[test]
    fn no_priors_no_flip() {
        let new = lexical_position("a", "anything", 0.5);
        assert!(engine().detect(&new, &[]).is_none());
    }

    #[test]
    fn edges_point_old_to_new() {
        let old = lexical_position("a", "claim one about caching sizes", 0.8);
        let new = lexical_position("a", "claim one about caching sizes refined", 0.9);
        let flip = engine().detect(&new, &[old.clone()]).unwrap();
        assert_eq!(flip.original_position, old.id);
        assert_eq!(flip.new_position, new.id);
    }

    #[test]
    fn contradiction_requires_shared_subject() {
        let mut e1 = vec![0f32; 8];
        e1[0] = 1.0;
        let mut e2 = vec![0f32; 8];
        e2[1] = 1.0;
        let old = position("a", "use microservices", 0.8, e1);
        let new = position("a", "do not deploy on fridays", 0.8, e2);
        assert!(engine().detect(&new, &[old]).is_none());
    }
}
