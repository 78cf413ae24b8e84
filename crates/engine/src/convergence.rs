//! Convergence detection: similarity-based early stop, distinct from
//! consensus.

use ag_domain::config::ConvergenceConfig;

use crate::embed::cosine;

/// Mean pairwise cosine similarity of the agents' round-final messages.
/// Needs at least two vectors.
pub fn round_similarity(embeddings: &[Vec<f32>]) -> Option<f64> {
    if embeddings.len() < 2 {
        return None;
    }
    let mut sum = 0.0;
    let mut pairs = 0u32;
    for i in 0..embeddings.len() {
        for j in (i + 1)..embeddings.len() {
            sum += cosine(&embeddings[i], &embeddings[j]);
            pairs += 1;
        }
    }
    Some(sum / pairs as f64)
}

/// Tracks the similarity streak across rounds.
///
/// Triggers when similarity stays at or above the threshold for two
/// consecutive rounds, counting only rounds at or past `min_rounds`. A
/// round without a similarity reading (embedding failure, lone agent)
/// breaks the streak.
pub struct ConvergenceTracker {
    cfg: ConvergenceConfig,
    streak: u32,
}

impl ConvergenceTracker {
    pub fn new(cfg: ConvergenceConfig) -> Self {
        Self { cfg, streak: 0 }
    }

    /// Record the similarity for `round` (1-based) and report whether the
    /// early stop fires.
    pub fn observe(&mut self, round: u32, similarity: Option<f64>) -> bool {
        if !self.cfg.enabled {
            return false;
        }
        match similarity {
            Some(sim) if sim >= self.cfg.similarity_threshold => {
                if round >= self.cfg.min_rounds {
                    self.streak += 1;
                }
            }
            _ => self.streak = 0,
        }
        self.streak >= 2
    }
}
