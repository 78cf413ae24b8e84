//! Consensus policies applied to collected votes.
//!
//! Pure functions: the orchestrator gathers votes (and, for `weighted`, the
//! voters' ELO-derived weights) and the policy decides whether the agents
//! have agreed and with what confidence.

use std::collections::HashMap;

use ag_domain::config::ConsensusPolicy;
use ag_domain::debate::{ConsensusResult, Vote};

/// One candidate proposal, keyed by its author.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub agent: String,
    /// Round the proposal first appeared in (earliest wins ties).
    pub first_round: u32,
    pub content: String,
}

/// Apply the policy. `weights` is only consulted by `weighted`; a missing
/// entry defaults to weight 1.0. The `judge` policy expects exactly the
/// judge's vote.
pub fn apply_policy(
    policy: ConsensusPolicy,
    threshold: f64,
    votes: &[Vote],
    candidates: &[Candidate],
    weights: &HashMap<String, f64>,
) -> ConsensusResult {
    if votes.is_empty() {
        return ConsensusResult {
            reached: false,
            choice: None,
            confidence: None,
        };
    }

    match policy {
        ConsensusPolicy::Judge => {
            let vote = &votes[0];
            ConsensusResult {
                reached: true,
                choice: Some(vote.choice.clone()),
                confidence: Some(vote.confidence.clamp(0.0, 1.0)),
            }
        }
        ConsensusPolicy::Unanimous => {
            let first = &votes[0].choice;
            if votes.iter().all(|v| &v.choice == first) {
                ConsensusResult {
                    reached: true,
                    choice: Some(first.clone()),
                    confidence: Some(1.0),
                }
            } else {
                ConsensusResult {
                    reached: false,
                    choice: None,
                    confidence: None,
                }
            }
        }
        ConsensusPolicy::Majority => {
            let leader = plurality_leader(votes, candidates);
            match leader {
                Some((choice, _count, mean_confidence)) => ConsensusResult {
                    reached: true,
                    choice: Some(choice),
                    confidence: Some(mean_confidence),
                },
                None => ConsensusResult {
                    reached: false,
                    choice: None,
                    confidence: None,
                },
            }
        }
        ConsensusPolicy::Supermajority => {
            let leader = plurality_leader(votes, candidates);
            match leader {
                Some((choice, count, _)) => {
                    let fraction = count as f64 / votes.len() as f64;
                    if fraction >= threshold {
                        ConsensusResult {
                            reached: true,
                            choice: Some(choice),
                            confidence: Some(fraction),
                        }
                    } else {
                        // The leader still ranks the proposals.
                        ConsensusResult {
                            reached: false,
                            choice: Some(choice),
                            confidence: None,
                        }
                    }
                }
                None => ConsensusResult {
                    reached: false,
                    choice: None,
                    confidence: None,
                },
            }
        }
        ConsensusPolicy::Weighted => {
            let mut weight_sums: HashMap<&str, f64> = HashMap::new();
            let mut total = 0.0;
            for vote in votes {
                let w = weights.get(&vote.voter).copied().unwrap_or(1.0);
                *weight_sums.entry(vote.choice.as_str()).or_insert(0.0) += w;
                total += w;
            }
            if total <= 0.0 {
                return ConsensusResult {
                    reached: false,
                    choice: None,
                    confidence: None,
                };
            }
            let (choice, winner_weight) = weight_sums
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(c, w)| (c.to_string(), *w))
                .unwrap();
            let fraction = winner_weight / total;
            if fraction >= threshold {
                ConsensusResult {
                    reached: true,
                    choice: Some(choice),
                    confidence: Some(fraction),
                }
            } else {
                ConsensusResult {
                    reached: false,
                    choice: Some(choice),
                    confidence: None,
                }
            }
        }
    }
}

/// ELO-derived vote weights, normalized so the maximum weight is 1.
pub fn elo_weights(elos: &HashMap<String, f64>) -> HashMap<String, f64> {
    let max = elos.values().copied().fold(f64::MIN, f64::max);
    if max <= 0.0 || elos.is_empty() {
        return elos.keys().map(|a| (a.clone(), 1.0)).collect();
    }
    elos.iter()
        .map(|(agent, elo)| (agent.clone(), (elo / max).clamp(0.0, 1.0)))
        .collect()
}

/// Plurality winner with tie-breaks: (a) highest mean confidence among the
/// choice's votes, (b) earliest proposal round. Returns the winning choice,
/// its vote count, and the mean confidence of its votes.
fn plurality_leader(
    votes: &[Vote],
    candidates: &[Candidate],
) -> Option<(String, usize, f64)> {
    let mut tallies: HashMap<&str, (usize, f64)> = HashMap::new();
    for vote in votes {
        let entry = tallies.entry(vote.choice.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += vote.confidence;
    }

    let first_round = |choice: &str| {
        candidates
            .iter()
            .find(|c| c.agent == choice)
            .map(|c| c.first_round)
            .unwrap_or(u32::MAX)
    };

    tallies
        .into_iter()
        .map(|(choice, (count, conf_sum))| (choice.to_string(), count, conf_sum / count as f64))
        .max_by(|a, b| {
            a.1.cmp(&b.1)
                .then(a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                .then(first_round(&b.0).cmp(&first_round(&a.0)))
        })
}
