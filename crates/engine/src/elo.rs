//! ELO updates with pairwise decomposition.
//!
//! An N-way debate decomposes into C(N,2) pairwise outcomes: the winner
//! scores 1 against each loser, losers draw each other. Per-agent deltas are
//! the sum of their pairwise updates, which keeps the total exactly zero.

use std::collections::HashMap;

/// Expected score of a player rated `ra` against `rb`.
pub fn expected_score(ra: f64, rb: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rb - ra) / 400.0))
}

/// Compute per-agent ELO deltas for one match.
///
/// `ratings` maps each participant to their current rating; `winner` is the
/// winning participant, or `None` for an all-draw. The returned deltas sum
/// to zero within floating tolerance.
pub fn compute_changes(
    ratings: &[(String, f64)],
    winner: Option<&str>,
    k_factor: f64,
) -> HashMap<String, f64> {
    let mut changes: HashMap<String, f64> =
        ratings.iter().map(|(a, _)| (a.clone(), 0.0)).collect();

    for i in 0..ratings.len() {
        for j in (i + 1)..ratings.len() {
            let (agent_i, elo_i) = &ratings[i];
            let (agent_j, elo_j) = &ratings[j];

            let score_i = match winner {
                Some(w) if w == agent_i => 1.0,
                Some(w) if w == agent_j => 0.0,
                _ => 0.5,
            };

            let expected_i = expected_score(*elo_i, *elo_j);
            let delta_i = k_factor * (score_i - expected_i);

            *changes.get_mut(agent_i).unwrap() += delta_i;
            // Pairwise symmetry keeps the sum at exactly zero.
            *changes.get_mut(agent_j).unwrap() -= delta_i;
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum(changes: &HashMap<String, f64>) -> f64 {
        changes.values().sum()
    }

    #[test]
    fn equal_ratings_winner_takes_half_k() {
        let ratings = vec![("a".to_string(), 1200.0), ("b".to_string(), 1200.0)];
        let changes = compute_changes(&ratings, Some("a"), 32.0);
        assert!((changes["a"] - 16.0).abs() < 1e-9);
        assert!((changes["b"] + 16.0).abs() < 1e-9);
        assert!(sum(&changes).abs() < 1e-6);
    }

    #[test]
    fn draw_between_equals_changes_nothing() {
        let ratings = vec![("a".to_string(), 1200.0), ("b".to_string(), 1200.0)];
        let changes = compute_changes(&ratings, None, 32.0);
        assert!(changes["a"].abs() < 1e-9);
        assert!(changes["b"].abs() < 1e-9);
    }

    #[test]
    fn underdog_win_pays_more() {
        let ratings = vec![("low".to_string(), 1000.0), ("high".to_string(), 1400.0)];
        let changes = compute_changes(&ratings, Some("low"), 32.0);
        assert!(changes["low"] > 16.0);
        assert!(sum(&changes).abs() < 1e-6);
    }

    #[test]
    fn three_way_decomposition_zero_sum() {
        let ratings = vec![
            ("a".to_string(), 1250.0),
            ("b".to_string(), 1180.0),
            ("c".to_string(), 1320.0),
        ];
        let changes = compute_changes(&ratings, Some("b"), 32.0);
        assert!(sum(&changes).abs() < 1e-6);
        // Winner gains, and the losers' mutual pair is a draw.
        assert!(changes["b"] > 0.0);
        assert!(changes["a"] < changes["b"]);
        assert!(changes["c"] < changes["b"]);
    }

    #[test]
    fn draw_among_unequal_ratings_flows_downhill() {
        let ratings = vec![("a".to_string(), 1400.0), ("b".to_string(), 1000.0)];
        let changes = compute_changes(&ratings, None, 32.0);
        // The favourite loses rating on a draw.
        assert!(changes["a"] < 0.0);
        assert!(changes["b"] > 0.0);
        assert!(sum(&changes).abs() < 1e-6);
    }

    #[test]
    fn expected_scores_are_complementary() {
        let e1 = expected_score(1300.0, 1100.0);
        let e2 = expected_score(1100.0, 1300.0);
        assert!((e1 + e2 - 1.0).abs() < 1e-12);
        assert!(e1 > 0.5);
    }
}
