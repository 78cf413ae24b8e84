use serde::{Deserialize, Serialize};

/// Knobs for the ELO and flip-detection engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingConfig {
    /// ELO K-factor.
    #[serde(default = "d_k")]
    pub k_factor: f64,
    /// Similarity at or above which an unchanged claim is not a flip.
    #[serde(default = "d_tau_same")]
    pub tau_same: f64,
    /// Similarity at or above which a change reads as refinement.
    #[serde(default = "d_tau_refine")]
    pub tau_refine: f64,
    /// Similarity at or above which a change reads as qualification.
    #[serde(default = "d_tau_qual")]
    pub tau_qual: f64,
    /// Bound on the prior-position scan per flip check.
    #[serde(default = "d_scan")]
    pub position_scan_limit: usize,
    /// How much a qualification counts against consistency (0 = not at all).
    #[serde(default)]
    pub qualification_weight: f64,
    /// Blend factor between ELO and consistency on the leaderboard
    /// (0 = rank purely by ELO, consistency reported alongside).
    #[serde(default)]
    pub consistency_weight: f64,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            k_factor: d_k(),
            tau_same: d_tau_same(),
            tau_refine: d_tau_refine(),
            tau_qual: d_tau_qual(),
            position_scan_limit: d_scan(),
            qualification_weight: 0.0,
            consistency_weight: 0.0,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_k() -> f64 {
    32.0
}
fn d_tau_same() -> f64 {
    0.95
}
fn d_tau_refine() -> f64 {
    0.85
}
fn d_tau_qual() -> f64 {
    0.60
}
fn d_scan() -> usize {
    50
}
