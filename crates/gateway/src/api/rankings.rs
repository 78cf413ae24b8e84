//! Ranking endpoints: leaderboard, recent matches, recent flips, per-agent
//! consistency.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use ag_domain::error::Error;
use ag_domain::ranking::AgentRating;

use crate::api::error_response;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    pub domain: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/leaderboard — ranked agents with ELO, W/L/D and consistency.
///
/// Ordering is by ELO; when `ranking.consistency_weight` is non-zero the
/// sort key becomes `elo * (1 - w + w * consistency)` so chronically
/// inconsistent agents sink without their raw ELO being rewritten.
pub async fn leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let mut rows = match state.store.leaderboard(query.domain.as_deref(), limit) {
        Ok(rows) => rows,
        Err(e) => return error_response(&e),
    };

    let w = state.config.ranking.consistency_weight.clamp(0.0, 1.0);
    if w > 0.0 {
        rows.sort_by(|a, b| {
            score(b, w)
                .partial_cmp(&score(a, w))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    Json(serde_json::json!({ "leaderboard": rows })).into_response()
}

fn score(rating: &AgentRating, w: f64) -> f64 {
    rating.elo * (1.0 - w + w * rating.consistency)
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

/// GET /api/matches/recent — ELO match events, newest first.
pub async fn recent_matches(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    match state.store.recent_matches(query.limit.unwrap_or(DEFAULT_LIMIT)) {
        Ok(matches) => Json(serde_json::json!({ "matches": matches })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/flips/recent — recent position flips, newest first.
pub async fn recent_flips(
    State(state): State<AppState>,
    Query(query): Query<RecentQuery>,
) -> Response {
    match state.store.recent_flips(query.limit.unwrap_or(DEFAULT_LIMIT)) {
        Ok(flips) => Json(serde_json::json!({ "flips": flips })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/agent/:name/consistency — consistency score and counts, per
/// domain plus an overall position-weighted aggregate.
pub async fn consistency(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let all = match state.store.leaderboard(None, 200) {
        Ok(rows) => rows,
        Err(e) => return error_response(&e),
    };
    let rows: Vec<&AgentRating> = all.iter().filter(|r| r.agent == name).collect();
    if rows.is_empty() {
        return error_response(&Error::NotFound(format!("agent '{name}'")));
    }

    let total_positions: u32 = rows.iter().map(|r| r.total_positions).sum();
    let overall = if total_positions == 0 {
        1.0
    } else {
        rows.iter()
            .map(|r| r.consistency * r.total_positions as f64)
            .sum::<f64>()
            / total_positions as f64
    };

    Json(serde_json::json!({
        "agent": name,
        "consistency": overall,
        "total_positions": total_positions,
        "contradictions": rows.iter().map(|r| r.contradictions).sum::<u32>(),
        "retractions": rows.iter().map(|r| r.retractions).sum::<u32>(),
        "qualifications": rows.iter().map(|r| r.qualifications).sum::<u32>(),
        "domains": rows,
    }))
    .into_response()
}
