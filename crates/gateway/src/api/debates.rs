//! Debate endpoints: list, detail, event replay, start, cancel.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use ag_domain::config::{ConsensusPolicy, DebateConfig, Phase};
use ag_domain::error::Error;
use ag_domain::event::{EventKind, EventPayload};
use ag_engine::orchestrator::DebateRequest;

use crate::api::error_response;
use crate::metrics::Metrics;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Read side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// GET /api/debates — recent debates, newest first.
pub async fn list_debates(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    match state.store.list_debates(limit, query.cursor.as_deref()) {
        Ok((debates, next_cursor)) => Json(serde_json::json!({
            "debates": debates,
            "next_cursor": next_cursor,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/debates/:slug — one debate with messages, votes and consensus.
pub async fn get_debate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Response {
    let debate = match state.store.get_debate(&slug) {
        Ok(Some(d)) => d,
        Ok(None) => return error_response(&Error::NotFound(format!("debate '{slug}'"))),
        Err(e) => return error_response(&e),
    };

    let messages = match state.store.messages_for(&debate.debate_id) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };

    // Votes and the consensus result live in the durable event log.
    let events = state
        .store
        .read_events(Some(&debate.debate_id), None, 1000)
        .unwrap_or_default();
    let votes: Vec<_> = events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Vote { vote } => Some(vote.clone()),
            _ => None,
        })
        .collect();
    let consensus = events.iter().rev().find_map(|e| match &e.payload {
        EventPayload::Consensus { result } => Some(result.clone()),
        _ => None,
    });

    Json(serde_json::json!({
        "debate": debate,
        "messages": messages,
        "votes": votes,
        "consensus": consensus,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub after: Option<u64>,
    pub limit: Option<usize>,
}

/// GET /api/debates/:slug/events — durable event log, oldest first.
pub async fn get_events(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    let debate = match state.store.get_debate(&slug) {
        Ok(Some(d)) => d,
        Ok(None) => return error_response(&Error::NotFound(format!("debate '{slug}'"))),
        Err(e) => return error_response(&e),
    };
    match state.store.read_events(
        Some(&debate.debate_id),
        query.after,
        query.limit.unwrap_or(500),
    ) {
        Ok(events) => Json(serde_json::json!({ "events": events })).into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Write side
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct StartDebateBody {
    pub task: String,
    pub agents: Vec<String>,
    #[serde(default)]
    pub rounds: Option<u32>,
    #[serde(default)]
    pub consensus_policy: Option<ConsensusPolicy>,
    #[serde(default)]
    pub consensus_threshold: Option<f64>,
    #[serde(default)]
    pub phases: Option<Vec<Phase>>,
    #[serde(default)]
    pub rotate_roles: Option<bool>,
    #[serde(default)]
    pub judge: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub research_enabled: Option<bool>,
}

impl StartDebateBody {
    fn into_request(self, state: &AppState) -> DebateRequest {
        let mut cfg = DebateConfig::from_defaults(&state.config.debate);
        if let Some(rounds) = self.rounds {
            cfg.rounds_planned = rounds;
        }
        if let Some(policy) = self.consensus_policy {
            cfg.consensus_policy = policy;
        }
        if let Some(threshold) = self.consensus_threshold {
            cfg.consensus_threshold = threshold;
        }
        if let Some(phases) = self.phases {
            cfg.phases_per_round = phases;
        }
        if let Some(rotate) = self.rotate_roles {
            cfg.rotate_roles = rotate;
        }
        if self.judge.is_some() {
            cfg.judge = self.judge;
        }
        if let Some(domain) = self.domain {
            cfg.domain = domain;
        }
        if let Some(research) = self.research_enabled {
            cfg.research_enabled = research;
        }
        DebateRequest {
            task: self.task,
            agents: self.agents,
            config: cfg,
        }
    }
}

/// POST /api/debates — admit and start a debate; responds immediately with
/// its identifiers while the debate runs.
pub async fn start_debate(
    State(state): State<AppState>,
    Json(body): Json<StartDebateBody>,
) -> Response {
    let request = body.into_request(&state);
    let config = request.config.clone();

    let debate = match state.orchestrator.admit(&request) {
        Ok(d) => d,
        Err(e) => return error_response(&e),
    };
    Metrics::incr(&state.metrics.debates_started);

    let cancel = state.cancel_map.register(&debate.debate_id);
    let debate_id = debate.debate_id.clone();
    let slug = debate.slug.clone();
    let response_id = debate_id.clone();

    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        let result = task_state
            .orchestrator
            .run(debate, config, cancel)
            .await;
        match result {
            Ok(sealed) => match sealed.outcome {
                Some(ag_domain::debate::DebateOutcome::Canceled) => {
                    Metrics::incr(&task_state.metrics.debates_canceled)
                }
                Some(ag_domain::debate::DebateOutcome::Error) => {
                    Metrics::incr(&task_state.metrics.debates_failed)
                }
                _ => Metrics::incr(&task_state.metrics.debates_completed),
            },
            Err(e) => {
                tracing::error!(debate_id = %debate_id, error = %e, "debate task failed");
                Metrics::incr(&task_state.metrics.debates_failed);
            }
        }
        task_state.cancel_map.remove(&debate_id);
    });

    state.prune_active();
    state.active.lock().insert(slug.clone(), handle);

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "debate_id": response_id,
            "slug": slug,
        })),
    )
        .into_response()
}

/// POST /api/debates/:slug/cancel — cooperative cancellation.
pub async fn cancel_debate(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Response {
    let debate = match state.store.get_debate(&slug) {
        Ok(Some(d)) => d,
        Ok(None) => return error_response(&Error::NotFound(format!("debate '{slug}'"))),
        Err(e) => return error_response(&e),
    };
    let canceled = state.cancel_map.cancel(&debate.debate_id);
    Json(serde_json::json!({
        "debate_id": debate.debate_id,
        "canceled": canceled,
    }))
    .into_response()
}

// Re-exported for the WebSocket hub's subscribe frame parsing.
pub(crate) fn parse_kinds(types: &[String]) -> std::collections::HashSet<EventKind> {
    types
        .iter()
        .filter_map(|t| serde_json::from_value(serde_json::Value::String(t.clone())).ok())
        .collect()
}
