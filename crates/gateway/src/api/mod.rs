pub mod admin;
pub mod auth;
pub mod debates;
pub mod rankings;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;

use ag_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (behind the auth + rate-limit gate). `state` is needed to wire up the
/// gate middleware at build time.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/health", get(admin::health))
        .route("/metrics", get(admin::metrics));

    let protected = Router::new()
        // Debates
        .route("/api/debates", get(debates::list_debates))
        .route("/api/debates", post(debates::start_debate))
        .route("/api/debates/:slug", get(debates::get_debate))
        .route("/api/debates/:slug/events", get(debates::get_events))
        .route("/api/debates/:slug/cancel", post(debates::cancel_debate))
        // Rankings
        .route("/api/leaderboard", get(rankings::leaderboard))
        .route("/api/matches/recent", get(rankings::recent_matches))
        .route("/api/flips/recent", get(rankings::recent_flips))
        .route("/api/agent/:name/consistency", get(rankings::consistency))
        // Live event stream
        .route("/api/ws", get(crate::ws::ws_handler))
        .route_layer(middleware::from_fn_with_state(state, auth::gate));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Map a domain error onto a JSON error response with a stable code.
/// Bodies never carry stack traces, keys, or provider internals.
pub(crate) fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) | Error::Json(_) => StatusCode::BAD_REQUEST,
        Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        Error::Integrity(_) => StatusCode::CONFLICT,
        Error::Transient(_) | Error::Provider { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut response = (
        status,
        axum::Json(serde_json::json!({
            "error": err.to_string(),
            "code": err.code(),
        })),
    )
        .into_response();
    if let Error::RateLimited { retry_after_secs } = err {
        if let Ok(value) = retry_after_secs.to_string().parse() {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (Error::NotFound("x".into()), 404),
            (Error::InvalidInput("x".into()), 400),
            (Error::Unauthorized("x".into()), 401),
            (Error::RateLimited { retry_after_secs: 2 }, 429),
            (Error::Integrity("x".into()), 409),
            (Error::Transient("x".into()), 503),
            (Error::Timeout("x".into()), 504),
            (Error::Storage("x".into()), 500),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(&err).status().as_u16(), expected);
        }
    }

    #[test]
    fn rate_limited_carries_retry_after_header() {
        let response = error_response(&Error::RateLimited { retry_after_secs: 7 });
        assert_eq!(
            response.headers().get("Retry-After").unwrap().to_str().unwrap(),
            "7"
        );
    }
}
