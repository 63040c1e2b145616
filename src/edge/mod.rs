//! HTTP/WebSocket edge — the external-collaborator surface described in
//! spec §1 and §6. This is a thin adapter: it translates engine results
//! into the `{success, data, error, timestamp}` envelope and WS frames; it
//! owns none of the matchmaking logic itself.

pub mod http;
pub mod ws;

use std::sync::Arc;

use salvo::prelude::*;
use serde::Serialize;

use crate::engine::Engine;
use crate::utils::limiter::{RateLimit, RouterRateLimitExt};

/// Every HTTP response on this API has this shape.
#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: now_ms(),
        }
    }
}

impl ApiEnvelope<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            timestamp: now_ms(),
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn ok_json<T: Serialize>(data: T) -> Json<ApiEnvelope<T>> {
    Json(ApiEnvelope::ok(data))
}

/// Builds the full HTTP router with no gate on `/stats` — for a core-only
/// build/test where no admin auth collaborator is wired in.
pub fn root(engine: Engine) -> Router {
    root_with(engine, None)
}

/// Builds the full HTTP router: `/health`, `/signallingserver`,
/// `/queue/join`, `/queue/position/:sessionId`, `/stats`, and the WS
/// upgrade endpoint, all scoped under the logging/timeout hoops the
/// teacher applies to its own API routes.
///
/// `stats_auth`: the hoop a real deployment composes onto the
/// auth-gated `/stats` route (spec §6). JWT/session verification is an
/// external collaborator per spec §1 — this crate never implements it —
/// so the gate is an injection point, the same "compose auth as a hoop"
/// shape as the teacher's `RouterAuthExt::requires_user_login`. `None`
/// leaves `/stats` open, matching `root()`.
pub fn root_with(engine: Engine, stats_auth: Option<Arc<dyn Handler>>) -> Router {
    let join_limit = RateLimit::per_minute(engine.config().rate_limit_max_requests);

    let mut stats_router = Router::with_path("stats");
    if let Some(hoop) = stats_auth {
        stats_router = stats_router.hoop(hoop);
    }
    let stats_router = stats_router.get(http::stats);

    Router::new()
        .hoop(crate::utils::logger::Logger)
        .hoop(Timeout::new(std::time::Duration::from_secs(30)))
        .hoop(crate::utils::limiter::inject_engine(engine.clone()))
        .push(Router::with_path("health").get(http::health))
        .push(Router::with_path("signallingserver").get(http::signalling_server))
        .push(
            Router::with_path("queue/join")
                .ip_rate_limit(&join_limit)
                .post(http::join_queue),
        )
        .push(Router::with_path("queue/position/{session_id}").get(http::queue_position))
        .push(stats_router)
        .push(Router::with_path("ws").goal(ws::upgrade))
}
