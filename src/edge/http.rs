//! Client-facing HTTP API — spec §6's request table.

use crate::edge::{ApiEnvelope, ok_json};
use crate::error::ApiError;
use crate::ids::SessionId;
use crate::prelude::*;
use crate::utils::limiter::DepotEngineExt;

#[derive(serde::Serialize, ToSchema)]
pub struct HealthData {
    pub status: String,
    pub timestamp: i64,
    pub stats: crate::engine::EngineStats,
}

/// `GET /health`
#[endpoint]
pub async fn health(depot: &mut Depot) -> Json<ApiEnvelope<HealthData>> {
    let engine = depot.engine();
    ok_json(HealthData {
        status: "ok".to_string(),
        timestamp: super::now_ms(),
        stats: engine.stats(),
    })
}

#[derive(serde::Serialize, ToSchema)]
pub struct SignallingServerData {
    #[serde(rename = "signallingServer")]
    pub signalling_server: String,
    pub protocol: String,
    #[serde(rename = "serverId")]
    pub server_id: Option<String>,
}

/// `GET /signallingserver` — assigns the caller to a stream node
/// immediately (draining the queue first so a node freed up by a prior
/// client is handed out fairly) or reports none available.
#[endpoint]
pub async fn signalling_server(
    depot: &mut Depot,
) -> Result<Json<ApiEnvelope<SignallingServerData>>, ApiError> {
    let engine = depot.engine();
    engine.drain_queue();
    let node = engine.acquire_node().ok_or(ApiError::NoServerAvailable)?;
    Ok(ok_json(SignallingServerData {
        signalling_server: node.endpoint(),
        protocol: if node.secure { "wss".into() } else { "ws".into() },
        server_id: node.server_id,
    }))
}

#[derive(serde::Deserialize, ToSchema)]
pub struct JoinQueueInput {
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    #[serde(default)]
    pub priority: i64,
}

#[derive(serde::Serialize, ToSchema)]
pub struct JoinQueueData {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "queuePosition")]
    pub queue_position: usize,
}

/// `POST /queue/join`
#[endpoint]
pub async fn join_queue(
    depot: &mut Depot,
    input: JsonBody<JoinQueueInput>,
) -> Json<ApiEnvelope<JoinQueueData>> {
    let engine = depot.engine();
    let input = input.into_inner();
    let session = engine.enqueue(input.client_id, input.priority);
    engine.drain_queue();
    let position = engine
        .queue_position(&session.id)
        .map(|p| p.position)
        .unwrap_or(0);
    ok_json(JoinQueueData {
        session_id: session.id.to_string(),
        queue_position: position,
    })
}

/// `GET /queue/position/:sessionId`
#[endpoint]
pub async fn queue_position(
    req: &mut Request,
    depot: &mut Depot,
) -> Result<Json<ApiEnvelope<crate::engine::QueuePosition>>, ApiError> {
    let engine = depot.engine();
    let raw_id = req
        .param::<String>("session_id")
        .ok_or_else(|| ApiError::BadRequest("missing session id".into()))?;
    let session_id = SessionId::from(raw_id);
    let position = engine
        .queue_position(&session_id)
        .ok_or(ApiError::SessionNotFound)?;
    Ok(ok_json(position))
}

#[derive(serde::Serialize, ToSchema)]
pub struct StatsData {
    #[serde(flatten)]
    pub stats: crate::engine::EngineStats,
    pub nodes: Vec<crate::engine::node::StreamNode>,
}

/// `GET /stats` — auth-gated in a real deployment via a pluggable hoop
/// (see `edge::root`); this handler only assembles the payload.
#[endpoint]
pub async fn stats(depot: &mut Depot) -> Json<ApiEnvelope<StatsData>> {
    let engine = depot.engine();
    ok_json(StatsData {
        stats: engine.stats(),
        nodes: engine.nodes_snapshot(),
    })
}
