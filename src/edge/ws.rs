//! WebSocket edge — the push-based counterpart to the HTTP API, spec §6.
//!
//! One task per connection. Incoming frames drive the same `Engine`
//! operations the HTTP handlers call; outgoing frames are either a direct
//! reply to a client message or a translation of a [`NotificationBus`] event
//! that matches the connection's session.

use futures::{SinkExt, StreamExt};
use salvo::websocket::{Message, WebSocket, WebSocketUpgrade};
use serde::{Deserialize, Serialize};

use crate::bus::Event;
use crate::engine::Engine;
use crate::ids::SessionId;
use crate::prelude::*;
use crate::utils::limiter::DepotEngineExt;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientEvent {
    #[serde(rename = "joinQueue")]
    JoinQueue {
        #[serde(rename = "clientId")]
        client_id: Option<String>,
        #[serde(default)]
        priority: i64,
    },
    #[serde(rename = "getQueueStatus")]
    GetQueueStatus {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "updateActivity")]
    UpdateActivity {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ServerEvent {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "queueJoined")]
    QueueJoined {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "queuePosition")]
        queue_position: usize,
    },
    #[serde(rename = "queueStatus")]
    QueueStatus {
        #[serde(rename = "sessionId")]
        session_id: String,
        position: usize,
        #[serde(rename = "totalInQueue")]
        total_in_queue: usize,
        #[serde(rename = "etaMs")]
        eta_ms: u64,
    },
    #[serde(rename = "queueUpdate")]
    QueueUpdate {
        #[serde(rename = "sessionId")]
        session_id: String,
        position: usize,
    },
    #[serde(rename = "serverAssigned")]
    ServerAssigned {
        #[serde(rename = "signallingServer")]
        signalling_server: String,
        protocol: String,
        #[serde(rename = "serverId")]
        server_id: Option<String>,
    },
    #[serde(rename = "activityUpdated")]
    ActivityUpdated {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "sessionExpired")]
    SessionExpired {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "serverShutdown")]
    ServerShutdown,
}

/// `GET /ws` upgrade target.
#[handler]
pub async fn upgrade(req: &mut Request, depot: &mut Depot, res: &mut Response) -> Result<(), StatusError> {
    let engine = depot.engine().clone();
    WebSocketUpgrade::new()
        .upgrade(req, res, move |socket| handle_socket(socket, engine))
        .await
}

async fn handle_socket(socket: WebSocket, engine: Engine) {
    let (mut tx, mut rx) = socket.split();
    let mut bus = engine.subscribe();
    let shutdown = engine.shutdown_token();
    let mut owned_session: Option<SessionId> = None;
    let mut last_known_position: Option<usize> = None;

    if send(&mut tx, &ServerEvent::Connected).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = send(&mut tx, &ServerEvent::ServerShutdown).await;
                break;
            }
            frame = rx.next() => {
                let Some(frame) = frame else { break };
                let Ok(frame) = frame else { break };
                if frame.is_close() {
                    break;
                }
                let Some(text) = frame.to_str().ok() else { continue };
                handle_client_event(text, &engine, &mut owned_session, &mut last_known_position, &mut tx).await;
            }
            event = bus.recv() => {
                match event {
                    Ok(event) => {
                        handle_bus_event(event, &owned_session, &mut tx).await;
                        notify_if_position_changed(&engine, &owned_session, &mut last_known_position, &mut tx).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    if let Some(session_id) = owned_session {
        tracing::debug!(%session_id, "ws connection closed");
    }
}

async fn handle_client_event(
    text: &str,
    engine: &Engine,
    owned_session: &mut Option<SessionId>,
    last_known_position: &mut Option<usize>,
    tx: &mut (impl SinkExt<Message, Error = impl std::fmt::Debug> + Unpin),
) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(err) => {
            let _ = send(tx, &ServerEvent::Error { message: err.to_string() }).await;
            return;
        }
    };

    match event {
        ClientEvent::JoinQueue { client_id, priority } => {
            let session = engine.enqueue(client_id, priority);
            *owned_session = Some(session.id.clone());
            let position = engine.queue_position(&session.id).map(|p| p.position).unwrap_or(0);
            *last_known_position = Some(position);
            let _ = send(
                tx,
                &ServerEvent::QueueJoined {
                    session_id: session.id.to_string(),
                    queue_position: position,
                },
            )
            .await;
            engine.drain_queue();
        }
        ClientEvent::GetQueueStatus { session_id } => {
            let session_id = SessionId::from(session_id);
            match engine.queue_position(&session_id) {
                Some(pos) => {
                    let _ = send(
                        tx,
                        &ServerEvent::QueueStatus {
                            session_id: session_id.to_string(),
                            position: pos.position,
                            total_in_queue: pos.total_in_queue,
                            eta_ms: pos.eta_ms,
                        },
                    )
                    .await;
                }
                None => {
                    let _ = send(tx, &ServerEvent::Error { message: "session not found".into() }).await;
                }
            }
        }
        ClientEvent::UpdateActivity { session_id } => {
            let session_id = SessionId::from(session_id);
            if engine.update_session_activity(&session_id) {
                let _ = send(
                    tx,
                    &ServerEvent::ActivityUpdated { session_id: session_id.to_string() },
                )
                .await;
            } else {
                let _ = send(tx, &ServerEvent::Error { message: "session not found".into() }).await;
            }
        }
        ClientEvent::Ping => {
            let _ = send(tx, &ServerEvent::Pong).await;
        }
    }
}

async fn handle_bus_event(
    event: Event,
    owned_session: &Option<SessionId>,
    tx: &mut (impl SinkExt<Message, Error = impl std::fmt::Debug> + Unpin),
) {
    let Some(owned) = owned_session else { return };

    match event {
        Event::SessionAssigned { session, node } if &session.id == owned => {
            let _ = send(
                tx,
                &ServerEvent::ServerAssigned {
                    signalling_server: node.endpoint(),
                    protocol: if node.secure { "wss".into() } else { "ws".into() },
                    server_id: node.server_id,
                },
            )
            .await;
        }
        Event::SessionRemoved { session_id } if &session_id == owned => {
            let _ = send(
                tx,
                &ServerEvent::SessionExpired { session_id: session_id.to_string() },
            )
            .await;
        }
        _ => {}
    }
}

/// Every bus event might have reshuffled the queue (a node freed up, another
/// session was dequeued ahead of us); re-check our own position and push
/// `queueUpdate` only when it actually moved.
async fn notify_if_position_changed(
    engine: &Engine,
    owned_session: &Option<SessionId>,
    last_known_position: &mut Option<usize>,
    tx: &mut (impl SinkExt<Message, Error = impl std::fmt::Debug> + Unpin),
) {
    let Some(session_id) = owned_session else { return };
    let Some(pos) = engine.queue_position(session_id) else {
        *last_known_position = None;
        return;
    };
    if *last_known_position != Some(pos.position) {
        *last_known_position = Some(pos.position);
        let _ = send(
            tx,
            &ServerEvent::QueueUpdate { session_id: session_id.to_string(), position: pos.position },
        )
        .await;
    }
}

async fn send(
    tx: &mut (impl SinkExt<Message, Error = impl std::fmt::Debug> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|_| ())?;
    tx.send(Message::text(text)).await.map_err(|_| ())
}
