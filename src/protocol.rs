//! Stream-Node Control Protocol — component 4.3.
//!
//! One long-lived TCP connection per node, one JSON object per line. The
//! framing is deliberately simple: [`tokio_util::codec::LinesCodec`] turns
//! the socket into a `Stream`/`Sink` of UTF-8 lines, and each line is decoded
//! as a single [`NodeMessage`]. This mirrors the line-delimited-JSON accept
//! loop idiom used across the corpus for small control-plane protocols,
//! adapted from the teacher's per-connection command-channel pattern
//! (`stream::stream_manager::connect_stream`) without the WebTransport/QUIC
//! machinery that pattern was built for — plain TCP is all this protocol
//! needs.

use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::Display;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::engine::Engine;
use crate::ids::NodeId;

/// Opaque handle correlating a TCP connection to the node it registered,
/// per the design note in spec §9: the engine never holds a reference to
/// a transport-layer object, only this integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(u64);

impl ConnHandle {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MessageKind {
    Connect,
    StreamerConnected,
    StreamerDisconnected,
    ClientConnected,
    ClientDisconnected,
    Ping,
}

/// The wire envelope. All fields besides `type` are optional — each message
/// kind only uses the ones relevant to it (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMessage {
    #[serde(rename = "type")]
    pub message_type: MessageKind,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub https: Option<bool>,
    pub ready: Option<bool>,
    #[serde(rename = "playerConnected")]
    pub player_connected: Option<bool>,
    #[serde(rename = "serverId")]
    pub server_id: Option<String>,
    #[serde(rename = "clientId")]
    pub client_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("first message was not `connect`")]
    ExpectedConnect,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LinesCodecError> for ProtocolError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::Io(e) => ProtocolError::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                ProtocolError::Malformed("line too long".into())
            }
        }
    }
}

/// Accepts node connections forever until `shutdown` fires. Each connection
/// runs on its own task so one slow/stalled node can't block the others.
pub async fn run_node_listener(
    listener: TcpListener,
    engine: Engine,
    shutdown: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("node control listener stopping");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let engine = engine.clone();
                        let conn_shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            let handle = ConnHandle::next();
                            tracing::info!(%peer, ?handle, "node connected");
                            if let Err(err) =
                                handle_node_connection(stream, engine, handle, conn_shutdown).await
                            {
                                tracing::warn!(%peer, ?handle, error = %err, "node connection closed with error");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to accept node connection");
                    }
                }
            }
        }
    }
}

/// Drives a single node connection: the first line must be `connect`;
/// anything else before that, or an unknown `type`, or malformed JSON,
/// closes the connection without mutating engine state (spec §4.3/§7).
async fn handle_node_connection(
    stream: TcpStream,
    engine: Engine,
    handle: ConnHandle,
    shutdown: tokio_util::sync::CancellationToken,
) -> Result<(), ProtocolError> {
    let mut framed = Framed::new(stream, LinesCodec::new());

    let node_id = loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = framed.next() => {
                let Some(line) = line else { return Ok(()) };
                let line = line?;
                let msg: NodeMessage = serde_json::from_str(&line)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                if msg.message_type != MessageKind::Connect {
                    return Err(ProtocolError::ExpectedConnect);
                }
                match engine.register_node(&msg) {
                    Some(id) => {
                        engine.drain_queue();
                        break id;
                    }
                    None => return Err(ProtocolError::Malformed("invalid connect message".into())),
                }
            }
        }
    };

    let result = drive_registered_connection(&mut framed, &engine, node_id, &shutdown).await;
    engine.unregister_node(node_id);
    tracing::info!(%node_id, ?handle, "node disconnected");
    result
}

async fn drive_registered_connection(
    framed: &mut Framed<TcpStream, LinesCodec>,
    engine: &Engine,
    node_id: NodeId,
    shutdown: &tokio_util::sync::CancellationToken,
) -> Result<(), ProtocolError> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            line = framed.next() => {
                let Some(line) = line else { return Ok(()) };
                let line = line?;
                let msg: NodeMessage = serde_json::from_str(&line)
                    .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                if msg.message_type == MessageKind::Connect {
                    // A second `connect` on an already-registered connection
                    // is not a recognized transition; treat as malformed.
                    return Err(ProtocolError::Malformed("unexpected second connect".into()));
                }
                engine.update_node(node_id, &msg);
                engine.drain_queue();
            }
        }
    }
}

/// Serializes a response line to send back to a node, if the protocol ever
/// needs server-to-node acks. Currently unused by any message kind but kept
/// as the single encode path so future kinds don't hand-roll their own.
#[allow(dead_code)]
pub async fn send_line<W>(sink: &mut W, value: &impl Serialize) -> Result<(), ProtocolError>
where
    W: futures::Sink<String, Error = LinesCodecError> + Unpin,
{
    let line = serde_json::to_string(value).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    sink.send(line).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_connect_envelope() {
        let raw = r#"{"type":"connect","address":"10.0.0.1","port":8080,"ready":true,"playerConnected":false}"#;
        let msg: NodeMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.message_type, MessageKind::Connect);
        assert_eq!(msg.address.as_deref(), Some("10.0.0.1"));
        assert_eq!(msg.port, Some(8080));
    }

    #[test]
    fn unknown_kind_fails_to_decode() {
        let raw = r#"{"type":"teleport"}"#;
        let result: Result<NodeMessage, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn conn_handles_are_unique() {
        assert_ne!(ConnHandle::next(), ConnHandle::next());
    }
}
