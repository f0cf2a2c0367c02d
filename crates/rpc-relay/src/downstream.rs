use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::call::{Call, CallResult};
use crate::line_target::LineTarget;
use crate::sim_rig::SimulatedRig;
use crate::wire::{response_result, RpcMessage};

/// A failure to talk to the downstream target, as opposed to a fault the
/// target answered with.
#[derive(Debug, thiserror::Error)]
pub enum DownstreamError {
    #[error("connection to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Protocol(String),

    #[error("connection closed by {0}")]
    Closed(String),
}

/// The single peer every dispatched call is delivered to.
///
/// Only the dispatcher task ever holds the target, so implementations get
/// `&mut self` and may keep a live connection between calls.
pub trait Downstream: Send + 'static {
    fn call(&mut self, call: &Call) -> impl Future<Output = Result<CallResult, DownstreamError>> + Send;

    /// Drop any connection state after a failure or an abandoned call.
    fn reset(&mut self) {}

    fn describe(&self) -> String;
}

// ---------------------------------------------------------------------------
// RpcTarget
// ---------------------------------------------------------------------------

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// RPC client for a downstream relay-protocol server at `ws://host:port`.
///
/// Connects lazily and reconnects on the next call after any error.
pub struct RpcTarget {
    url: String,
    stream: Option<WsStream>,
    next_id: u64,
}

impl RpcTarget {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_url(format!("ws://{host}:{port}"))
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: None,
            next_id: 0,
        }
    }

    async fn connected(&mut self) -> Result<&mut WsStream, DownstreamError> {
        if self.stream.is_none() {
            let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
            tracing::debug!(url = %self.url, "downstream connected");
            self.stream = Some(ws);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| DownstreamError::Closed(self.url.clone()))
    }

    async fn exchange(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let request = serde_json::to_string(&RpcMessage::request(id.clone(), call))
            .map_err(|e| DownstreamError::Protocol(e.to_string()))?;

        let url = self.url.clone();
        let ws = self.connected().await?;
        ws.send(Message::Text(request.into())).await?;

        while let Some(frame) = ws.next().await {
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => return Err(DownstreamError::Closed(url)),
                // Ping/pong are answered by tungstenite; binary is not ours.
                _ => continue,
            };
            match serde_json::from_str::<RpcMessage>(&text) {
                Ok(RpcMessage::Response {
                    id: reply_id,
                    result,
                    fault,
                }) if reply_id == id => return Ok(response_result(result, fault)),
                Ok(other) => {
                    tracing::debug!(?other, "ignoring unrelated downstream frame");
                }
                Err(err) => return Err(DownstreamError::Protocol(err.to_string())),
            }
        }
        Err(DownstreamError::Closed(url))
    }
}

impl Downstream for RpcTarget {
    async fn call(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        let outcome = self.exchange(call).await;
        if outcome.is_err() {
            self.reset();
        }
        outcome
    }

    fn reset(&mut self) {
        self.stream = None;
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// The downstream kinds selectable from configuration.
pub enum Target {
    Rpc(RpcTarget),
    Line(LineTarget),
    Simulated(SimulatedRig),
}

impl Downstream for Target {
    async fn call(&mut self, call: &Call) -> Result<CallResult, DownstreamError> {
        match self {
            Target::Rpc(t) => t.call(call).await,
            Target::Line(t) => t.call(call).await,
            Target::Simulated(t) => t.call(call).await,
        }
    }

    fn reset(&mut self) {
        match self {
            Target::Rpc(t) => t.reset(),
            Target::Line(t) => t.reset(),
            Target::Simulated(t) => t.reset(),
        }
    }

    fn describe(&self) -> String {
        match self {
            Target::Rpc(t) => t.describe(),
            Target::Line(t) => t.describe(),
            Target::Simulated(t) => t.describe(),
        }
    }
}
