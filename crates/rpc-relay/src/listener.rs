use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;

use crate::call::{Call, CallResult};
use crate::frontend::ProxyFrontend;
use crate::wire::RpcMessage;

/// The WebSocket listener callers connect to.
///
/// Each connection is served by its own task, and each request on a
/// connection is handled in its own task, so one slow call never holds up
/// another caller's routing or hooks. Responses are written back as they
/// complete, tagged with the request id.
pub struct RelayServer {
    listener: TcpListener,
    frontend: Arc<ProxyFrontend>,
}

impl RelayServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, frontend: Arc<ProxyFrontend>) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind relay listener on {addr}"))?;
        Ok(Self { listener, frontend })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until a shutdown signal arrives.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "relay listening");

        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("relay listener stopping");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::warn!(%err, "accept failed");
                        continue;
                    }
                },
            };

            let frontend = Arc::clone(&self.frontend);
            tokio::spawn(async move {
                if let Err(err) = handle_connection(stream, remote_addr, frontend).await {
                    tracing::warn!(%remote_addr, %err, "connection handler error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    frontend: Arc<ProxyFrontend>,
) -> anyhow::Result<()> {
    let connection_id = uuid::Uuid::new_v4();
    let ws = tokio_tungstenite::accept_async(stream).await?;
    tracing::info!(%connection_id, %remote_addr, "caller connected");

    let (mut write, mut read) = ws.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<RpcMessage>();

    let writer = tokio::spawn(async move {
        while let Some(reply) = reply_rx.recv().await {
            let text = match serde_json::to_string(&reply) {
                Ok(text) => text,
                Err(err) => {
                    tracing::error!(%err, "failed to serialize response");
                    continue;
                }
            };
            if write.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = write.close().await;
    });

    while let Some(frame) = read.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                tracing::debug!(%connection_id, %err, "read error, closing connection");
                break;
            }
        };

        let (id, call) = match serde_json::from_str::<RpcMessage>(&text) {
            Ok(RpcMessage::Request { id, method, params }) => (id, Call::new(method, params)),
            Ok(RpcMessage::Response { id, .. }) => {
                let fault = CallResult::relay_fault("expected a request");
                let _ = reply_tx.send(RpcMessage::response(id, fault));
                continue;
            }
            Err(err) => {
                tracing::debug!(%connection_id, %err, "malformed request frame");
                let fault = CallResult::relay_fault(format!("malformed request: {err}"));
                let _ = reply_tx.send(RpcMessage::response(String::new(), fault));
                continue;
            }
        };

        let frontend = Arc::clone(&frontend);
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            let result = frontend.handle(call).await;
            // The caller may have disconnected while the call was queued.
            let _ = reply_tx.send(RpcMessage::response(id, result));
        });
    }

    // Outstanding request tasks hold their own senders; the writer stops
    // once the last of them has replied.
    drop(reply_tx);
    if let Err(err) = writer.await {
        tracing::debug!(%connection_id, %err, "writer task ended");
    }

    tracing::info!(%connection_id, %remote_addr, "caller disconnected");
    Ok(())
}
