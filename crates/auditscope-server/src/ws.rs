use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use auditscope_types::ServerMessage;

use crate::session::{SessionContext, TailSession};

/// Default maximum number of concurrent viewer connections
pub const DEFAULT_MAX_CONNECTIONS: usize = 64;

/// Client frames queued ahead of the session
const INBOUND_BUFFER: usize = 32;

/// Server messages queued ahead of the socket writer
const OUTBOUND_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// WsServer
// ---------------------------------------------------------------------------

/// WebSocket front end: one [`TailSession`] per accepted connection
pub struct WsServer {
    addr: SocketAddr,
    context: SessionContext,
    cancel: CancellationToken,
    max_connections: usize,
    next_session: AtomicU64,
}

impl WsServer {
    pub fn new(addr: SocketAddr, context: SessionContext, cancel: CancellationToken) -> Self {
        Self {
            addr,
            context,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            next_session: AtomicU64::new(1),
        }
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Bind to the configured address and return the actual local address.
    /// Binding port 0 yields an OS-assigned port.
    pub async fn bind(&self) -> std::io::Result<(TcpListener, SocketAddr)> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server listening");
        Ok((listener, local_addr))
    }

    /// Run the accept loop on a pre-bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                        tracing::warn!(peer = %peer, max = self.max_connections, "ws: connection limit reached, rejecting");
                        drop(stream);
                        continue;
                    };

                    let id = self.next_session.fetch_add(1, Ordering::Relaxed);
                    let context = self.context.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        match tokio_tungstenite::accept_async(stream).await {
                            Ok(ws_stream) => {
                                tracing::debug!(peer = %peer, session = id, "ws client connected");
                                if let Err(e) = handle_client(ws_stream, id, context, cancel).await {
                                    tracing::debug!(peer = %peer, session = id, error = %e, "ws client finished with error");
                                }
                            }
                            Err(e) => {
                                tracing::debug!(peer = %peer, error = %e, "ws handshake failed");
                            }
                        }
                    });
                }
                _ = self.cancel.cancelled() => {
                    tracing::info!("ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-client handler
// ---------------------------------------------------------------------------

async fn handle_client(
    ws_stream: WebSocketStream<TcpStream>,
    id: u64,
    context: SessionContext,
    cancel: CancellationToken,
) -> Result<(), tungstenite::Error> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (frame_tx, frame_rx) = mpsc::channel::<String>(INBOUND_BUFFER);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let session = tokio::spawn(TailSession::new(id, context, outbound_tx).run(frame_rx));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(session = id, error = %e, "failed to serialize server message");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!(session = id, "ws send failed, client disconnected");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let result = loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if frame_tx.send(text.as_str().to_owned()).await.is_err() {
                        break Ok(());
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::debug!(session = id, "ws client disconnected");
                    break Ok(());
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!(session = id, "ignoring binary frame");
                }
                // Pings are answered by tungstenite itself
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e),
            },
            _ = cancel.cancelled() => break Ok(()),
        }
    };

    // Closing the inbound side ends the session, which drops its sender and
    // lets the writer drain and close the socket.
    drop(frame_tx);
    if let Err(e) = session.await {
        tracing::error!(session = id, error = %e, "session task failed");
    }
    let _ = writer.await;

    result
}
