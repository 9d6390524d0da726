//! Per-client WebSocket task
//!
//! Performs the handshake on the session path, registers the client, then
//! shuttles queued outbound messages to the socket and inbound messages to the
//! session until either side closes. The client is unregistered before the
//! socket (and its drain guard) is dropped.

use crate::listener::AcceptedConnection;
use crate::registry::{ClientHandle, ClientId, ConnectionRegistry};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use shared::SESSION_PATH;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Frames a client may have queued before broadcasts to it start dropping
pub const OUTBOUND_QUEUE: usize = 64;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

fn check_session_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == SESSION_PATH {
        Ok(response)
    } else {
        let mut rejection = ErrorResponse::new(Some(format!(
            "no WebSocket endpoint at {}",
            request.uri().path()
        )));
        *rejection.status_mut() = StatusCode::NOT_FOUND;
        Err(rejection)
    }
}

/// Serves one accepted socket until it closes or the session shuts down
pub async fn serve(
    connection: AcceptedConnection,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
) {
    let (stream, peer, _guard) = connection.into_parts();

    let handshake = tokio_tungstenite::accept_hdr_async(stream, check_session_path);
    let websocket = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake) => match result {
            Ok(Ok(websocket)) => websocket,
            Ok(Err(e)) => {
                debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
            Err(_) => {
                debug!("WebSocket handshake with {} timed out", peer);
                return;
            }
        },
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let cancel = shutdown.child_token();
    let id = registry
        .register(ClientHandle::new(peer, outbound_tx, cancel.clone()))
        .await;

    let (mut sink, mut inbound) = websocket.split();

    loop {
        tokio::select! {
            biased;

            outbound = outbound_rx.recv() => match outbound {
                Some(Message::Close(frame)) => {
                    let _ = sink.send(Message::Close(frame)).await;
                    break;
                }
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!("Failed to send to client {}: {}", id, e);
                        break;
                    }
                }
                None => break,
            },

            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }

            message = inbound.next() => match message {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(message)) => on_message(&registry, id, message).await,
                Some(Err(e)) => {
                    debug!("Connection to client {} failed: {}", id, e);
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
    registry.unregister(id).await;
}

async fn on_message(registry: &ConnectionRegistry, id: ClientId, message: Message) {
    registry.touch(id).await;
    match message {
        // EXAMPLE: clients have nothing to say yet
        Message::Text(text) => debug!("Client {} sent {} bytes of text", id, text.len()),
        Message::Binary(data) => debug!("Client {} sent {} bytes", id, data.len()),
        Message::Ping(_) | Message::Pong(_) => {}
        Message::Frame(_) => warn!("Unexpected raw frame from client {}", id),
        Message::Close(_) => {}
    }
}
