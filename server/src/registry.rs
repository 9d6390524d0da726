//! Connection registry for one session
//!
//! Tracks every client whose WebSocket is open, keyed by an ID that is unique
//! and increasing for the lifetime of the owning session. Broadcasts iterate a
//! snapshot of the registry, so clients may come and go while a tick is being
//! delivered.

use crate::error::ConnectionError;
use log::{info, warn};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

pub type ClientId = u64;

/// Outbound side of a client connection
///
/// Messages are queued for the connection's own task, which owns the socket.
/// Queuing never waits, so one slow client cannot hold up anyone else.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Remote address of the client
    pub peer: SocketAddr,
    /// Queue drained by the connection task
    outbound: mpsc::Sender<Message>,
    /// Cuts the connection without waiting for queue space
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(peer: SocketAddr, outbound: mpsc::Sender<Message>, cancel: CancellationToken) -> Self {
        Self {
            peer,
            outbound,
            cancel,
        }
    }

    /// Queues a message; returns false if the queue is full or the socket gone.
    pub fn send(&self, message: Message) -> bool {
        self.outbound.try_send(message).is_ok()
    }

    /// Asks the connection task to send a close frame and shut down
    ///
    /// If the outbound queue is full the connection is cut without a close
    /// frame. Fails only when the connection task has already exited.
    pub fn close(&self, id: ClientId) -> Result<(), ConnectionError> {
        let frame = CloseFrame {
            code: CloseCode::Away,
            reason: "session released".into(),
        };
        match self.outbound.try_send(Message::Close(Some(frame))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.cancel.cancel();
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ConnectionError::Closed {
                id,
                peer: self.peer,
            }),
        }
    }
}

/// A registered client and its last-known liveness
#[derive(Debug)]
pub struct ClientConnection {
    /// Registry-assigned ID, unique within the session
    pub id: ClientId,
    /// Outbound side of the connection
    pub handle: ClientHandle,
    /// When the handshake completed
    pub connected_at: Instant,
    /// Last time the client sent anything
    pub last_seen: Instant,
}

impl ClientConnection {
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Outcome of force-closing every registered client
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    /// Clients asked to close
    pub closed: usize,
    /// Clients whose connection task was already gone
    pub failed: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    /// ID handed to the next registered client
    next_id: ClientId,
    /// Open connections in ID order
    clients: BTreeMap<ClientId, ClientConnection>,
}

/// Shared, cloneable view of a session's connected clients
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns the next unused ID to the client and inserts it
    pub async fn register(&self, handle: ClientHandle) -> ClientId {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;

        let now = Instant::now();
        info!("Client {} connected from {}", id, handle.peer);
        inner.clients.insert(
            id,
            ClientConnection {
                id,
                handle,
                connected_at: now,
                last_seen: now,
            },
        );
        id
    }

    /// Removes the client if present and hands back its record
    pub async fn unregister(&self, id: ClientId) -> Option<ClientConnection> {
        let removed = self.inner.write().await.clients.remove(&id);
        if let Some(client) = &removed {
            info!(
                "Client {} disconnected after {:.1}s (idle {:.1}s)",
                id,
                client.connected_at.elapsed().as_secs_f32(),
                client.idle_for().as_secs_f32()
            );
        }
        removed
    }

    /// Refreshes the client's liveness after inbound traffic
    pub async fn touch(&self, id: ClientId) {
        if let Some(client) = self.inner.write().await.clients.get_mut(&id) {
            client.last_seen = Instant::now();
        }
    }

    /// Applies `f` to every client registered at the time of the call
    ///
    /// Clients are visited in ID order. The lock is released before `f` runs,
    /// so `f` observes a snapshot and concurrent removals are harmless.
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(ClientId, &ClientHandle),
    {
        let snapshot: Vec<(ClientId, ClientHandle)> = {
            let inner = self.inner.read().await;
            inner
                .clients
                .iter()
                .map(|(id, client)| (*id, client.handle.clone()))
                .collect()
        };

        for (id, handle) in &snapshot {
            f(*id, handle);
        }
    }

    /// Removes every client and asks each one to close
    ///
    /// Each close is attempted independently; failures are logged and counted
    /// but never stop the remaining closes.
    pub async fn close_all(&self) -> CloseReport {
        let drained = std::mem::take(&mut self.inner.write().await.clients);

        let mut report = CloseReport::default();
        for (id, client) in drained {
            match client.handle.close(id) {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    warn!("Failed to close client {}: {}", id, e);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub async fn ids(&self) -> Vec<ClientId> {
        self.inner.read().await.clients.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.clients.is_empty()
    }
}
