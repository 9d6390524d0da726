//! Session listener management
//!
//! A [`ListenerHandle`] owns the TCP socket bound to the session address and a
//! background accept task. Accepted sockets are handed to whichever session is
//! bound to the listener through the [`Incoming`] channel; each one carries a
//! [`DrainGuard`] so that [`ListenerHandle::close`] can wait until every
//! accepted connection has been dropped by its owner. The listener itself never
//! closes a connection.

use crate::error::ListenerError;
use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Accepted sockets waiting to be picked up by the bound session
pub type Incoming = mpsc::UnboundedReceiver<AcceptedConnection>;

/// Keeps the owning listener from reporting closed while alive
#[derive(Debug)]
pub struct DrainGuard {
    /// Dropping the last clone resolves the listener's drain
    _drain: mpsc::Sender<()>,
}

/// A socket accepted by the listener, not yet upgraded to a WebSocket
#[derive(Debug)]
pub struct AcceptedConnection {
    /// Raw socket, before any handshake
    pub stream: TcpStream,
    /// Remote address
    pub peer: SocketAddr,
    /// Held for as long as the socket is open
    guard: DrainGuard,
}

impl AcceptedConnection {
    /// Splits off the guard; it must live as long as the socket does.
    pub fn into_parts(self) -> (TcpStream, SocketAddr, DrainGuard) {
        (self.stream, self.peer, self.guard)
    }
}

/// Owns the session socket for one (host, port) pair
pub struct ListenerHandle {
    /// Address actually bound, with the OS-assigned port resolved
    local_addr: SocketAddr,
    /// Stops the accept task
    cancel: CancellationToken,
    /// Accept task, until the first `close()` takes it
    accept_task: Option<JoinHandle<()>>,
    /// Ends once every [`DrainGuard`] is gone
    drained: Option<mpsc::Receiver<()>>,
    /// Drain completion shared by every `close()` caller
    closing: Option<Shared<BoxFuture<'static, ()>>>,
}

impl ListenerHandle {
    /// Binds `host:port` and starts accepting connections
    ///
    /// Returns the handle together with the channel of accepted sockets. Bind
    /// failures are classified so callers can tell an occupied port from a
    /// privileged one.
    pub async fn open(host: &str, port: u16) -> Result<(Self, Incoming), ListenerError> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ListenerError::from_bind(addr.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind { addr, source })?;

        let (drain_tx, drain_rx) = mpsc::channel(1);
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            incoming_tx,
            drain_tx,
            cancel.clone(),
        ));

        debug!("Listener bound to {}", local_addr);

        let handle = ListenerHandle {
            local_addr,
            cancel,
            accept_task: Some(accept_task),
            drained: Some(drain_rx),
            closing: None,
        };
        Ok((handle, incoming_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops accepting and returns a future that resolves once drained
    ///
    /// New connections stop arriving as soon as this is called. The returned
    /// future completes after the socket has been dropped and every accepted
    /// connection's [`DrainGuard`] is gone. Calling this again returns a future
    /// for the same drain, so every caller sees the close complete together.
    pub fn close(&mut self) -> impl Future<Output = ()> + Send + 'static {
        self.cancel.cancel();

        if let Some(closing) = &self.closing {
            return closing.clone();
        }

        let accept_task = self.accept_task.take();
        let drained = self.drained.take();
        let addr = self.local_addr;

        let closing = async move {
            if let Some(task) = accept_task {
                if let Err(e) = task.await {
                    warn!("Accept task for {} ended abnormally: {}", addr, e);
                }
            }
            if let Some(mut drained) = drained {
                // Resolves with None once the last guard is dropped
                while drained.recv().await.is_some() {}
                info!("Listener on {} closed", addr);
            }
        }
        .boxed()
        .shared();

        self.closing = Some(closing.clone());
        closing
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    incoming: mpsc::UnboundedSender<AcceptedConnection>,
    drain: mpsc::Sender<()>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let connection = AcceptedConnection {
                        stream,
                        peer,
                        guard: DrainGuard { _drain: drain.clone() },
                    };
                    if incoming.send(connection).is_err() {
                        debug!("No session bound, dropping connection from {}", peer);
                    }
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            },
        }
    }
}
