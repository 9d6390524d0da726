//! The session server: one service instance behind the session listener
//!
//! Accepted sockets are upgraded on the session path and registered; a tick
//! loop broadcasts the game state to every registered client. Releasing stops
//! the tick loop first, then closes every client, so no tick ever runs against
//! a draining registry.

use crate::broadcaster::{TickBroadcaster, Ticker};
use crate::connection;
use crate::error::ServiceError;
use crate::listener::Incoming;
use crate::registry::ConnectionRegistry;
use crate::service::{ServiceContext, SessionService};
use async_trait::async_trait;
use log::{info, warn};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How long `release()` waits for connection tasks to wind down
const RELEASE_GRACE: Duration = Duration::from_millis(500);

/// Session server bound to one listener
pub struct SessionServer {
    /// Address of the listener this session was built for
    local_addr: SocketAddr,
    /// Time between two ticks
    tick_interval: Duration,
    /// Accepted sockets, until `start()` hands them to the dispatcher
    incoming: Option<Incoming>,
    /// Clients with an open WebSocket
    registry: ConnectionRegistry,
    /// Cancels every connection task of this session
    shutdown: CancellationToken,
    /// Connection tasks, so release can wait for them
    connections: TaskTracker,
    /// Task turning accepted sockets into connection tasks
    dispatcher: Option<JoinHandle<()>>,
    /// Running tick loop
    broadcaster: Option<TickBroadcaster>,
    /// Set by the first `start()`
    started: bool,
}

impl SessionServer {
    pub fn new(context: ServiceContext, tick_interval: Duration) -> Self {
        Self {
            local_addr: context.local_addr,
            tick_interval,
            incoming: Some(context.incoming),
            registry: ConnectionRegistry::new(),
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
            dispatcher: None,
            broadcaster: None,
            started: false,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl SessionService for SessionServer {
    async fn start(&mut self) -> Result<(), ServiceError> {
        if self.started {
            return Err(ServiceError::AlreadyStarted);
        }
        let incoming = self.incoming.take().ok_or(ServiceError::AlreadyStarted)?;
        self.started = true;

        self.dispatcher = Some(tokio::spawn(dispatch(
            incoming,
            self.registry.clone(),
            self.shutdown.clone(),
            self.connections.clone(),
        )));

        // EXAMPLE: start processing game state
        self.broadcaster = Some(TickBroadcaster::spawn(
            Ticker::new(self.registry.clone()),
            self.tick_interval,
        ));

        info!("Session started on {}", self.local_addr);
        Ok(())
    }

    async fn release(&mut self) -> Result<(), ServiceError> {
        let mut result = Ok(());

        // EXAMPLE: stop processing game state
        if let Some(broadcaster) = self.broadcaster.take() {
            match broadcaster.stop().await {
                Ok(ticker) => info!("Session stopped at tick {}", ticker.state().current_tick),
                Err(source) => result = Err(ServiceError::Task { task: "tick", source }),
            }
        }

        // Nothing new may register once the close sweep starts
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
            let _ = dispatcher.await;
        }
        self.incoming = None;

        // Close every client so the listener can drain
        let report = self.registry.close_all().await;
        if report.failed > 0 {
            warn!(
                "Closed {} clients, {} were already gone",
                report.closed, report.failed
            );
        }

        self.shutdown.cancel();
        self.connections.close();
        if tokio::time::timeout(RELEASE_GRACE, self.connections.wait())
            .await
            .is_err()
        {
            warn!(
                "{} connection tasks still running after release",
                self.connections.len()
            );
        }

        result
    }
}

async fn dispatch(
    mut incoming: Incoming,
    registry: ConnectionRegistry,
    shutdown: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = incoming.recv() => match accepted {
                Some(accepted) => {
                    connections.spawn(connection::serve(
                        accepted,
                        registry.clone(),
                        shutdown.clone(),
                    ));
                }
                None => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerHandle;
    use futures::StreamExt;
    use shared::GameState;
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_err, assert_ok};
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    async fn open_session() -> (ListenerHandle, SessionServer) {
        let (listener, incoming) = ListenerHandle::open("127.0.0.1", 0).await.unwrap();
        let context = ServiceContext {
            incoming,
            local_addr: listener.local_addr(),
        };
        (listener, SessionServer::new(context, Duration::from_millis(10)))
    }

    async fn wait_for_clients(session: &SessionServer, count: usize) {
        for _ in 0..200 {
            if session.registry().len().await == count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("session never reached {} clients", count);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (_listener, mut session) = open_session().await;
        assert_ok!(session.start().await);
        assert!(matches!(
            session.start().await,
            Err(ServiceError::AlreadyStarted)
        ));
        assert_ok!(session.release().await);
    }

    #[tokio::test]
    async fn test_release_without_start_lets_listener_close() {
        let (mut listener, mut session) = open_session().await;
        let _client = tokio::net::TcpStream::connect(listener.local_addr())
            .await
            .unwrap();
        sleep(Duration::from_millis(20)).await;

        assert_ok!(session.release().await);
        assert_ok!(timeout(Duration::from_secs(1), listener.close()).await);
    }

    #[tokio::test]
    async fn test_clients_receive_ticks() {
        let (listener, mut session) = open_session().await;
        session.start().await.unwrap();

        let url = format!("ws://{}/join", listener.local_addr());
        let (mut a, _) = connect_async(&url).await.unwrap();
        let (mut b, _) = connect_async(&url).await.unwrap();
        wait_for_clients(&session, 2).await;

        for client in [&mut a, &mut b] {
            let message = timeout(Duration::from_secs(1), client.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let state = GameState::deserialize(message.to_text().unwrap()).unwrap();
            assert!(state.current_tick >= 1);
        }

        session.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_closes_clients_and_empties_registry() {
        let (mut listener, mut session) = open_session().await;
        session.start().await.unwrap();

        let url = format!("ws://{}/join", listener.local_addr());
        let (mut client, _) = connect_async(&url).await.unwrap();
        wait_for_clients(&session, 1).await;

        assert_ok!(session.release().await);
        assert!(session.registry().is_empty().await);

        // Drain ticks until the close frame or end of stream
        let closed = timeout(Duration::from_secs(1), async {
            while let Some(message) = client.next().await {
                match message {
                    Ok(Message::Close(_)) | Err(_) => return true,
                    Ok(_) => continue,
                }
            }
            true
        })
        .await;
        assert_ok!(closed);
        drop(client);

        assert_ok!(timeout(Duration::from_secs(1), listener.close()).await);
    }

    #[tokio::test]
    async fn test_ids_restart_with_each_session() {
        let (listener, mut first) = open_session().await;
        first.start().await.unwrap();
        let url = format!("ws://{}/join", listener.local_addr());
        let (_client, _) = connect_async(&url).await.unwrap();
        wait_for_clients(&first, 1).await;
        assert_eq!(first.registry().ids().await, vec![0]);
        first.release().await.unwrap();

        let (listener, mut second) = open_session().await;
        second.start().await.unwrap();
        let url = format!("ws://{}/join", listener.local_addr());
        let (_client, _) = connect_async(&url).await.unwrap();
        wait_for_clients(&second, 1).await;
        assert_eq!(second.registry().ids().await, vec![0]);
        second.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_connections_after_release() {
        let (listener, mut session) = open_session().await;
        session.start().await.unwrap();
        session.release().await.unwrap();

        let url = format!("ws://{}/join", listener.local_addr());
        let attempt = timeout(Duration::from_millis(500), connect_async(&url)).await;
        // Either the handshake fails or it never completes
        if let Ok(result) = attempt {
            assert_err!(result);
        }
        assert!(session.registry().is_empty().await);
    }
}
