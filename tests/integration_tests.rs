//! Integration tests for the session server and its live swapping
//!
//! These tests run real sessions on loopback sockets and talk to them through
//! real WebSocket clients.

use client::network::SessionFeed;
use futures::StreamExt;
use server::orchestrator::{ReloadEvent, SwapOrchestrator, SwapPhase};
use server::service::SessionServerLoader;
use shared::{GameState, SESSION_PATH};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};
use tokio_test::assert_ok;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const TICK: Duration = Duration::from_millis(5);

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Tests that a joined client receives the tick counter climbing
    #[tokio::test]
    async fn joined_client_receives_ticks() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();

        let mut ws = join(addr).await;
        let first = next_tick(&mut ws).await.unwrap();
        let second = next_tick(&mut ws).await.unwrap();
        let third = next_tick(&mut ws).await.unwrap();
        assert!(first < second && second < third);

        assert_ok!(orchestrator.shutdown().await);
    }

    /// Tests that only `/join` upgrades
    #[tokio::test]
    async fn other_paths_are_not_found() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();

        match connect_async(format!("ws://{}/lobby", addr)).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status(), 404),
            Err(e) => panic!("expected a 404 rejection, got {}", e),
            Ok(_) => panic!("upgrade on /lobby should be rejected"),
        }

        assert_ok!(orchestrator.shutdown().await);
    }

    /// Tests that shutdown closes clients and frees the port
    #[tokio::test]
    async fn shutdown_disconnects_clients() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();
        let mut ws = join(addr).await;
        assert!(next_tick(&mut ws).await.is_some());

        assert_ok!(orchestrator.shutdown().await);
        assert_eq!(orchestrator.phase(), SwapPhase::Idle);
        assert!(ends_soon(&mut ws).await);
        assert!(tokio::net::TcpListener::bind(addr).await.is_ok());
    }
}

/// LIVE SWAP TESTS
mod swap_tests {
    use super::*;

    /// Tests a full reload: old client dropped, same port reopened, fresh state
    #[tokio::test]
    async fn reload_swaps_session_on_same_port() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();

        let mut old = join(addr).await;
        loop {
            let tick = next_tick(&mut old).await.unwrap();
            if tick >= 100 {
                break;
            }
        }

        assert_ok!(orchestrator.handle(ReloadEvent::succeeded()).await);
        assert_eq!(orchestrator.phase(), SwapPhase::Live);
        assert_eq!(orchestrator.local_addr(), Some(addr));
        assert!(ends_soon(&mut old).await);

        let mut new = join(addr).await;
        let first = next_tick(&mut new).await.unwrap();
        assert!(first < 50, "state carried over: tick {}", first);

        assert_ok!(orchestrator.shutdown().await);
    }

    /// Tests that a failed build leaves the running session alone
    #[tokio::test]
    async fn failed_build_keeps_session() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();
        let mut ws = join(addr).await;
        let before = next_tick(&mut ws).await.unwrap();

        assert_ok!(orchestrator.handle(ReloadEvent::failed()).await);
        assert_eq!(orchestrator.phase(), SwapPhase::Live);

        let after = next_tick(&mut ws).await.unwrap();
        assert!(after > before);

        assert_ok!(orchestrator.shutdown().await);
    }

    /// Tests the event loop: builds drive reloads, closing the channel shuts down
    #[tokio::test]
    async fn event_loop_reloads_until_channel_closes() {
        let port = free_port();
        let orchestrator =
            SwapOrchestrator::new("127.0.0.1", port, SessionServerLoader::new(TICK));
        let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

        let (events, events_rx) = tokio::sync::mpsc::channel(4);
        let (fatal_tx, fatal_rx) = tokio::sync::oneshot::channel();
        let running = tokio::spawn(orchestrator.run(events_rx, fatal_tx));

        events.send(ReloadEvent::succeeded()).await.unwrap();
        let mut ws = join_when_ready(addr).await;
        assert!(next_tick(&mut ws).await.is_some());

        drop(events);
        timeout(Duration::from_secs(3), running).await.unwrap().unwrap();
        assert!(ends_soon(&mut ws).await);

        // Clean shutdown reports nothing fatal
        assert!(fatal_rx.await.is_err());
    }

    /// Tests that a reconnecting client feed follows the session across a reload
    #[tokio::test]
    async fn client_feed_follows_reload() {
        let mut orchestrator = live_orchestrator().await;
        let addr = orchestrator.local_addr().unwrap();

        let feed = SessionFeed::new();
        let runner = tokio::spawn(feed.clone().run(format!("ws://{}{}", addr, SESSION_PATH)));

        wait_for_state(&feed, |state| state.current_tick >= 60).await;

        assert_ok!(orchestrator.handle(ReloadEvent::succeeded()).await);

        wait_for_state(&feed, |state| state.current_tick < 60).await;
        wait_for_state(&feed, |state| state.current_tick > 0).await;

        runner.abort();
        assert_ok!(orchestrator.shutdown().await);
    }
}

/// COMPILED LIBRARY TESTS
mod library_tests {
    use super::*;
    use server::library::LibraryLoader;

    /// Tests reloading from the server's own cdylib: each load is a fresh session
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reload_from_compiled_library() {
        let Some(artifact) = built_session_library() else {
            eprintln!("No session library next to the test binary, skipping");
            return;
        };
        let staging = tempfile::tempdir().unwrap();
        let loader = LibraryLoader::new(artifact, TICK).with_staging_dir(staging.path());
        let mut orchestrator = SwapOrchestrator::new("127.0.0.1", free_port(), loader);

        assert_ok!(orchestrator.handle(ReloadEvent::succeeded()).await);
        assert_eq!(orchestrator.phase(), SwapPhase::Live);
        let addr = orchestrator.local_addr().unwrap();

        let mut old = join(addr).await;
        assert!(next_tick(&mut old).await.is_some());

        assert_ok!(orchestrator.handle(ReloadEvent::succeeded()).await);
        assert_eq!(orchestrator.phase(), SwapPhase::Live);
        assert!(ends_soon(&mut old).await);

        let mut new = join(addr).await;
        let first = next_tick(&mut new).await.unwrap();
        assert!(first < 50, "state carried over: tick {}", first);

        assert_ok!(orchestrator.shutdown().await);
    }

    /// The server crate's cdylib, built next to the test binary's `deps/`
    fn built_session_library() -> Option<PathBuf> {
        let exe = std::env::current_exe().ok()?;
        let profile_dir = exe.parent()?.parent()?;
        let path = profile_dir.join(libloading::library_filename("server"));
        path.is_file().then_some(path)
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn live_orchestrator() -> SwapOrchestrator<SessionServerLoader> {
    let mut orchestrator =
        SwapOrchestrator::new("127.0.0.1", free_port(), SessionServerLoader::new(TICK));
    assert_ok!(orchestrator.handle(ReloadEvent::succeeded()).await);
    assert_eq!(orchestrator.phase(), SwapPhase::Live);
    orchestrator
}

async fn join(addr: SocketAddr) -> Socket {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, SESSION_PATH))
        .await
        .unwrap();
    ws
}

async fn join_when_ready(addr: SocketAddr) -> Socket {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Ok((ws, _)) = connect_async(format!("ws://{}{}", addr, SESSION_PATH)).await {
                return ws;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap()
}

/// Reads the next snapshot, or `None` once the session hangs up
async fn next_tick(ws: &mut Socket) -> Option<u64> {
    loop {
        let message = timeout(Duration::from_secs(2), ws.next()).await.ok()??;
        match message.ok()? {
            Message::Text(text) => {
                return GameState::deserialize(text.as_str())
                    .ok()
                    .map(|state| state.current_tick)
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

/// Drains buffered snapshots and reports whether the connection then ended
async fn ends_soon(ws: &mut Socket) -> bool {
    timeout(Duration::from_secs(2), async {
        while next_tick(ws).await.is_some() {}
    })
    .await
    .is_ok()
}

async fn wait_for_state<F>(feed: &SessionFeed, done: F)
where
    F: Fn(&GameState) -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !done(&feed.latest()) {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}
