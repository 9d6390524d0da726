//! Session feed
//!
//! Keeps the latest authoritative snapshot from the session server. When the
//! session closes the connection, as it does on every reload, the feed starts
//! over from an empty state and reconnects.

use futures::StreamExt;
use log::{debug, info, warn};
use shared::{DevPorts, GameState, SESSION_PATH};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

pub const RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Session URL for a client served from `host:client_port`
pub fn session_url(host: &str, client_port: u16) -> String {
    format!(
        "ws://{}:{}{}",
        host,
        DevPorts::session_for_client(client_port),
        SESSION_PATH
    )
}

/// Latest game state received from the session
#[derive(Debug, Clone, Default)]
pub struct SessionFeed {
    /// Shared with the render loop, which only ever reads it
    state: Arc<Mutex<GameState>>,
}

impl SessionFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> GameState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn store(&self, state: GameState) {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Follows one session until it closes, returning the snapshots applied
    pub async fn follow(&self, url: &str) -> Result<usize, tungstenite::Error> {
        let (mut stream, _) = connect_async(url).await?;
        info!("Joined session at {}", url);

        let mut applied = 0;
        while let Some(message) = stream.next().await {
            match message? {
                Message::Text(text) => match GameState::deserialize(text.as_str()) {
                    Ok(state) => {
                        self.store(state);
                        applied += 1;
                    }
                    Err(e) => warn!("Ignoring malformed snapshot: {}", e),
                },
                Message::Close(frame) => {
                    debug!("Session closed: {:?}", frame);
                    break;
                }
                _ => {}
            }
        }

        Ok(applied)
    }

    /// Reconnects forever, resetting to an empty state between sessions
    pub async fn run(self, url: String) {
        loop {
            match self.follow(&url).await {
                Ok(applied) => info!("Session ended after {} snapshots, rejoining", applied),
                Err(e) => debug!("Session unavailable: {}", e),
            }
            self.store(GameState::empty());
            sleep(RECONNECT_DELAY).await;
        }
    }
}
