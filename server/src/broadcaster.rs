//! Fixed-rate tick loop
//!
//! Each tick advances the session's [`GameState`], serializes it once and
//! queues the same payload on every registered client. Queuing never waits on
//! the network, so a stalled client only loses its own frames and the tick
//! cadence stays put.

use crate::registry::ConnectionRegistry;
use log::{debug, error};
use shared::GameState;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tokio_util::sync::CancellationToken;

/// Delivery counts for a single tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number after the increment
    pub tick: u64,
    /// Clients the snapshot was queued for
    pub delivered: usize,
    /// Clients whose queue was full or closed
    pub dropped: usize,
}

/// Owns the session state and pushes it to clients
pub struct Ticker {
    /// Authoritative state, mutated only by `tick()`
    state: GameState,
    /// Clients receiving each snapshot
    registry: ConnectionRegistry,
}

impl Ticker {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            state: GameState::empty(),
            registry,
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Advances the state by one tick and broadcasts the snapshot
    pub async fn tick(&mut self) -> Result<TickReport, serde_json::Error> {
        // EXAMPLE: increase the tick number
        self.state.current_tick += 1;

        let payload: Utf8Bytes = self.state.serialize()?.into();

        let mut report = TickReport {
            tick: self.state.current_tick,
            ..TickReport::default()
        };
        self.registry
            .for_each(|_, client| {
                if client.send(Message::Text(payload.clone())) {
                    report.delivered += 1;
                } else {
                    report.dropped += 1;
                }
            })
            .await;

        Ok(report)
    }
}

/// Handle to a running tick loop
pub struct TickBroadcaster {
    /// Ends the tick loop
    stop: CancellationToken,
    /// Tick loop, returning its ticker when stopped
    task: JoinHandle<Ticker>,
}

impl TickBroadcaster {
    /// Starts ticking `ticker` every `period`; the first tick fires after one period
    pub fn spawn(ticker: Ticker, period: Duration) -> Self {
        let stop = CancellationToken::new();
        let task = tokio::spawn(run(ticker, period, stop.clone()));
        Self { stop, task }
    }

    /// Cancels the timer and waits for the loop to exit
    ///
    /// Once this returns no further tick will touch the registry. The final
    /// ticker is handed back so callers can inspect the last state.
    pub async fn stop(self) -> Result<Ticker, tokio::task::JoinError> {
        self.stop.cancel();
        self.task.await
    }
}

async fn run(mut ticker: Ticker, period: Duration, stop: CancellationToken) -> Ticker {
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first tick since it fires immediately
    timer.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = stop.cancelled() => break,

            _ = timer.tick() => match ticker.tick().await {
                Ok(report) => {
                    if report.tick % 600 == 0 {
                        debug!(
                            "Tick {}: {} clients, {} dropped frames",
                            report.tick, report.delivered + report.dropped, report.dropped
                        );
                    }
                }
                Err(e) => error!("Failed to serialize game state: {}", e),
            },
        }
    }

    ticker
}
