//! # Session Server Library
//!
//! Authoritative session server for the multiplayer game scaffold, plus the
//! development-time machinery that swaps the running session for a freshly
//! built one without restarting the process.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative State
//! The session owns the canonical [`shared::GameState`] and advances it at a
//! fixed tick rate. Clients only ever receive snapshots.
//!
//! ### Client Management
//! Clients join by upgrading `GET /join` to a WebSocket. Each session keeps a
//! registry of open connections keyed by an ID that is unique for the lifetime
//! of that session.
//!
//! ### State Broadcasting
//! Every tick the state is serialized once and the same payload is queued on
//! every client. Slow clients lose frames instead of slowing the tick.
//!
//! ### Live Swapping
//! In development the [`orchestrator::SwapOrchestrator`] reacts to build
//! events: it stops the listener from accepting, releases the old session,
//! waits (bounded) for every connection to drain, reopens the listener on the
//! same address and starts the new session. A listener that fails to drain in
//! time is fatal; every other failure is logged and survived.
//!
//! ## Module Organization
//!
//! - `listener` - the session socket and its drain-aware close
//! - `registry` - connected clients of one session
//! - `connection` - per-client WebSocket task
//! - `broadcaster` - fixed-rate tick loop
//! - `session` - the session server service instance
//! - `service` - the start/release contract and service loading
//! - `library` - loading the session server from a compiled library
//! - `orchestrator` - the swap sequence
//! - `trigger` - build events in development mode
//! - `config` - command line and environment settings
//! - `error` - error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::orchestrator::{ReloadEvent, SwapOrchestrator};
//! use server::service::SessionServerLoader;
//! use std::time::Duration;
//! use tokio::sync::{mpsc, oneshot};
//!
//! #[tokio::main]
//! async fn main() {
//!     let loader = SessionServerLoader::new(Duration::from_millis(16));
//!     let orchestrator = SwapOrchestrator::new("127.0.0.1", 3001, loader);
//!
//!     let (events, events_rx) = mpsc::channel(16);
//!     let (fatal_tx, fatal_rx) = oneshot::channel();
//!     tokio::spawn(orchestrator.run(events_rx, fatal_tx));
//!
//!     // Every successful build swaps in a fresh session
//!     events.send(ReloadEvent::succeeded()).await.unwrap();
//!
//!     if let Ok(fatal) = fatal_rx.await {
//!         eprintln!("{}", fatal);
//!         std::process::exit(1);
//!     }
//! }
//! ```

pub mod broadcaster;
pub mod config;
pub mod connection;
pub mod error;
pub mod library;
pub mod listener;
pub mod orchestrator;
pub mod registry;
pub mod service;
pub mod session;
pub mod trigger;
