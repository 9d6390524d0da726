//! # Game Client Library
//!
//! Client side of the session scaffold. The client only renders: it follows
//! the authoritative state broadcast by the session server and draws it
//! through a world to viewport camera.
//!
//! ## Module Organization
//!
//! ### Camera Module (`camera`)
//! World to viewport transform with a lazily rebuilt matrix.
//!
//! ### Network Module (`network`)
//! WebSocket feed of session snapshots. Whenever the session closes the
//! connection the feed resets and rejoins, so a reloaded session is picked up
//! without restarting the client.
//!
//! ### Rendering Module (`rendering`)
//! Draws the example scene with `macroquad`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{session_url, SessionFeed};
//!
//! # async fn example() {
//! let feed = SessionFeed::new();
//! tokio::spawn(feed.clone().run(session_url("127.0.0.1", 3000)));
//!
//! // Each frame
//! let state = feed.latest();
//! println!("tick {}", state.current_tick);
//! # }
//! ```

pub mod camera;
pub mod network;
pub mod rendering;
