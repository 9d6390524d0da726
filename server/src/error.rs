//! Error types for the session server and the swap orchestrator
//!
//! Everything except [`SwapError`] is recoverable: the orchestrator logs it
//! with the phase it happened in and carries on with the next phase.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure to bind the session listener
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("address {addr} is already in use")]
    AddressInUse { addr: String },
    #[error("permission denied binding {addr}")]
    PermissionDenied { addr: String },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ListenerError {
    pub(crate) fn from_bind(addr: String, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::AddrInUse => ListenerError::AddressInUse { addr },
            std::io::ErrorKind::PermissionDenied => ListenerError::PermissionDenied { addr },
            _ => ListenerError::Bind { addr, source },
        }
    }
}

/// Failure reported by a service instance's `start()` or `release()`
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("session server was already started")]
    AlreadyStarted,
    #[error("{task} task failed: {source}")]
    Task {
        task: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
    #[error("{0}")]
    Other(String),
}

/// Failure to close a single client connection
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection {id} from {peer} is already closed")]
    Closed { id: u64, peer: SocketAddr },
}

/// Failure to produce a fresh service constructor
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load session server: {0}")]
    Unavailable(String),
    #[error("failed to stage {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open session library {}: {source}", .path.display())]
    Library {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
}

/// Unrecoverable orchestrator failure; the process must terminate
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("listener on {addr} did not close within {deadline:?}")]
    ListenerCloseTimeout { addr: SocketAddr, deadline: Duration },
}
