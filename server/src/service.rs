//! Service instance contract and code loading
//!
//! A service instance is whatever the orchestrator runs behind the session
//! listener. A fresh one is built for every reload from the constructor the
//! [`ServiceLoader`] hands back, so nothing is carried over between reloads
//! unless the loader decides otherwise.

use crate::error::{LoadError, ServiceError};
use crate::listener::Incoming;
use crate::session::SessionServer;
use async_trait::async_trait;
use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// A stateful unit the orchestrator can start and release
#[async_trait]
pub trait SessionService: Send {
    async fn start(&mut self) -> Result<(), ServiceError>;

    /// Stops all timers and closes every connection the instance accepted
    ///
    /// Must be safe to call on an instance whose `start()` failed partway.
    async fn release(&mut self) -> Result<(), ServiceError>;
}

/// What a new instance is bound to
#[derive(Debug)]
pub struct ServiceContext {
    /// Sockets accepted by the listener
    pub incoming: Incoming,
    /// Address the listener is bound to
    pub local_addr: SocketAddr,
}

pub type ServiceConstructor =
    Arc<dyn Fn(ServiceContext) -> Box<dyn SessionService> + Send + Sync>;

/// Produces a fresh constructor each time new code is available
pub trait ServiceLoader: Send {
    fn reload(&mut self) -> Result<ServiceConstructor, LoadError>;
}

impl<F> ServiceLoader for F
where
    F: FnMut() -> Result<ServiceConstructor, LoadError> + Send,
{
    fn reload(&mut self) -> Result<ServiceConstructor, LoadError> {
        self()
    }
}

/// Loads the session server compiled into this binary
pub struct SessionServerLoader {
    /// Tick interval handed to every session
    tick_interval: Duration,
    /// Number of constructors produced so far
    generation: u64,
}

impl SessionServerLoader {
    pub fn new(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl ServiceLoader for SessionServerLoader {
    fn reload(&mut self) -> Result<ServiceConstructor, LoadError> {
        self.generation += 1;
        debug!("Loaded session server generation {}", self.generation);

        let tick_interval = self.tick_interval;
        Ok(Arc::new(move |context: ServiceContext| {
            Box::new(SessionServer::new(context, tick_interval)) as Box<dyn SessionService>
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerHandle;

    #[test]
    fn test_loader_counts_generations() {
        let mut loader = SessionServerLoader::new(Duration::from_millis(16));
        assert_eq!(loader.generation(), 0);

        assert!(loader.reload().is_ok());
        assert!(loader.reload().is_ok());
        assert_eq!(loader.generation(), 2);
    }

    #[test]
    fn test_closure_loader() {
        let mut calls = 0;
        let mut loader = move || -> Result<ServiceConstructor, LoadError> {
            calls += 1;
            Err(LoadError::Unavailable(format!("attempt {}", calls)))
        };

        let err = ServiceLoader::reload(&mut loader).err().unwrap();
        assert_eq!(err.to_string(), "failed to load session server: attempt 1");
    }

    #[tokio::test]
    async fn test_constructed_session_starts_and_releases() {
        let (listener, incoming) = ListenerHandle::open("127.0.0.1", 0).await.unwrap();
        let local_addr = listener.local_addr();
        let constructor = SessionServerLoader::new(Duration::from_millis(16))
            .reload()
            .unwrap();

        let mut service = constructor(ServiceContext {
            incoming,
            local_addr,
        });
        assert!(service.start().await.is_ok());
        assert!(service.release().await.is_ok());
    }
}
