//! Live session swapping for development
//!
//! The orchestrator replaces the running session with a freshly loaded one
//! every time a build succeeds. Each swap runs to completion before the next
//! event is looked at:
//!
//! 1. load a fresh service constructor (failure aborts the swap, nothing is torn down)
//! 2. start closing the current listener so no new clients arrive
//! 3. release the current session (failure is logged, the swap continues)
//! 4. wait for the listener to drain, bounded by the close deadline (fatal on expiry)
//! 5. open a new listener on the same address
//! 6. construct and start the new session; if that fails, release it again and
//!    carry on without a live session until the next build
//!
//! Only one listener is ever open on the session address because step 5 waits
//! for step 4.

use crate::error::SwapError;
use crate::listener::ListenerHandle;
use crate::service::{ServiceContext, ServiceLoader, SessionService};
use log::{debug, error, info};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

pub const DEFAULT_CLOSE_DEADLINE: Duration = Duration::from_millis(1500);

/// Outcome of one build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadEvent {
    /// Whether the build produced loadable code
    pub success: bool,
}

impl ReloadEvent {
    pub fn succeeded() -> Self {
        Self { success: true }
    }

    pub fn failed() -> Self {
        Self { success: false }
    }
}

/// Where the orchestrator is in the swap sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapPhase {
    Idle,
    Closing,
    Released,
    Listening,
    Starting,
    Live,
    /// No live session, but ready for the next build
    Failed,
}

/// Swaps session servers on the session address
pub struct SwapOrchestrator<L> {
    /// Host every listener binds
    host: String,
    /// Port every listener binds
    port: u16,
    /// Longest wait for the old listener to drain
    close_deadline: Duration,
    /// Source of fresh service constructors
    loader: L,
    /// The single open listener, if any
    listener: Option<ListenerHandle>,
    /// The live service instance, if any
    current: Option<Box<dyn SessionService>>,
    /// Current step of the swap sequence
    phase: SwapPhase,
}

impl<L: ServiceLoader> SwapOrchestrator<L> {
    pub fn new(host: impl Into<String>, port: u16, loader: L) -> Self {
        Self {
            host: host.into(),
            port,
            close_deadline: DEFAULT_CLOSE_DEADLINE,
            loader,
            listener: None,
            current: None,
            phase: SwapPhase::Idle,
        }
    }

    pub fn with_close_deadline(mut self, close_deadline: Duration) -> Self {
        self.close_deadline = close_deadline;
        self
    }

    pub fn phase(&self) -> SwapPhase {
        self.phase
    }

    pub fn is_live(&self) -> bool {
        self.current.is_some()
    }

    /// Address of the open listener, if any
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|listener| listener.local_addr())
    }

    /// Processes one build outcome
    ///
    /// Failed builds leave everything untouched. The only error is the fatal
    /// close timeout; every other failure is logged and absorbed.
    pub async fn handle(&mut self, event: ReloadEvent) -> Result<(), SwapError> {
        if !event.success {
            debug!("Build failed, keeping the current session");
            return Ok(());
        }
        self.swap().await
    }

    async fn swap(&mut self) -> Result<(), SwapError> {
        let constructor = match self.loader.reload() {
            Ok(constructor) => constructor,
            Err(e) => {
                error!("Session server reload failed: {}", e);
                return Ok(());
            }
        };

        // Start closing before releasing so clients cannot reconnect too early
        self.phase = SwapPhase::Closing;
        let closing = self
            .listener
            .as_mut()
            .map(|listener| (listener.local_addr(), listener.close()));

        self.release_current().await;
        self.phase = SwapPhase::Released;

        if let Some((addr, closing)) = closing {
            if timeout(self.close_deadline, closing).await.is_err() {
                error!("The session server failed to close its connections");
                return Err(SwapError::ListenerCloseTimeout {
                    addr,
                    deadline: self.close_deadline,
                });
            }
        }
        self.listener = None;

        let (listener, incoming) = match ListenerHandle::open(&self.host, self.port).await {
            Ok(opened) => opened,
            Err(e) => {
                error!("Session listener open failed: {}", e);
                self.phase = SwapPhase::Failed;
                return Ok(());
            }
        };
        let local_addr = listener.local_addr();
        self.listener = Some(listener);
        self.phase = SwapPhase::Listening;

        let mut next = constructor(ServiceContext {
            incoming,
            local_addr,
        });
        self.phase = SwapPhase::Starting;

        match next.start().await {
            Ok(()) => {
                info!("Serving session on ws://{}{}", local_addr, shared::SESSION_PATH);
                self.current = Some(next);
                self.phase = SwapPhase::Live;
                return Ok(());
            }
            Err(e) => error!("Session server startup failed: {}", e),
        }

        // Even if startup failed, release the partial server so its tasks stop
        if let Err(e) = next.release().await {
            error!("Partial session server release failed: {}", e);
        }
        self.phase = SwapPhase::Failed;
        Ok(())
    }

    async fn release_current(&mut self) {
        if let Some(mut service) = self.current.take() {
            if let Err(e) = service.release().await {
                error!("Session server release failed: {}", e);
            }
        }
    }

    /// Releases the live session and closes the listener
    pub async fn shutdown(&mut self) -> Result<(), SwapError> {
        let closing = self
            .listener
            .as_mut()
            .map(|listener| (listener.local_addr(), listener.close()));
        self.release_current().await;

        if let Some((addr, closing)) = closing {
            if timeout(self.close_deadline, closing).await.is_err() {
                return Err(SwapError::ListenerCloseTimeout {
                    addr,
                    deadline: self.close_deadline,
                });
            }
        }
        self.listener = None;
        self.phase = SwapPhase::Idle;
        Ok(())
    }

    /// Handles reload events one at a time until the channel closes
    ///
    /// Events that arrive during a swap wait in the channel. A fatal error is
    /// passed to `fatal` and ends the loop; the receiving side is expected to
    /// terminate the process. When the event channel closes the session is
    /// shut down cleanly.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ReloadEvent>,
        fatal: oneshot::Sender<SwapError>,
    ) {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.handle(event).await {
                let _ = fatal.send(e);
                return;
            }
        }

        info!("Reload events ended, shutting down session");
        if let Err(e) = self.shutdown().await {
            let _ = fatal.send(e);
        }
    }
}
