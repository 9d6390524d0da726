//! Session servers loaded from a compiled library
//!
//! The server crate is also built as a `cdylib`. In development the
//! [`LibraryLoader`] opens the freshly built library on every reload and looks
//! up [`hotswap_session_create`], so edits to the session code take effect
//! without restarting the process.
//!
//! Each reload opens a private copy of the artifact. The previous library is
//! still mapped while its session runs, and opening the same path again would
//! hand back that stale mapping. A library is unloaded once the last session
//! built from it is dropped.

use crate::error::{LoadError, ServiceError};
use crate::service::{ServiceConstructor, ServiceContext, ServiceLoader, SessionService};
use crate::session::SessionServer;
use async_trait::async_trait;
use libloading::Library;
use log::{debug, info, LevelFilter, Log};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};

/// Name of the exported entry point, nul-terminated for the symbol lookup
pub const ENTRY_SYMBOL: &[u8] = b"hotswap_session_create\0";

const RUNTIME_SHUTDOWN: Duration = Duration::from_millis(500);

/// What the host process shares with a loaded session
#[derive(Clone, Copy)]
pub struct LibraryHost {
    /// Tick interval for the new session
    pub tick_interval: Duration,
    /// The host's logger; a loaded library has its own unset logging globals
    pub logger: &'static dyn Log,
    pub max_level: LevelFilter,
}

impl LibraryHost {
    /// Shares the logger installed in this process
    pub fn current(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            logger: log::logger(),
            max_level: log::max_level(),
        }
    }
}

/// Signature of [`hotswap_session_create`]
pub type SessionEntry = fn(ServiceContext, LibraryHost) -> Box<dyn SessionService>;

/// Builds a session server inside a loaded library
#[no_mangle]
pub fn hotswap_session_create(
    context: ServiceContext,
    host: LibraryHost,
) -> Box<dyn SessionService> {
    // Fails harmlessly when called from the host's own copy of `log`
    let _ = log::set_logger(host.logger);
    log::set_max_level(host.max_level);

    Box::new(IsolatedSession::new(context, host.tick_interval))
}

/// Session server driven by a runtime of its own
///
/// Code in a loaded library sees its own copy of tokio's thread-local context,
/// so every task it spawns must run on a runtime that copy created. The host
/// only awaits join handles, which work across the boundary.
pub struct IsolatedSession {
    /// `None` while a start or release is running on the runtime
    session: Option<SessionServer>,
    runtime: Option<Runtime>,
    /// Why the runtime could not be built
    runtime_error: Option<String>,
}

impl IsolatedSession {
    pub fn new(context: ServiceContext, tick_interval: Duration) -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("session")
            .enable_all()
            .build();

        match runtime {
            Ok(runtime) => Self {
                session: Some(SessionServer::new(context, tick_interval)),
                runtime: Some(runtime),
                runtime_error: None,
            },
            Err(e) => Self {
                session: None,
                runtime: None,
                runtime_error: Some(e.to_string()),
            },
        }
    }

    fn handle(&self) -> Result<Handle, ServiceError> {
        self.runtime.as_ref().map(|runtime| runtime.handle().clone()).ok_or_else(|| {
            ServiceError::Other(format!(
                "session runtime unavailable: {}",
                self.runtime_error.as_deref().unwrap_or("already shut down")
            ))
        })
    }
}

#[async_trait]
impl SessionService for IsolatedSession {
    async fn start(&mut self) -> Result<(), ServiceError> {
        let runtime = self.handle()?;
        let mut session = self
            .session
            .take()
            .ok_or_else(|| ServiceError::Other("session server was lost".into()))?;

        let (session, result) = runtime
            .spawn(async move {
                let result = session.start().await;
                (session, result)
            })
            .await
            .map_err(|source| ServiceError::Task {
                task: "start",
                source,
            })?;

        self.session = Some(session);
        result
    }

    async fn release(&mut self) -> Result<(), ServiceError> {
        let runtime = self.handle()?;
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        let (session, result) = runtime
            .spawn(async move {
                let result = session.release().await;
                (session, result)
            })
            .await
            .map_err(|source| ServiceError::Task {
                task: "release",
                source,
            })?;

        self.session = Some(session);
        result
    }
}

impl Drop for IsolatedSession {
    fn drop(&mut self) {
        drop(self.session.take());

        if let Some(runtime) = self.runtime.take() {
            // Joined so no session thread outlives the library it runs from
            let _ = std::thread::spawn(move || runtime.shutdown_timeout(RUNTIME_SHUTDOWN))
                .join();
        }
    }
}

/// A session built by a loaded library, keeping that library mapped
struct LoadedSession {
    /// Declared first so it drops before the library
    service: Box<dyn SessionService>,
    _library: Arc<Library>,
}

#[async_trait]
impl SessionService for LoadedSession {
    async fn start(&mut self) -> Result<(), ServiceError> {
        self.service.start().await
    }

    async fn release(&mut self) -> Result<(), ServiceError> {
        self.service.release().await
    }
}

/// Loads the session server from a compiled `cdylib` on every reload
pub struct LibraryLoader {
    /// Library the build writes
    artifact: PathBuf,
    /// Directory the versioned copies are opened from
    staging: PathBuf,
    tick_interval: Duration,
    /// Number of libraries loaded so far
    generation: u64,
}

impl LibraryLoader {
    pub fn new(artifact: impl Into<PathBuf>, tick_interval: Duration) -> Self {
        Self {
            artifact: artifact.into(),
            staging: std::env::temp_dir().join(format!("hotswap-session-{}", std::process::id())),
            tick_interval,
            generation: 0,
        }
    }

    pub fn with_staging_dir(mut self, staging: impl Into<PathBuf>) -> Self {
        self.staging = staging.into();
        self
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Copies the artifact to a path no earlier load has used
    fn stage(&self, generation: u64) -> Result<PathBuf, LoadError> {
        fs::create_dir_all(&self.staging).map_err(|source| LoadError::Io {
            path: self.staging.clone(),
            source,
        })?;

        let name = self
            .artifact
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "session".to_string());
        let staged = self.staging.join(format!("{}-{}", generation, name));

        fs::copy(&self.artifact, &staged).map_err(|source| LoadError::Io {
            path: staged.clone(),
            source,
        })?;
        Ok(staged)
    }
}

impl ServiceLoader for LibraryLoader {
    fn reload(&mut self) -> Result<ServiceConstructor, LoadError> {
        if !self.artifact.is_file() {
            return Err(LoadError::Unavailable(format!(
                "{} does not exist",
                self.artifact.display()
            )));
        }

        let generation = self.generation + 1;
        let staged = self.stage(generation)?;

        // SAFETY: the artifact is this crate built as a cdylib, so its
        // initialisers are Rust static constructors with no side effects.
        let opened = unsafe { Library::new(&staged) };
        // The mapping stays valid after the copy is unlinked
        if let Err(e) = fs::remove_file(&staged) {
            debug!("Could not remove {}: {}", staged.display(), e);
        }
        let library = Arc::new(opened.map_err(|source| LoadError::Library {
            path: self.artifact.clone(),
            source,
        })?);

        // SAFETY: the symbol is `hotswap_session_create` from the same crate,
        // built by the same compiler, so it has the `SessionEntry` signature.
        // The pointer is only called while `library` is alive.
        let entry: SessionEntry = unsafe {
            library
                .get::<SessionEntry>(ENTRY_SYMBOL)
                .map(|symbol| *symbol)
                .map_err(|source| LoadError::Library {
                    path: self.artifact.clone(),
                    source,
                })?
        };

        self.generation = generation;
        info!(
            "Loaded session library generation {} from {}",
            generation,
            self.artifact.display()
        );

        let tick_interval = self.tick_interval;
        Ok(Arc::new(move |context: ServiceContext| {
            Box::new(LoadedSession {
                service: entry(context, LibraryHost::current(tick_interval)),
                _library: library.clone(),
            }) as Box<dyn SessionService>
        }))
    }
}
