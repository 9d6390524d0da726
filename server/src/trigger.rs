//! Build events for development mode
//!
//! One build runs at startup and another whenever the watched session sources
//! change, or on `SIGHUP`. Without a build command every trigger counts as a
//! successful build.

use crate::orchestrator::ReloadEvent;
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Quiet period that ends a burst of file changes
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Shell command whose exit status decides whether a reload happens
#[derive(Debug, Clone, Default)]
pub struct BuildCommand {
    /// Run through `sh -c`; `None` means every build succeeds
    command: Option<String>,
}

impl BuildCommand {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    pub async fn run(&self) -> ReloadEvent {
        let Some(command) = &self.command else {
            return ReloadEvent::succeeded();
        };

        info!("Building: {}", command);
        match Command::new("sh").arg("-c").arg(command).status().await {
            Ok(status) if status.success() => ReloadEvent::succeeded(),
            Ok(status) => {
                warn!("Build failed ({}), keeping the current session", status);
                ReloadEvent::failed()
            }
            Err(e) => {
                error!("Failed to run build command: {}", e);
                ReloadEvent::failed()
            }
        }
    }
}

/// Watches the session sources and reports debounced changes
pub struct SourceWatcher {
    /// Kept alive for as long as changes should be reported
    _watcher: RecommendedWatcher,
    /// Paths reported by the watcher thread
    changes: mpsc::UnboundedReceiver<PathBuf>,
    /// Quiet period that ends a burst of changes
    debounce: Duration,
}

impl SourceWatcher {
    /// Starts watching `path` recursively
    pub fn new(path: &Path, debounce: Duration) -> notify::Result<Self> {
        let (tx, changes) = mpsc::unbounded_channel();

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(
                        event.kind,
                        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                    ) {
                        for path in event.paths {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => warn!("File watcher error: {}", e),
            })?;
        watcher.watch(path, RecursiveMode::Recursive)?;

        info!("Watching {} for changes", path.display());
        Ok(Self {
            _watcher: watcher,
            changes,
            debounce,
        })
    }

    /// Waits for a change, then for the burst around it to settle
    ///
    /// Returns the last path that changed, or `None` once the watcher stops.
    pub async fn next_change(&mut self) -> Option<PathBuf> {
        let mut last = self.changes.recv().await?;
        loop {
            match timeout(self.debounce, self.changes.recv()).await {
                Ok(Some(path)) => last = path,
                Ok(None) | Err(_) => return Some(last),
            }
        }
    }
}

/// Emits a build event now and after every change or rebuild request
///
/// Returns once `events` is closed. While the orchestrator is listening the
/// sender stays alive even if no further rebuilds can be requested.
pub async fn watch_builds(
    build: BuildCommand,
    mut sources: Option<SourceWatcher>,
    events: mpsc::Sender<ReloadEvent>,
) -> std::io::Result<()> {
    if events.send(build.run().await).await.is_err() {
        return Ok(());
    }

    let mut hangup = Hangup::new()?;
    let mut hangup_live = true;

    loop {
        tokio::select! {
            _ = events.closed() => return Ok(()),
            changed = next_change(&mut sources) => match changed {
                Some(path) => info!("{} changed, rebuilding", path.display()),
                None => {
                    debug!("Source watcher stopped");
                    sources = None;
                    continue;
                }
            },
            received = hangup.recv(), if hangup_live => match received {
                Some(()) => info!("Rebuild requested"),
                None => {
                    hangup_live = false;
                    continue;
                }
            },
        }

        if events.send(build.run().await).await.is_err() {
            return Ok(());
        }
    }
}

async fn next_change(sources: &mut Option<SourceWatcher>) -> Option<PathBuf> {
    match sources {
        Some(watcher) => watcher.next_change().await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        info!("Send SIGHUP to rebuild and reload the session");
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> Option<()> {
        std::future::pending().await
    }
}
