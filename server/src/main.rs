use clap::Parser;
use log::{error, info, warn};
use server::config::{Args, Mode, SessionConfig};
use server::error::SwapError;
use server::library::LibraryLoader;
use server::listener::ListenerHandle;
use server::orchestrator::SwapOrchestrator;
use server::service::{ServiceContext, ServiceLoader, SessionServerLoader, SessionService};
use server::session::SessionServer;
use server::trigger::{watch_builds, BuildCommand, SourceWatcher, DEFAULT_DEBOUNCE};
use shared::SESSION_PATH;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

/// Main-method of the application.
/// Parses command-line arguments, then serves a single session or, with
/// `--dev`, hands the session port to the swap orchestrator.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = SessionConfig::from_args(Args::parse());

    match config.mode {
        Mode::Production => run_production(config).await,
        Mode::Development => run_development(config).await,
    }
}

/// Serves one session on HOST:PORT until Ctrl+C.
async fn run_production(config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (mut listener, incoming) = ListenerHandle::open(&config.host, config.session_port()).await?;
    let local_addr = listener.local_addr();

    let mut session = SessionServer::new(
        ServiceContext {
            incoming,
            local_addr,
        },
        config.tick_interval,
    );
    session.start().await?;
    info!("Serving session on ws://{}{}", local_addr, SESSION_PATH);

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");

    let closing = listener.close();
    if let Err(e) = session.release().await {
        error!("Session server release failed: {}", e);
    }
    if timeout(config.close_deadline, closing).await.is_err() {
        error!("The session server failed to close its connections");
        std::process::exit(1);
    }

    Ok(())
}

enum Exit {
    Fatal(SwapError),
    Interrupted,
    Ended,
}

/// Picks the session code to reload: a compiled library or this binary.
async fn run_development(config: SessionConfig) -> Result<(), Box<dyn std::error::Error>> {
    match config.session_lib.clone() {
        Some(path) => {
            info!("Loading the session from {}", path.display());
            develop(config.clone(), LibraryLoader::new(path, config.tick_interval)).await
        }
        None => {
            let loader = SessionServerLoader::new(config.tick_interval);
            develop(config, loader).await
        }
    }
}

/// Reloads the session on every successful build until Ctrl+C.
async fn develop<L>(config: SessionConfig, loader: L) -> Result<(), Box<dyn std::error::Error>>
where
    L: ServiceLoader + 'static,
{
    let orchestrator = SwapOrchestrator::new(config.host.clone(), config.session_port(), loader)
        .with_close_deadline(config.close_deadline);

    let (events_tx, events_rx) = mpsc::channel(16);
    let (fatal_tx, mut fatal_rx) = oneshot::channel();

    let orchestrator_handle = tokio::spawn(orchestrator.run(events_rx, fatal_tx));
    let builds_handle = {
        let build = BuildCommand::new(config.build_cmd.clone());
        let sources = config.watch_path.as_deref().and_then(|path| {
            SourceWatcher::new(path, DEFAULT_DEBOUNCE)
                .map_err(|e| warn!("Not watching {}: {}", path.display(), e))
                .ok()
        });
        tokio::spawn(async move {
            if let Err(e) = watch_builds(build, sources, events_tx).await {
                error!("Build trigger stopped: {}", e);
            }
        })
    };

    info!(
        "Development mode: clients on port {}, session on {}:{}",
        config.client_port(),
        config.host,
        config.session_port()
    );

    let exit = tokio::select! {
        fatal = &mut fatal_rx => match fatal {
            Ok(e) => Exit::Fatal(e),
            Err(_) => Exit::Ended,
        },
        _ = tokio::signal::ctrl_c() => Exit::Interrupted,
    };

    match exit {
        Exit::Fatal(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
        Exit::Interrupted => {
            info!("Received Ctrl+C, shutting down gracefully...");
            // Closing the event channel makes the orchestrator release the session
            builds_handle.abort();
            let _ = builds_handle.await;

            let grace = config.close_deadline + Duration::from_secs(1);
            if timeout(grace, orchestrator_handle).await.is_err() {
                warn!("Session did not shut down within {:?}", grace);
            }
            if let Ok(e) = fatal_rx.try_recv() {
                error!("{}", e);
                std::process::exit(1);
            }
        }
        Exit::Ended => info!("Session orchestrator stopped"),
    }

    Ok(())
}
