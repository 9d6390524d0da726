//! Command line and environment configuration

use clap::Parser;
use shared::{tick_interval, DevPorts, DEFAULT_BASE_PORT, TICK_RATE};
use std::path::PathBuf;
use std::time::Duration;

/// Sources watched in development unless `--watch` says otherwise
pub const DEFAULT_WATCH_PATH: &str = "server/src";

/// Game session server
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to bind to [default: 127.0.0.1 with --dev, 0.0.0.0 otherwise]
    #[arg(short = 'H', long, env = "HOST")]
    pub host: Option<String>,

    /// Base port; with --dev the session listens on PORT+1
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_BASE_PORT)]
    pub port: u16,

    /// Reload the session after every successful build
    #[arg(long)]
    pub dev: bool,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = TICK_RATE as u32,
          value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub tick_rate: u32,

    /// How long a swap waits for the old listener to drain before giving up
    #[arg(long, default_value_t = 1500)]
    pub close_deadline_ms: u64,

    /// Shell command run before each reload; its exit status gates the reload
    #[arg(long, requires = "dev")]
    pub build_cmd: Option<String>,

    /// Directory whose changes trigger a rebuild [default: server/src]
    #[arg(long, requires = "dev")]
    pub watch: Option<PathBuf>,

    /// Compiled session library to load on every reload instead of the
    /// session built into this binary
    #[arg(long, requires = "dev")]
    pub session_lib: Option<PathBuf>,
}

/// How the server runs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Production,
    Development,
}

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Production or development
    pub mode: Mode,
    /// Host the session listener binds
    pub host: String,
    /// Port the client and session ports derive from
    pub base_port: u16,
    /// Time between two ticks
    pub tick_interval: Duration,
    /// Longest wait for a listener to drain
    pub close_deadline: Duration,
    /// Command gating each reload in development
    pub build_cmd: Option<String>,
    /// Sources watched for changes in development
    pub watch_path: Option<PathBuf>,
    /// Library each development reload loads the session from
    pub session_lib: Option<PathBuf>,
}

impl SessionConfig {
    pub fn from_args(args: Args) -> Self {
        let mode = if args.dev {
            Mode::Development
        } else {
            Mode::Production
        };
        let host = args.host.unwrap_or_else(|| match mode {
            Mode::Development => "127.0.0.1".to_string(),
            Mode::Production => "0.0.0.0".to_string(),
        });

        Self {
            mode,
            host,
            base_port: args.port,
            tick_interval: tick_interval(args.tick_rate as f64),
            close_deadline: Duration::from_millis(args.close_deadline_ms),
            build_cmd: args.build_cmd,
            watch_path: match mode {
                Mode::Development => Some(
                    args.watch
                        .unwrap_or_else(|| PathBuf::from(DEFAULT_WATCH_PATH)),
                ),
                Mode::Production => None,
            },
            session_lib: args.session_lib,
        }
    }

    /// Port the session listener binds
    pub fn session_port(&self) -> u16 {
        match self.mode {
            Mode::Development => DevPorts::from_base(self.base_port).session,
            Mode::Production => self.base_port,
        }
    }

    /// Port clients are served from in development
    pub fn client_port(&self) -> u16 {
        DevPorts::from_base(self.base_port).client
    }
}
