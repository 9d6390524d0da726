use clap::Parser;
use client::network::{session_url, SessionFeed};
use client::rendering::Renderer;
use log::{error, info};
use macroquad::prelude::*;
use shared::DEFAULT_BASE_PORT;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host the session server runs on
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Client port; the session is expected one port above it
    #[arg(short, long, default_value_t = DEFAULT_BASE_PORT)]
    port: u16,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Session Client".to_owned(),
        window_width: 800,
        window_height: 600,
        window_resizable: true,
        ..Default::default()
    }
}

/// Runs the session feed on its own thread; macroquad owns the main one.
fn spawn_feed(feed: SessionFeed, url: String) {
    std::thread::spawn(move || {
        match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime.block_on(feed.run(url)),
            Err(e) => error!("Failed to start network runtime: {}", e),
        }
    });
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let url = session_url(&args.host, args.port);
    info!("Connecting to: {}", url);

    let feed = SessionFeed::new();
    spawn_feed(feed.clone(), url);

    let mut renderer = Renderer::new();
    loop {
        renderer.resize(screen_width(), screen_height());
        renderer.render(&feed.latest());
        next_frame().await;
    }
}
