//! RGB segment clock server
//!
//! Runs the clock's control loop and an HTTP API for its configuration UI.
//! The display is simulated in memory; `GET /api/v1/segments` shows what
//! each segment would light up as.
//!
//! ## Architecture
//! - **Control thread** (std::thread): owns configuration, mode arbiter and
//!   renderer, processes requests and remote messages, refreshes the time
//! - **HTTP server** (tokio/axum): accepts API requests, sends commands via channel
//!
//! ## Rust concepts
//! - `#[tokio::main]` async entry point
//! - `std::thread::spawn` for the control thread
//! - `std::sync::mpsc` channel between async and sync worlds
//! - `Arc<Mutex<T>>` for shared status
//!
//! ## Usage
//! ```sh
//! ./target/release/rgb-segment-clock --storage /var/lib/rgb-clock.bin --port 8080
//! ```

use clap::Parser;
use rgb_segment_clock::config::{ConfigStore, FileStorage};
use rgb_segment_clock::engine::{ClockEngine, LocalClock, LoopSettings, run_loop};
use rgb_segment_clock::remote::{BridgeLink, DeviceInfo, RemoteTopics};
use rgb_segment_clock::render::{FrameBuffer, Renderer};
use rgb_segment_clock::server::{self, AppState};
use rgb_segment_clock::{is_running, setup_signal_handler};
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// RGB segment clock server
#[derive(Parser)]
#[command(name = "rgb-segment-clock")]
#[command(about = "Control loop and HTTP configuration API for a 4-digit RGB seven-segment clock")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(long, default_value = "8080")]
    port: u16,

    /// File holding the persisted configuration record
    #[arg(long, default_value = "rgb-clock.bin")]
    storage: PathBuf,

    /// Milliseconds between time-of-day refreshes
    #[arg(long, default_value = "5000")]
    refresh_ms: u64,

    /// Prefix of the remote-control topics
    #[arg(long, default_value = "home/rgb_clock")]
    topic_prefix: String,

    /// Topic the discovery record is published on
    #[arg(long, default_value = "homeassistant/light/rgb_clock/config")]
    discovery_topic: String,

    /// Milliseconds between remote reconnect attempts
    #[arg(long, default_value = "5000")]
    reconnect_ms: u64,

    /// Skip the brightness ramp shown at startup
    #[arg(long)]
    skip_lamp_test: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false) // Disable ANSI color codes for systemd/journald
        .compact()
        .init();

    let args = Args::parse();

    tracing::info!("RGB Segment Clock v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage: {}", args.storage.display());
    tracing::info!("Topics: {}/...", args.topic_prefix);
    tracing::info!("Port: {}", args.port);

    let running = match setup_signal_handler() {
        Ok(running) => running,
        Err(e) => {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::process::exit(1);
        }
    };

    let store = ConfigStore::load(FileStorage::new(&args.storage));
    let topics = RemoteTopics::new(&args.topic_prefix, &args.discovery_topic);

    let sink = FrameBuffer::new();
    let frame = sink.snapshot_handle();
    let mut engine = ClockEngine::new(
        store,
        Renderer::new(sink),
        LocalClock,
        topics.clone(),
        DeviceInfo::default(),
    );
    let status = engine.status_handle();
    let segments = engine.renderer().segments_handle();

    // Channels into the control thread: configuration requests and remote messages.
    let (command_tx, command_rx) = mpsc::channel();
    let (remote_tx, remote_rx) = mpsc::channel();
    let mut link = BridgeLink::new(remote_rx);
    let retained = link.retained();

    let settings = LoopSettings {
        refresh_interval: Duration::from_millis(args.refresh_ms),
        reconnect_backoff: Duration::from_millis(args.reconnect_ms),
        ..LoopSettings::default()
    };
    let skip_lamp_test = args.skip_lamp_test;

    // Spawn the control thread.
    let loop_running = running.clone();
    let control_handle = std::thread::spawn(move || {
        if !skip_lamp_test {
            engine.lamp_test(Duration::from_millis(10));
        }
        run_loop(&mut engine, &mut link, command_rx, settings, &loop_running);
    });

    // Build the HTTP server
    let app_state = AppState {
        command_tx,
        remote_tx,
        topics,
        status,
        segments,
        frame,
        retained,
    };

    let app = server::create_router(app_state);

    // Start listening
    let addr = format!("0.0.0.0:{}", args.port);
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API Documentation: http://localhost:{}/docs", args.port);
    tracing::info!("Try: curl http://localhost:{}/api/v1/status", args.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            running.store(false, std::sync::atomic::Ordering::SeqCst);
            if control_handle.join().is_err() {
                tracing::error!("Control thread panicked");
            }
            std::process::exit(1);
        }
    };

    // Serve until Ctrl+C clears the running flag
    let shutdown_flag = running.clone();
    let shutdown = async move {
        while is_running(&shutdown_flag) {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        tracing::info!("Shutting down HTTP server");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!("Server error: {}", e);
        running.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    if control_handle.join().is_err() {
        tracing::error!("Control thread panicked");
    }
    tracing::info!("Stopped");
}
