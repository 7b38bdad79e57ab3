//! wirebridge command-line entry point.
//!
//! # Subcommands
//!
//! ```text
//! wirebridge ws     -- connect, upgrade, run the session until Ctrl-C or peer close
//! wirebridge probe  -- drive the transport adapter the way an engine would
//! ```
//!
//! # Why `spawn_blocking`? (for beginners)
//!
//! The adapters and the WebSocket session use plain blocking `std::net`
//! sockets.  Tokio is only here to catch Ctrl-C.  The blocking work runs on
//! Tokio's blocking thread pool and watches a shared `AtomicBool`; the
//! Ctrl-C task flips it and the session notices within one stop-poll
//! interval.

use std::io;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wirebridge_client::infrastructure::config::{load_config, AppConfig};
use wirebridge_client::infrastructure::rng::RngAdapter;
use wirebridge_client::infrastructure::transport::TransportAdapter;
use wirebridge_client::infrastructure::websocket::WebSocketSession;
use wirebridge_core::engine::{
    recv_some, send_all, DelayStatus, DelayTimer, EngineTimer, IoProgress, RandomSource, TransportError,
};

#[derive(Debug, Parser)]
#[command(name = "wirebridge", version, about = "Transport adapter and WebSocket session client")]
struct Cli {
    /// Path to the TOML config file.  A missing file means built-in defaults.
    #[arg(long, env = "WIREBRIDGE_CONFIG", default_value = "wirebridge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Open a WebSocket session and keep it alive until Ctrl-C.
    Ws {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        path: Option<String>,
        /// Bearer token for the Upgrade request.
        #[arg(long, env = "WIREBRIDGE_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Connect through the transport adapter and send an HTTP HEAD request.
    Probe {
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 80)]
        port: u16,
        /// Give up after this many seconds without progress.
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;

    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(config = %cli.config.display(), "wirebridge starting");

    // Shutdown flag, shared by both subcommands.
    let stop = Arc::new(AtomicBool::new(false));

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let stop_clone = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            stop_clone.store(true, Ordering::Relaxed);
        }
    });

    match cli.command {
        Command::Ws { host, port, path, token } => {
            if let Some(host) = host {
                config.websocket.host = host;
            }
            if let Some(port) = port {
                config.websocket.port = port;
            }
            if let Some(path) = path {
                config.websocket.path = path;
            }
            if token.is_some() {
                config.websocket.bearer_token = token;
            }
            tokio::task::spawn_blocking(move || run_websocket(&config, &stop))
                .await
                .context("websocket task panicked")??;
        }
        Command::Probe { host, port, timeout_secs } => {
            let timeout = Duration::from_secs(timeout_secs);
            tokio::task::spawn_blocking(move || run_probe(&config, &host, port, timeout, &stop))
                .await
                .context("probe task panicked")??;
        }
    }

    info!("wirebridge stopped");
    Ok(())
}

// ── ws ────────────────────────────────────────────────────────────────────────

fn run_websocket(config: &AppConfig, stop: &AtomicBool) -> anyhow::Result<()> {
    let target = config.session_target();
    let session_config = config.session_config()?;
    let mut rng = RngAdapter::new().with_fallback(config.fallback_policy());
    rng.seed(Some(target.host.as_bytes()));

    let mut session = WebSocketSession::new(target.clone(), session_config)?
        .with_transport_config(&config.transport_config())
        .with_random_source(Box::new(rng));

    let peer = session
        .connect()
        .with_context(|| format!("connecting to {}:{}", target.host, target.port))?;
    session
        .handshake()
        .with_context(|| format!("upgrading {} on {peer}", target.path))?;

    let summary = session.run(stop)?;
    info!(
        reason = %summary.reason,
        frames = summary.stats.frames_received,
        bytes = summary.stats.bytes_received,
        pongs = summary.stats.pongs_sent,
        keepalives = summary.stats.keepalives_sent,
        "session finished"
    );
    Ok(())
}

// ── probe ─────────────────────────────────────────────────────────────────────

fn run_probe(config: &AppConfig, host: &str, port: u16, timeout: Duration, stop: &AtomicBool) -> anyhow::Result<()> {
    let mut rng = RngAdapter::new().with_fallback(config.fallback_policy());
    rng.seed(Some(host.as_bytes()));
    let mut request_id = [0u8; 8];
    rng.random(&mut request_id).context("generating request id")?;
    let request_id: String = request_id.iter().map(|b| format!("{b:02x}")).collect();

    let mut transport = TransportAdapter::with_config(config.transport_config());
    let peer = transport
        .connect(host, port)
        .with_context(|| format!("connecting to {host}:{port}"))?;
    info!(%peer, %request_id, "probe connected");

    let mut timer = DelayTimer::new();
    timer.set_delay(timeout / 2, timeout);
    let mut warned = false;
    let mut wait = |progress: IoProgress| -> Result<(), TransportError> {
        match timer.delay_status() {
            DelayStatus::FinalExpired => return Err(timed_out(progress)),
            DelayStatus::IntermediateExpired if !warned => {
                warn!(?progress, "peer is slow to respond");
                warned = true;
            }
            _ => {}
        }
        if stop.load(Ordering::Relaxed) {
            return Err(timed_out(progress));
        }
        std::thread::sleep(Duration::from_millis(10));
        Ok(())
    };

    let request = format!("HEAD / HTTP/1.0\r\nHost: {host}\r\nX-Request-Id: {request_id}\r\n\r\n");
    send_all(&mut transport, request.as_bytes(), &mut wait).context("sending probe request")?;

    let mut response = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = recv_some(&mut transport, &mut buf, &mut wait).context("reading probe response")?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
    }
    transport.close();

    let text = String::from_utf8_lossy(&response);
    let status_line = text.lines().next().unwrap_or_default();
    info!(bytes = response.len(), status = status_line, "probe response");
    Ok(())
}

fn timed_out(progress: IoProgress) -> TransportError {
    let err = io::Error::new(io::ErrorKind::TimedOut, "no progress before the probe deadline");
    match progress {
        IoProgress::WantWrite => TransportError::SendFailed(err),
        _ => TransportError::RecvFailed(err),
    }
}
