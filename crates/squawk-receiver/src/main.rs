//! Squawk Receiver
//!
//! Joins a squawk room and negotiates one RTP audio session per broadcaster.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Start the Prometheus exporter if a bind address is configured
//! 4. Build the WebSocket transport, offer sink and recorder
//! 5. Run the client until it stops or a shutdown signal arrives
//!
//! Exits 0 after a requested shutdown and 1 for every other terminal reason.

#![warn(clippy::pedantic)]

use squawk_receiver::artifacts::FileArtifactSink;
use squawk_receiver::client::event_channel;
use squawk_receiver::config::{Config, LogFormat};
use squawk_receiver::events::{LoggingSessionEvents, SessionEvents};
use squawk_receiver::observability::init_metrics_exporter;
use squawk_receiver::recorder::RecorderLauncher;
use squawk_receiver::transport::{connection_lost_timeout, WsTransport};
use squawk_receiver::{ClientSettings, ReceiverClient, TerminalReason};
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "squawk_receiver=debug";

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    // Log format has to be known before config is validated
    let json_logs = std::env::var("RECEIVER_LOG_FORMAT").is_ok_and(|v| v == "json");
    init_tracing(if json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    });

    info!("Starting Squawk Receiver");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        server_url = %config.server_url,
        role = %config.role,
        room = %config.room,
        receiver_ip = %config.receiver_ip,
        ports = config.receiver_ports.len(),
        prebuilt_offer = config.prebuilt_offer.is_some(),
        sdp_dir = %config.sdp_dir.display(),
        retry_interval_secs = config.retry_interval.as_secs(),
        retry_window_secs = config.retry_window.as_secs(),
        "Configuration loaded successfully"
    );

    if let Some(addr) = config.metrics_bind_address {
        init_metrics_exporter(addr).map_err(|e| {
            error!(error = %e, "Failed to start metrics exporter");
            e
        })?;
        info!(addr = %addr, "Prometheus exporter listening");
    }

    let session_events: Box<dyn SessionEvents + Send> = match &config.recorder_command {
        Some(command) => Box::new(RecorderLauncher::new(command).map_err(|e| {
            error!(error = %e, "Invalid recorder command");
            e
        })?),
        None => {
            info!("No recorder command configured, sessions are only logged");
            Box::new(LoggingSessionEvents)
        }
    };

    let (events_tx, events_rx) = event_channel();
    let transport = WsTransport::new(config.server_url.clone(), events_tx.clone())
        .with_idle_timeout(connection_lost_timeout(config.ping_interval));
    let artifacts = FileArtifactSink::new(config.sdp_dir.clone());

    let client = ReceiverClient::new(
        ClientSettings::from(&config),
        transport,
        artifacts,
        session_events,
        events_tx,
        events_rx,
    );

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        signal_token.cancel();
    });

    let reason = client.run(shutdown).await;

    if reason == TerminalReason::Shutdown {
        info!("Squawk Receiver shutdown complete");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(reason = %reason, "Squawk Receiver stopped");
        Ok(ExitCode::FAILURE)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. Without them the receiver
/// could not log out before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
