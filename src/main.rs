use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudapp_rtc::config::ConfigStore;
use cloudapp_rtc::events::{EventBus, SystemEvent};
use cloudapp_rtc::input::parse_command;
use cloudapp_rtc::relay::RelayClient;
use cloudapp_rtc::webrtc::{LogSink, RtcController, RtcPeerFactory, RtcService, SinkHandle};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// cloudapp-rtc command line arguments
#[derive(Parser, Debug)]
#[command(name = "cloudapp-rtc")]
#[command(version, about = "WebRTC client for remotely streamed applications", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "cloudapp-rtc.toml")]
    config: PathBuf,

    /// Relay WebSocket URL (overrides config)
    #[arg(short = 'r', long, value_name = "URL")]
    relay_url: Option<String>,

    /// ICE servers to use instead of the ones the server sends ("none" for host only)
    #[arg(long, value_name = "STUNTURN")]
    stunturn: Option<String>,

    /// Width and height that stdin pointer coordinates refer to
    #[arg(long, value_name = "PIXELS", num_args = 2, default_values_t = [1280.0, 720.0])]
    screen: Vec<f64>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose, args.log_json);

    tracing::info!("Starting cloudapp-rtc v{}", env!("CARGO_PKG_VERSION"));

    let store = ConfigStore::new(&args.config).await?;
    let mut config = (*store.get()).clone();
    if let Some(url) = args.relay_url {
        config.relay.url = url;
    }
    tracing::info!("Configuration: {}", store.path().display());

    let events = Arc::new(EventBus::new());
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();

    let (controller, peer_rx) = RtcController::new(
        RtcPeerFactory::new(config.webrtc.clone()),
        signal_tx,
        events.clone(),
        config.webrtc.clone(),
    );
    let controller = controller.with_mobile(config.relay.is_mobile);
    let service = Arc::new(RtcService::spawn(controller, peer_rx, &events));

    let relay = RelayClient::new(config.relay.clone(), events.clone(), SinkHandle::new(LogSink::default()))
        .with_stunturn(args.stunturn);
    let relay_task = relay.connect(signal_rx).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_events(events.subscribe(), shutdown.clone()));

    let screen = (
        args.screen.first().copied().unwrap_or(1280.0),
        args.screen.get(1).copied().unwrap_or(720.0),
    );
    tokio::spawn(read_commands(service.clone(), screen, shutdown.clone()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        _ = shutdown.cancelled() => {
            tracing::info!("Relay connection closed, exiting");
        }
    }
    shutdown.cancel();

    service.shutdown().await;
    // Controller is gone, so the relay task sees its outbound channel close
    if tokio::time::timeout(Duration::from_secs(2), relay_task).await.is_err() {
        tracing::warn!("Relay task did not stop in time");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log connection lifecycle; cancel `shutdown` once signaling is gone
async fn watch_events(mut rx: tokio::sync::broadcast::Receiver<SystemEvent>, shutdown: CancellationToken) {
    loop {
        match rx.recv().await {
            Ok(SystemEvent::ConnectionReady) => tracing::info!("Input channel ready"),
            Ok(SystemEvent::ConnectionClosed) => tracing::warn!("Connection closed"),
            Ok(SystemEvent::SignalingClosed { reason }) => {
                tracing::warn!("{}", reason);
                shutdown.cancel();
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Forward stdin commands (`keydown 65`, `move 10 20`, `status`) as input
async fn read_commands(service: Arc<RtcService>, screen: (f64, f64), shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {}", e);
                    break;
                }
            },
        };

        if line.trim() == "status" {
            tracing::info!("{:?}", service.status());
            continue;
        }

        let event = match parse_command(&line, screen) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };

        match event.to_bytes() {
            Ok(data) => {
                if !service.input(data) {
                    tracing::warn!("Input channel not ready, {:?} dropped", event.kind());
                }
            }
            Err(e) => tracing::warn!("Failed to serialize input: {}", e),
        }
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8, json: bool) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "cloudapp_rtc=error,webrtc=error",
        LogLevel::Warn => "cloudapp_rtc=warn,webrtc=warn",
        LogLevel::Info => "cloudapp_rtc=info,webrtc=warn",
        LogLevel::Verbose => "cloudapp_rtc=debug,webrtc=warn",
        LogLevel::Debug => "cloudapp_rtc=debug,webrtc=info",
        LogLevel::Trace => "cloudapp_rtc=trace,webrtc=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };
    if let Err(err) = result {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
