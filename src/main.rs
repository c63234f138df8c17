use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use romo_bridge::api::{DeviceApi, DeviceApiClient};
use romo_bridge::config::AppConfig;
use romo_bridge::control::CommandBroadcaster;
use romo_bridge::orchestrator::SessionOrchestrator;
use romo_bridge::rtc::{PeerTransport, RtcChannelSession};
use romo_bridge::state::AppState;
use romo_bridge::web;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

/// Romo Bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "romo-bridge")]
#[command(version, about = "Live video and joystick control bridge for DJI Romo robots", long_about = None)]
struct CliArgs {
    /// Path to the .env credentials file
    #[arg(short = 'e', long, value_name = "FILE", default_value = ".env")]
    env_file: PathBuf,

    /// Control bridge port (overrides .env)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Device serial number (overrides .env)
    #[arg(short = 's', long, value_name = "SN")]
    device_sn: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting romo-bridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = AppConfig::load(&args.env_file)?;
    if let Some(port) = args.port {
        config.control_port = port;
    }
    if let Some(sn) = args.device_sn {
        config.device_sn = sn;
    }
    config.validate()?;
    tracing::info!("Device: {}", config.device_sn);

    let api: Arc<dyn DeviceApi> = Arc::new(DeviceApiClient::new(
        &config.api_base_url,
        &config.user_token,
        &config.locale,
    )?);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(PeerTransport::new(config.rtc_gateway_url.clone(), events_tx));
    let session = RtcChannelSession::new(transport, events_rx);
    let broadcaster = Arc::new(CommandBroadcaster::new(session.clone()));

    let state = AppState::new(config, api, session, broadcaster);

    // The bridge comes up first so the viewer URL works as soon as the
    // orchestrator publishes the page
    let server = tokio::spawn(web::serve(state.clone()));

    let orchestrator = SessionOrchestrator::new(state.clone());
    if let Err(e) = orchestrator.start().await {
        tracing::error!("Startup failed: {}", e);
        orchestrator.shutdown().await;
        let _ = server.await;
        anyhow::bail!("startup failed: {}", e);
    }

    tracing::info!("Running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    orchestrator.shutdown().await;
    match server.await {
        Ok(Err(e)) => tracing::warn!("Control bridge exited with error: {}", e),
        Err(e) => tracing::warn!("Control bridge task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Stopped");
    Ok(())
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "romo_bridge=error,tower_http=error",
        LogLevel::Warn => "romo_bridge=warn,tower_http=warn",
        LogLevel::Info => "romo_bridge=info,tower_http=info",
        LogLevel::Debug => "romo_bridge=debug,tower_http=debug",
        LogLevel::Trace => "romo_bridge=trace,tower_http=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
