use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use weft_domain::config::{Config, ConfigSeverity};
use weft_executions::{PreviewRegistry, ToolExecutionManager};
use weft_gateway::api;
use weft_gateway::bridge::GatewayBridge;
use weft_gateway::cli::{Cli, Command, ConfigCommand};
use weft_gateway::rooms::RoomRegistry;
use weft_gateway::sessions::SessionRegistry;
use weft_gateway::state::AppState;
use weft_timeline::{TimelineService, TimelineStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let config = weft_gateway::cli::load_config(&cli.config)?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let config = weft_gateway::cli::load_config(&cli.config)?;
            let issues = config.validate();
            for issue in &issues {
                let tag = match issue.severity {
                    ConfigSeverity::Warning => "warning",
                    ConfigSeverity::Error => "error",
                };
                println!("{tag}: {issue}");
            }
            if issues
                .iter()
                .any(|i| i.severity == ConfigSeverity::Error)
            {
                std::process::exit(1);
            }
            println!("config ok");
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = weft_gateway::cli::load_config(&cli.config)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("weft {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing for the serve path.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,weft_gateway=debug")),
        )
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("weft gateway starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Timeline store ───────────────────────────────────────────────
    let store = Arc::new(
        TimelineStore::new(&config.storage.state_path).context("initializing timeline store")?,
    );
    tracing::info!(
        path = %config.storage.state_path.display(),
        "timeline store ready"
    );

    // ── Execution manager + previews ─────────────────────────────────
    let previews = Arc::new(PreviewRegistry::new());
    let executions = Arc::new(ToolExecutionManager::new(previews));
    tracing::info!("execution manager ready");

    // ── Sessions, rooms, bridge ──────────────────────────────────────
    let sessions = Arc::new(SessionRegistry::new());
    let rooms = Arc::new(RoomRegistry::new());
    let bridge = Arc::new(GatewayBridge::new(sessions.clone(), executions.clone()));

    // ── Timeline service ─────────────────────────────────────────────
    let timeline = TimelineService::new(
        store,
        executions.clone(),
        rooms.clone(),
        bridge.clone(),
        config.timeline.clone(),
    );
    let _subscribers = timeline.run();
    tracing::info!("timeline service subscribed");

    // ── HTTP server ──────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        sessions,
        executions,
        timeline,
        rooms,
        bridge,
    };
    let app = api::router()
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "binding {}:{}",
                config.server.host, config.server.port
            )
        })?;
    tracing::info!(addr = %listener.local_addr()?, "weft gateway listening");
    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
