//! Kiln API Server

use anyhow::Context;
use clap::{Parser, ValueEnum};
use kiln_api::services::github::GitHubNotifier;
use kiln_api::{AppState, routes};
use kiln_config::{Settings, StorageBackend, load_settings};
use kiln_db::{BuildRepo, MemoryBuildRepo, connect_postgres};
use kiln_executor::{ShellExecutor, TimeLimited};
use kiln_scheduler::Dispatcher;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kiln-server")]
#[command(about = "Kiln build server", long_about = None)]
#[command(version)]
struct Args {
    /// Settings file
    #[arg(short, long, env = "KILN_CONFIG", default_value = "kiln.kdl")]
    config: PathBuf,

    /// Listen address, overrides `server.listen`
    #[arg(long, env = "KILN_LISTEN")]
    listen: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

async fn open_storage(settings: &Settings) -> anyhow::Result<Arc<dyn BuildRepo>> {
    match &settings.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; builds are lost on restart");
            Ok(Arc::new(MemoryBuildRepo::new()))
        }
        StorageBackend::Postgres { database_url } => {
            info!("Connecting to database...");
            let repo = connect_postgres(database_url).await?;
            info!("Database connected");
            Ok(Arc::new(repo))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format);

    let mut settings = if args.config.exists() {
        load_settings(&args.config)
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "No settings file, using defaults");
        Settings::default()
    };
    settings.apply_env();
    if let Some(listen) = args.listen {
        settings.server.listen = listen;
    }

    let repo = open_storage(&settings).await?;
    let executor = TimeLimited::new(ShellExecutor::new(settings.build.clone()), settings.build.timeout());
    let notifier = GitHubNotifier::new(&settings.github);
    if settings.github.token.is_none() {
        warn!("No GitHub token configured; failed builds will not be reported");
    }

    let dispatcher = Arc::new(Dispatcher::new(repo, Arc::new(executor), Arc::new(notifier)));
    let listen = settings.server.listen.clone();
    let state = AppState::new(dispatcher, settings);

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", listen);

    let listener = TcpListener::bind(listen.as_str())
        .await
        .with_context(|| format!("failed to bind {}", listen))?;
    axum::serve(listener, app).await?;

    Ok(())
}
