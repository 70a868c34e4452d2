//! Vocalis server binary.
//!
//! Starts the HTTP/WebSocket server with structured logging, optional
//! database tools, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use vocalis_db::{create_pool, seed_demo, AccessClient};
use vocalis_llm::{CompletionEngine, OllamaClient};
use vocalis_server::config::{self, Config};
use vocalis_server::session::{SessionRegistry, SessionSettings};
use vocalis_server::{app, AppState};
use vocalis_tools::{build_registry, ToolRegistry};
use vocalis_voice::{Synthesizer, TtsService};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VOCALIS_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Opens the database and builds the tool registry, when both are enabled.
fn init_tools(config: &Config) -> Option<Arc<ToolRegistry>> {
    if !config.database.enabled {
        tracing::info!("database disabled, no tools registered");
        return None;
    }

    if config.database.seed_demo {
        let applied = seed_demo(&config.database.path)
            .expect("failed to seed the demo schema : check database.path in config");
        if applied > 0 {
            tracing::info!(count = applied, "applied demo schema");
        }
    }

    let pool = create_pool(&config.database.path, config.db_settings())
        .expect("failed to create database pool : check database.path in config");
    let client = AccessClient::new(pool, config.access_policy());
    tracing::info!(
        path = %config.database.path,
        allow_write = config.database.allow_write,
        max_rows = config.database.max_rows,
        "database ready"
    );

    if !config.tools.enabled {
        tracing::info!("tools disabled in config");
        return None;
    }
    let registry = build_registry(&client, &config.tools.available, config.tool_timeout())
        .expect("failed to register tools");
    Some(Arc::new(registry))
}

fn init_synthesizer(config: &Config) -> Option<Arc<dyn Synthesizer>> {
    if !config.tts.enabled {
        tracing::info!("speech synthesis disabled in config");
        return None;
    }
    let tts = TtsService::new(&config.tts.voices_dir, &config.tts.piper_binary)
        .with_sample_rate(config.tts.sample_rate)
        .with_timeout(Duration::from_secs(config.tts.timeout_secs));
    if !tts.is_ready(&config.voice_settings()) {
        tracing::warn!(
            voice = %config.tts.voice,
            voices_dir = %config.tts.voices_dir,
            "speech engine or voice model not found; audio frames will report errors"
        );
    }
    Some(Arc::new(tts))
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration : the server cannot start without valid config");

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    let registry = init_tools(&config);
    let source = OllamaClient::new(
        config.llm.base_url.clone(),
        Duration::from_secs(config.llm.request_timeout_secs),
    )
    .expect("failed to build the model service client");
    let engine = Arc::new(CompletionEngine::new(
        Arc::new(source),
        registry,
        config.engine_settings(),
    ));

    let shutdown = CancellationToken::new();
    let state = AppState {
        engine,
        synthesizer: init_synthesizer(&config),
        voice: config.voice_settings(),
        session: SessionSettings::from_config(&config),
        sessions: SessionRegistry::new(),
        database_enabled: config.database.enabled,
        shutdown: shutdown.clone(),
        static_dir: config
            .server
            .static_dir
            .clone()
            .filter(|dir| !dir.trim().is_empty()),
    };

    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(
        %addr,
        model = %config.llm.model,
        voice = %config.tts.voice,
        "starting vocalis server"
    );

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address : is another process using this port?");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await
        .expect("server error");

    tracing::info!("vocalis server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
