//! Voxline server binary: the telephony voice bot.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! the remote speech and language clients, and graceful shutdown on
//! SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use voxline_server::lifecycle::Lifecycle;
use voxline_server::registry::CallRegistry;
use voxline_server::sink::StoreSink;
use voxline_server::{app, config, AppState};
use voxline_voice::{CallServices, GroqClient, TurnOrchestrator, WatsonStt, WatsonTts};

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("VOXLINE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    // A missing .env is normal in production.
    let dotenv = dotenvy::dotenv().ok();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
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
        dotenv = dotenv.is_some(),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = voxline_db::init_database(
        &config.database.path,
        voxline_db::DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to initialize database: check database.path in config");

    // Remote services
    if config.stt.api_key.is_empty() || config.tts.api_key.is_empty() {
        tracing::warn!("speech service API keys are not set; calls will not be understood");
    }
    if config.llm.api_key.is_empty() {
        tracing::warn!("GROQ_API_KEY is not set; replies will fall back to the apology");
    }
    let transcriber = WatsonStt::new(&config.stt).expect("invalid stt configuration");
    let synthesizer = WatsonTts::new(&config.tts).expect("invalid tts configuration");
    let groq = Arc::new(GroqClient::new(&config.llm).expect("invalid llm configuration"));

    let lifecycle = Lifecycle::new();
    let sink = StoreSink::new(pool.clone())
        .with_analyzer(groq.clone())
        .with_lifecycle(lifecycle.clone());
    let services = CallServices {
        transcriber: Arc::new(transcriber),
        replier: groq,
        synthesizer: Arc::new(synthesizer),
        sink: Arc::new(sink),
    };
    let orchestrator = TurnOrchestrator::new(services, config.call.clone(), config.segmenter.clone())
        .with_recording(config.recording.clone());

    // Build application
    let registry = CallRegistry::new();
    let state = AppState {
        pool,
        orchestrator,
        registry: registry.clone(),
        public_host: config.server.public_host.clone(),
        lifecycle: lifecycle.clone(),
    };
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting voxline server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    let signal = {
        let lifecycle = lifecycle.clone();
        async move {
            shutdown_signal().await;
            lifecycle.begin_shutdown();
        }
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .expect("server error");

    // Live calls flush as their streams end; wait for them and their analyses.
    tracing::info!(active_calls = registry.len(), "draining calls");
    if !lifecycle.wait(config.server.shutdown_grace()).await {
        tracing::warn!(
            active_calls = registry.len(),
            grace_secs = config.server.shutdown_grace_secs,
            "shutdown grace period elapsed with calls still open"
        );
    }

    tracing::info!("voxline server shut down");
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
