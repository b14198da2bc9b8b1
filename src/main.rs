//! # Realtime Relay Backend - Main Application Entry Point
//!
//! This is the main entry point for the realtime-relay-backend web server.
//! It sets up an Actix-web HTTP server that relays browser audio to the
//! OpenAI Realtime API and streams the spoken reply back.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every connection is served on the async runtime
//! - **actors**: Each browser WebSocket is an actor that owns its session state
//! - **Result<T, E>**: Startup errors bubble up through `anyhow::Result`
//! - **static**: The shutdown flag lives for the entire program duration
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML file + environment variables)
//! - **state**: Shared state: call flag, live sessions, metrics
//! - **relay**: The per-connection relay session and its state machine
//! - **realtime**: Wire messages and the upstream WebSocket client
//! - **audio**: PCM helpers, capture, playback and the playback sequencer
//! - **enrichment**: Weather lookups that add context to a conversation
//! - **health**: Health and metrics endpoints
//! - **middleware**: Request metrics
//! - **handlers**: Call control and config endpoints
//! - **error**: Error types and HTTP error responses

mod audio;       // PCM, capture, playback, sequencer (audio/ directory)
mod config;      // Configuration management (config.rs)
mod enrichment;  // Weather context lookups (enrichment/ directory)
mod error;       // Error handling types (error.rs)
mod handlers;    // HTTP request handlers (handlers/ directory)
mod health;      // Health check endpoints (health.rs)
mod middleware;  // Custom middleware (middleware/ directory)
mod realtime;    // Realtime API protocol and client (realtime/ directory)
mod relay;       // Relay sessions (relay/ directory)
mod state;       // Application state management (state.rs)

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Sets up logging** and loads configuration
/// 2. **Installs the TLS crypto provider** used by the upstream WebSocket
/// 3. **Creates shared application state** that all requests can access
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown**, closing live relay sessions first
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting realtime-relay-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    info!(
        model = %config.realtime.model,
        voice = %config.realtime.voice,
        enrichment = config.enrichment.enabled,
        "Realtime settings"
    );

    if !config.has_api_key() {
        warn!("OPENAI_API_KEY is not set; /ws connections will be rejected");
    }

    // tokio-tungstenite and reqwest both use rustls; pick the provider once
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/", web::get().to(handlers::root))
            .route("/start-call", web::post().to(handlers::start_call))
            .route("/stop-call", web::post().to(handlers::stop_call))
            .route("/ws", web::get().to(relay::relay_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            let closed = app_state.sessions.close_all("server shutting down");
            if closed > 0 {
                info!("Closed {} relay session(s)", closed);
            }
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// `RUST_LOG` controls what gets logged. If not set, defaults to
/// "realtime_relay_backend=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "realtime_relay_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// Listens for SIGTERM and SIGINT; either one sets the global shutdown flag.
/// If a handler cannot be installed the server keeps running without it.
fn setup_signal_handlers() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    error!("Failed to install signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
