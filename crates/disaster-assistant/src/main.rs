use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    services::ServeDir,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use disaster_assistant::config::Settings;
use disaster_assistant::handlers;
use disaster_assistant::logging::{ActivityLog, ActivityStatus, ActivityType};
use disaster_assistant::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,disaster_assistant=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(writer)
        .json()
        .init();

    info!("🚀 Starting disaster assistant...");

    let settings = Settings::load()?;
    info!("✅ Configuration loaded");

    let state = AppState::build(settings.clone()).await?;
    info!("✅ Workflow engine initialized");

    if let Some(ttl) = settings.memory.session_idle_ttl_secs {
        spawn_idle_sweeper(state.clone(), Duration::from_secs(ttl.max(1)));
    }

    let app = build_router(state, settings.server.static_dir.as_deref());

    let addr = SocketAddr::from((
        settings.server.host.parse::<std::net::IpAddr>()?,
        settings.server.port,
    ));
    info!("🎯 Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server stopped");
    Ok(())
}

fn build_router(state: AppState, static_dir: Option<&str>) -> Router {
    let mut router = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route("/chat", post(handlers::chat::chat_handler))
        .with_state(state);

    match static_dir {
        Some(dir) if Path::new(dir).is_dir() => {
            info!("Serving frontend from {}", dir);
            router = router.fallback_service(ServeDir::new(dir));
        }
        Some(dir) => info!("Static directory {} not found, frontend disabled", dir),
        None => {}
    }

    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
            .layer(CatchPanicLayer::new())
            .layer(CorsLayer::permissive()),
    )
}

/// Periodically drop sessions idle for longer than `ttl`.
fn spawn_idle_sweeper(state: AppState, ttl: Duration) {
    let period = (ttl / 2).max(Duration::from_secs(1));
    info!("Idle session sweep every {:?} (ttl {:?})", period, ttl);

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = state.engine.sessions().evict_idle(ttl);
            if evicted > 0 {
                state.activity.log(
                    ActivityLog::builder("*", ActivityType::SessionsEvicted)
                        .status(ActivityStatus::Info)
                        .custom("evicted", evicted)
                        .build(),
                );
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
