use bamboo_backend::api::{self, AppState, ServiceSettings, Stores};
use bamboo_backend::config::AppConfig;
use bamboo_backend::database::{init_pool_from_config, run_migrations};
use bamboo_backend::health::{DatabaseProbe, HealthChecker};
use bamboo_backend::logging::init_tracing;
use bamboo_backend::payments::providers::toyyibpay::ToyyibPayGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting bamboo backend"
    );

    let pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!(error = %e, "failed to initialize database pool");
        e
    })?;
    info!(
        max_connections = pool.options().get_max_connections(),
        "Database connection pool initialized"
    );

    run_migrations(&pool).await?;
    info!("Database migrations applied");

    if config.gateway.secret_key.is_none() {
        warn!("TOYYIBPAY_SECRET_KEY is not set; status queries go out unauthenticated");
    }
    if config.gateway.callback_secret.is_none() {
        warn!("TOYYIBPAY_CALLBACK_SECRET is not set; callback signatures are not checked");
    }
    let gateway = Arc::new(ToyyibPayGateway::new(config.gateway.clone())?);

    let health = HealthChecker::new(vec![Arc::new(DatabaseProbe::new(pool.clone()))]);
    let state = AppState::build(
        Stores::postgres(pool),
        gateway,
        ServiceSettings::from(&config),
        health,
    )?;

    let scheduler = state.scheduler.clone();
    if config.scheduler.enabled {
        let status = scheduler.start().await;
        info!(
            interval_minutes = status.interval_minutes,
            "Payment auto-poll scheduler started"
        );
    } else {
        info!("Payment auto-poll scheduler disabled (PAYMENT_POLL_ENABLED=false)");
    }

    let app = api::router(state);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "failed to bind");
        e
    })?;
    info!(address = %addr, "Server listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    scheduler.stop().await;
    info!("Payment auto-poll scheduler stopped");

    served?;
    info!("Server shutdown complete");
    Ok(())
}
