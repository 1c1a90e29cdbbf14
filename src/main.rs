//! CongoPay - Mobile Money Backend API
//!
//! User onboarding, wallet provisioning, card funding and P2P transfers on
//! top of a double-entry ledger with client-supplied idempotency.

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use congo_pay::api::{self, AppState};
use congo_pay::cache::{Cache, RedisCache};
use congo_pay::{db, Config};

/// Initialize tracing/logging
fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(format!(
                    "congo_pay={level},tower_http={level}"
                ))
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    tracing::info!(app = %config.app_name, env = %config.app_env, "starting server");

    let pool = match &config.database_url {
        Some(url) => {
            tracing::info!("connecting to database");
            let pool = db::connect(url).await?;
            if !db::check_schema(&pool).await? {
                anyhow::bail!("database schema is not complete, run migrations");
            }
            Some(pool)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, falling back to the in-memory ledger");
            None
        }
    };

    let cache = match &config.redis_url {
        Some(url) => {
            tracing::info!("connecting to redis");
            let client = redis::Client::open(url.as_str())?;
            let conn = client.get_connection_manager().await?;
            Some(Cache::Redis(RedisCache::new(conn)))
        }
        None => {
            tracing::warn!("REDIS_URL not set, idempotent replay and rate limiting disabled");
            None
        }
    };

    let state = AppState::build(config.clone(), pool.clone(), cache).await?;
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_rx.await.ok();
            })
            .await
    });

    tokio::select! {
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
        }
        result = &mut server => {
            result??;
            return Ok(());
        }
    }

    // Allow in-flight requests to finish within the configured grace period.
    match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            tracing::warn!("shutdown grace period elapsed, aborting in-flight requests");
            server.abort();
        }
    }

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("database connections closed");
    }
    tracing::info!("server exited cleanly");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating graceful shutdown");
        },
    }
}
