//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::AppState;
use metrics_exporter_prometheus::PrometheusHandle;
use session_store::{InMemoryRepository, PostgresRepository, Repository};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Periodically abandons sessions left waiting past the idle window.
fn spawn_idle_sweeper<R: Repository + 'static>(state: &Arc<AppState<R>>, config: &Config) {
    if config.idle_timeout.is_none() {
        return;
    }
    let lifecycle = state.engine.lifecycle();
    let mut interval = tokio::time::interval(config.idle_sweep_interval);
    tokio::spawn(async move {
        loop {
            interval.tick().await;
            match lifecycle.sweep_idle_sessions(chrono::Utc::now()).await {
                Ok(abandoned) if !abandoned.is_empty() => {
                    tracing::info!(count = abandoned.len(), "abandoned idle sessions");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "idle sweep failed"),
            }
        }
    });
}

async fn serve<R: Repository + 'static>(repo: R, config: Config, metrics_handle: PrometheusHandle) {
    let state = api::create_default_state(repo, config.engine_config());
    spawn_idle_sweeper(&state, &config);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Pick the repository and serve
    match config.database_url.clone() {
        Some(url) => {
            let repo = PostgresRepository::connect(&url)
                .await
                .expect("failed to connect to database");
            repo.run_migrations().await.expect("migrations failed");
            tracing::info!("using postgres repository");
            serve(repo, config, metrics_handle).await;
        }
        None => {
            tracing::info!("DATABASE_URL unset, using in-memory repository");
            serve(InMemoryRepository::new(), config, metrics_handle).await;
        }
    }
}
