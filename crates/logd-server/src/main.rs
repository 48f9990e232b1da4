//! logd binary: the UDP log daemon.
//!
//! Loads configuration, opens the store, binds the transport and serves the
//! status surface until SIGTERM/SIGINT.

use logd_db::SqliteStore;
use logd_server::{
    background, config, status, StatusState, Stats, Transport, TransportSettings, WriteGuard,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("LOGD_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("logd.toml"));

    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration, the daemon cannot start without valid config");

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

    config
        .validate()
        .expect("invalid configuration, both transport secrets must be set");

    let store = SqliteStore::open(&config.database.path, config.database.runtime_settings())
        .expect("failed to open log store, check database.path in config")
        .with_max_results(config.database.query_max_results);

    let settings = TransportSettings::from(&config.transport);
    let stats = Arc::new(Stats::default());
    let transport = Transport::bind(
        config.transport.addr(),
        settings.clone(),
        Arc::new(store.clone()),
        Arc::new(WriteGuard::new(settings.sig_ttl)),
        Arc::clone(&stats),
    )
    .await
    .expect("failed to bind udp socket, is another process using this port?");

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(transport.clone().run(cancel.clone()));
    tasks.spawn(background::start_retention_task(
        store,
        config.database.max_records_per_partition,
        config.database.retention_interval_secs,
        cancel.clone(),
    ));
    tasks.spawn(background::start_measure_task(stats, cancel.clone()));

    if config.status.enabled {
        let addr = config.status.addr();
        let listener = TcpListener::bind(addr)
            .await
            .expect("failed to bind status address, is another process using this port?");
        tracing::info!(%addr, "serving status endpoint");

        let app = status::app(
            StatusState::new(transport, config.status.rate_limit_per_minute),
            &config.status,
        );
        let shutdown = cancel.clone();
        tasks.spawn(async move {
            if let Err(e) = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            {
                tracing::error!(error = %e, "status server error");
            }
        });
    } else {
        tracing::info!("status endpoint disabled");
    }

    shutdown_signal().await;
    cancel.cancel();

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "task failed during shutdown");
        }
    }

    tracing::info!("logd shut down");
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
