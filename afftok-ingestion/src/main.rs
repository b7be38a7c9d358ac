use axum::http::{header, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;

use afftok_ingestion::adapters::{self, RedisStreamSender, StreamTriggerHandler};
use afftok_ingestion::config::AppConfig;
use afftok_ingestion::{routes, AppState};
use afftok_shared::types::event::stream_keys::{STREAM_CLICKS, STREAM_CONVERSIONS, STREAM_POSTBACKS};
use afftok_stream::StreamConsumer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    afftok_shared::middleware::init_tracing("afftok-ingestion");

    let config = AppConfig::load()?;
    let port = config.port;
    let metrics_handle = afftok_shared::middleware::init_metrics();

    let state = AppState::build(config, metrics_handle).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    run_boot_recovery(&state).await;

    let mut workers = Vec::new();
    for _ in 0..state.config.webhook_worker_count.max(1) {
        workers.push(tokio::spawn(run_webhook_workers(state.clone(), shutdown_rx.clone())));
    }
    workers.push(tokio::spawn(run_failover_drain(state.clone(), shutdown_rx.clone())));
    workers.push(tokio::spawn(run_stream_claimers(state.clone(), shutdown_rx.clone())));
    for task in run_stream_consumers(&state).await? {
        workers.push(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { task.run(shutdown_rx).await }
        }));
    }

    let app = routes::router()
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(AllowMethods::list([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS]))
                .allow_headers(AllowHeaders::list([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])),
        )
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(afftok_shared::middleware::metrics_middleware))
        .with_state(state.clone());

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "afftok-ingestion starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(wait_for_shutdown_signal(shutdown_tx))
        .await?;

    for worker in workers {
        let _ = worker.await;
    }
    state.wal.stop().await?;

    Ok(())
}

async fn run_boot_recovery(state: &Arc<AppState>) {
    let db = state.db.clone();
    let redis = state.redis.clone();
    let mut handler = move |event_type: &str, payload: &serde_json::Value| {
        adapters::replay_event(db.clone(), redis.clone(), event_type, payload)
    };

    match state.recovery.recover(&mut handler).await {
        Ok(report) => tracing::info!(?report, "boot recovery complete"),
        Err(err) => tracing::error!(error = %err, "boot recovery failed"),
    }
}

async fn run_webhook_workers(state: Arc<AppState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let poll = Duration::from_millis(state.config.webhook_queue_poll_interval_ms);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tokio::time::sleep(poll) => {
                if let Err(err) = state.webhook_worker.drain_due_retries(50).await {
                    tracing::warn!(error = %err, "webhook retry drain failed");
                }
                if let Err(err) = state.webhook_worker.drain_primary(50).await {
                    tracing::warn!(error = %err, "webhook primary drain failed");
                }
                if let Err(err) = state.webhook_worker.drain_failover(10).await {
                    tracing::warn!(error = %err, "webhook failover drain failed");
                }
            }
        }
    }
}

async fn run_failover_drain(state: Arc<AppState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let sender = RedisStreamSender { wal: state.wal.clone(), redis: state.redis.clone() };
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    state.failover.process_queue(&sender).await;
                    break;
                }
            }
            _ = tick.tick() => {
                state.failover.process_queue(&sender).await;
            }
        }
    }
}

/// Builds the consumer-group readers for the three durable streams (4.H).
/// Each runs its own `XREADGROUP`/dispatch/`XACK` loop against
/// `StreamTriggerHandler`; `run_stream_claimers` below only handles
/// reclaiming entries idle past a threshold from dead consumers.
async fn run_stream_consumers(state: &Arc<AppState>) -> anyhow::Result<Vec<StreamConsumer<StreamTriggerHandler>>> {
    let mut consumers = Vec::new();
    for stream in [STREAM_CLICKS, STREAM_CONVERSIONS, STREAM_POSTBACKS] {
        let handler = StreamTriggerHandler { db: state.db.clone(), webhook_worker: state.webhook_worker.clone() };
        let consumer = StreamConsumer::new(state.redis.clone(), stream, "afftok-ingestion-consumer", handler).await?;
        consumers.push(consumer);
    }
    Ok(consumers)
}

/// Periodically reclaims stream entries idle past a threshold from dead
/// consumers (4.H), redelivering work abandoned by a crashed consumer.
async fn run_stream_claimers(state: Arc<AppState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = tick.tick() => {
                for stream in [STREAM_CLICKS, STREAM_CONVERSIONS, STREAM_POSTBACKS] {
                    if let Err(err) = state.redis.xautoclaim(stream, "afftok-consumers", "afftok-ingestion-claimer", 60_000, "0-0", 100).await {
                        tracing::warn!(stream = %stream, error = %err, "stream claim failed");
                    }
                }
            }
        }
    }
}

async fn wait_for_shutdown_signal(tx: tokio::sync::watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining workers");
    let _ = tx.send(true);
    tokio::time::sleep(Duration::from_secs(2)).await;
}
