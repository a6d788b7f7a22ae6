//! HTTP surface and scheduler for long-running deployments.
//!
//! - `GET /health` answers `OK`
//! - `POST /sync` runs one synchronisation and answers with the counts
//! - a background task runs the same synchronisation on a fixed interval
//!
//! Runs are serialised behind an async mutex, so a manual trigger and a scheduled
//! tick never overlap.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use blockpress_core::config::SyncConfig;
use blockpress_core::contract::{ContentSource, MediaFetcher, MediaStore, Publisher};
use blockpress_core::error::SyncError;
use blockpress_core::synchronise::{SynchroniseReport, Synchroniser};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Client handles and configuration shared by the trigger endpoint and the scheduler.
pub struct SyncService<Src, F, St, P> {
    source: Src,
    fetcher: F,
    store: St,
    publisher: P,
    config: SyncConfig,
    run_lock: Mutex<()>,
}

impl<Src, F, St, P> SyncService<Src, F, St, P>
where
    Src: ContentSource,
    F: MediaFetcher,
    St: MediaStore,
    P: Publisher,
{
    pub fn new(source: Src, fetcher: F, store: St, publisher: P, config: SyncConfig) -> Self {
        Self {
            source,
            fetcher,
            store,
            publisher,
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// One synchronisation run, waiting for any run already in progress.
    pub async fn run_once(&self) -> Result<SynchroniseReport, SyncError> {
        let _guard = self.run_lock.lock().await;
        Synchroniser::new(
            &self.source,
            &self.fetcher,
            &self.store,
            &self.publisher,
            &self.config,
        )
        .run()
        .await
    }
}

#[derive(Debug, Serialize)]
struct TriggerResponse {
    processed: usize,
    skipped: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_router<Src, F, St, P>(service: Arc<SyncService<Src, F, St, P>>) -> Router
where
    Src: ContentSource + 'static,
    F: MediaFetcher + 'static,
    St: MediaStore + 'static,
    P: Publisher + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route("/sync", post(trigger::<Src, F, St, P>))
        .with_state(service)
}

async fn health() -> &'static str {
    "OK"
}

async fn trigger<Src, F, St, P>(State(service): State<Arc<SyncService<Src, F, St, P>>>) -> Response
where
    Src: ContentSource + 'static,
    F: MediaFetcher + 'static,
    St: MediaStore + 'static,
    P: Publisher + 'static,
{
    info!("[SERVER] Manual synchronisation triggered");
    match service.run_once().await {
        Ok(report) => (
            StatusCode::OK,
            Json(TriggerResponse {
                processed: report.processed(),
                skipped: report.skipped.len(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "[SERVER] Triggered synchronisation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Run once now and then every `every`. A zero interval disables the scheduler.
pub fn spawn_scheduler<Src, F, St, P>(
    service: Arc<SyncService<Src, F, St, P>>,
    every: Duration,
) -> Option<JoinHandle<()>>
where
    Src: ContentSource + 'static,
    F: MediaFetcher + 'static,
    St: MediaStore + 'static,
    P: Publisher + 'static,
{
    if every.is_zero() {
        info!("[SCHEDULER] Disabled");
        return None;
    }
    info!(interval_secs = every.as_secs(), "[SCHEDULER] Starting");
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match service.run_once().await {
                Ok(report) => info!(
                    processed = report.processed(),
                    skipped = report.skipped.len(),
                    "[SCHEDULER] Scheduled run complete"
                ),
                Err(e) => warn!(error = %e, "[SCHEDULER] Scheduled run failed, retrying on next tick"),
            }
        }
    }))
}

/// Serve the HTTP surface on `port` and run the scheduler until Ctrl-C.
pub async fn serve<Src, F, St, P>(
    service: Arc<SyncService<Src, F, St, P>>,
    port: u16,
    schedule: Duration,
) -> anyhow::Result<()>
where
    Src: ContentSource + 'static,
    F: MediaFetcher + 'static,
    St: MediaStore + 'static,
    P: Publisher + 'static,
{
    let scheduler = spawn_scheduler(service.clone(), schedule);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "[SERVER] Listening");
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        handle.abort();
    }
    info!("[SERVER] Stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "[SERVER] Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("[SERVER] Shutdown signal received");
}
