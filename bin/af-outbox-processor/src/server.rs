//! Health, readiness and metrics endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use af_outbox::{DispatcherState, DispatcherStats};

#[derive(Clone)]
pub struct HealthState {
    pub dispatcher: watch::Receiver<DispatcherState>,
    pub stats: Arc<DispatcherStats>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(port: u16, state: HealthState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Metrics server listening on http://{}/metrics", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn metrics_handler(State(state): State<HealthState>) -> String {
    let stats = state.stats.snapshot();
    let dispatcher = *state.dispatcher.borrow();
    let up = u8::from(dispatcher != DispatcherState::Stopped);

    let mut out = String::new();
    gauge(&mut out, "af_outbox_up", "Outbox dispatcher loop is running", u64::from(up));
    gauge(&mut out, "af_outbox_last_batch_size", "Rows fetched by the last tick", stats.last_batch_size);
    counter(&mut out, "af_outbox_ticks_total", "Dispatcher ticks run", stats.ticks);
    counter(&mut out, "af_outbox_abandoned_ticks_total", "Ticks cut short by a store failure", stats.abandoned_ticks);
    counter(&mut out, "af_outbox_fetched_total", "Outbox rows fetched", stats.fetched);
    counter(&mut out, "af_outbox_delivered_total", "Messages published to the bus", stats.delivered);
    counter(&mut out, "af_outbox_requeued_total", "Messages rescheduled after a failed publish", stats.requeued);
    counter(&mut out, "af_outbox_dropped_total", "Messages dropped after exhausting retries", stats.dropped);
    counter(&mut out, "af_outbox_notified_total", "Owning tasks notified of a dropped message", stats.notified);
    counter(&mut out, "af_outbox_lost_total", "Requeued messages lost on re-insert", stats.lost);
    out
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    metric(out, "gauge", name, help, value);
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    metric(out, "counter", name, help, value);
}

fn metric(out: &mut String, kind: &str, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n"));
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "UP",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let dispatcher = *state.dispatcher.borrow();
    if dispatcher == DispatcherState::Stopped {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "STOPPED" })),
        );
    }
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "READY",
            "dispatcher": format!("{:?}", dispatcher)
        })),
    )
}
