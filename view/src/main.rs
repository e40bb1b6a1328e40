mod config;
mod state;

use std::sync::Arc;

use autoscaler_core::bus::{Bus, RedisBus};
use autoscaler_core::messages::{ActionResult, LatencyWindow};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use config::Args;
use eyre::Result;
use futures::StreamExt;
use state::{apply_latency, apply_result, SharedState, ViewState};
use tokio::sync::Mutex;

async fn api_state(State(state): State<SharedState>) -> Json<serde_json::Value> {
    let snapshot = state.lock().await;
    Json(serde_json::json!({
        "latency": snapshot.latency,
        "events": snapshot.events,
    }))
}

fn spawn_alerts_listener(bus: Arc<RedisBus>, state: SharedState) {
    tokio::spawn(async move {
        let mut alerts = bus.subscribe("alerts");
        while let Some(raw) = alerts.next().await {
            if raw.get("kind").and_then(|k| k.as_str()) != Some("latency_metrics") {
                continue;
            }
            match serde_json::from_value::<LatencyWindow>(raw) {
                Ok(window) => apply_latency(&state, window).await,
                Err(err) => tracing::warn!(error = %err, "dropping unparseable latency window"),
            }
        }
    });
}

fn spawn_results_listener(bus: Arc<RedisBus>, state: SharedState) {
    tokio::spawn(async move {
        let mut results = bus.subscribe("results");
        while let Some(raw) = results.next().await {
            match serde_json::from_value::<ActionResult>(raw) {
                Ok(result) => apply_result(&state, result).await,
                Err(err) => tracing::warn!(error = %err, "dropping unparseable action result"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let bus = Arc::new(RedisBus::new(&args.bus_url)?);
    let state: SharedState = Arc::new(Mutex::new(ViewState::default()));

    spawn_alerts_listener(bus.clone(), state.clone());
    spawn_results_listener(bus.clone(), state.clone());

    let app = Router::new()
        .route("/api/state", get(api_state))
        .with_state(state);

    tracing::info!(bind = %args.bind, "view starting");
    let listener = tokio::net::TcpListener::bind(&args.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;

    Ok(())
}
