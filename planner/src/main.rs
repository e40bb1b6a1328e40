mod config;

use std::time::{SystemTime, UNIX_EPOCH};

use autoscaler_core::advisor::{Advisor, RemoteAdvisor};
use autoscaler_core::bus::{publish, Bus, RedisBus};
use autoscaler_core::messages::{LatencyWindow, PlanError};
use autoscaler_core::planner::Engine;
use clap::Parser;
use config::Args;
use eyre::Result;
use futures::StreamExt;

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

fn parse_window(raw: &serde_json::Value) -> Result<LatencyWindow, String> {
    serde_json::from_value(raw.clone()).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let bus = RedisBus::new(&args.bus_url)?;
    let cfg = args.engine_config();
    let has_api_key = args.has_api_key();

    let advisor: Option<RemoteAdvisor> = if has_api_key {
        Some(RemoteAdvisor::new(
            args.llm_url.clone(),
            args.llm_api_key.clone(),
        ))
    } else {
        None
    };

    tracing::info!(
        target = %cfg.target,
        min_replicas = cfg.min_replicas,
        max_replicas = cfg.max_replicas,
        has_api_key,
        "planner starting"
    );

    let mut engine = Engine::new(cfg, now_unix());
    let mut alerts = bus.subscribe("alerts");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            raw = alerts.next() => {
                let Some(raw) = raw else {
                    tracing::warn!("alerts stream closed");
                    break;
                };

                if raw.get("kind").and_then(|k| k.as_str()) != Some("latency_metrics") {
                    continue;
                }

                let now = now_unix();
                match parse_window(&raw) {
                    Ok(window) => {
                        let point = engine.begin_window(&window, now);
                        let advisor_result = if point.consult_advisor {
                            match &advisor {
                                Some(adv) => Some(adv.decide(&point.payload).await),
                                None => None,
                            }
                        } else {
                            None
                        };
                        let envelope = engine.finish_window(point, advisor_result, now);
                        tracing::info!(
                            action = ?envelope.decision.action,
                            reason = %envelope.decision.reason,
                            "plan"
                        );
                        publish(&bus, "actions", &envelope).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unparseable latency window");
                        let record = PlanError {
                            kind: "error".to_string(),
                            error: err,
                            raw,
                        };
                        publish(&bus, "actions", &record).await;
                    }
                }
            }
        }
    }

    Ok(())
}
