mod config;
mod dispatch;

use std::time::{SystemTime, UNIX_EPOCH};

use autoscaler_core::bus::{publish, Bus, RedisBus};
use autoscaler_core::messages::{Action, ActionResult, Decision, ResultOutcome, ResultStatus};
use autoscaler_core::runtime::{ContainerRuntime, DockerRuntime};
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

fn parse_decision(raw: &serde_json::Value) -> Result<Decision, String> {
    raw.get("decision")
        .ok_or_else(|| "missing decision field".to_string())
        .and_then(|d| serde_json::from_value(d.clone()).map_err(|e| e.to_string()))
}

/// §4.3 step 1 reports its own `action`/`reason` for the published record
/// (`noop`, the explanatory refusal message) rather than the decision's
/// original fields — distinct from dispatch, which reports against the
/// decision as given.
async fn handle(
    rt: &dyn ContainerRuntime,
    max_replicas: usize,
    decision: &Decision,
) -> (Action, String, ResultOutcome) {
    match dispatch::check_opt_in(rt, &decision.target).await {
        Ok(Err(outcome)) => {
            let reason = outcome.message.clone().unwrap_or_default();
            return (Action::Noop, reason, outcome);
        }
        Ok(Ok(())) => {}
        Err(err) => {
            return (
                decision.action,
                decision.reason.clone(),
                ResultOutcome::new(ResultStatus::Error, err.to_string()),
            )
        }
    }

    match dispatch::dispatch(rt, decision.action, &decision.target, max_replicas).await {
        Ok(outcome) => (decision.action, decision.reason.clone(), outcome),
        Err(err) => {
            tracing::error!(error = %err, action = ?decision.action, target = %decision.target, "dispatch failed");
            (
                decision.action,
                decision.reason.clone(),
                ResultOutcome::new(ResultStatus::Error, err.to_string()),
            )
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let bus = RedisBus::new(&args.bus_url)?;
    let runtime = DockerRuntime::new();

    tracing::info!(max_replicas = args.max_replicas, "executor starting");

    let mut actions = bus.subscribe("actions");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            raw = actions.next() => {
                let Some(raw) = raw else {
                    tracing::warn!("actions stream closed");
                    break;
                };

                if raw.get("kind").and_then(|k| k.as_str()) != Some("plan") {
                    continue;
                }

                match parse_decision(&raw) {
                    Ok(decision) => {
                        let (action, reason, result) =
                            handle(&runtime, args.max_replicas, &decision).await;
                        tracing::info!(
                            action = ?action,
                            target = %decision.target,
                            status = ?result.status,
                            "dispatched"
                        );
                        let record = ActionResult {
                            ts: now_unix(),
                            action,
                            target: decision.target.clone(),
                            reason,
                            result,
                        };
                        publish(&bus, "results", &record).await;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unparseable plan message");
                        let record = ActionResult {
                            ts: now_unix(),
                            action: Action::Noop,
                            target: String::new(),
                            reason: err.clone(),
                            result: ResultOutcome::new(ResultStatus::Error, err),
                        };
                        publish(&bus, "results", &record).await;
                    }
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_core::runtime::{ContainerInfo, MockRuntime};
    use std::collections::HashMap;

    #[tokio::test]
    async fn scenario_6_unlabeled_target_reports_noop_with_explanatory_reason() {
        let rt = MockRuntime::new();
        rt.seed(ContainerInfo {
            name: "app".to_string(),
            image: "app:latest".to_string(),
            labels: HashMap::new(),
            networks: vec![],
        })
        .await;
        let decision = Decision::new(Action::ScaleUp, "app", "24.0x baseline");

        let (action, reason, result) = handle(&rt, 5, &decision).await;

        assert_eq!(action, Action::Noop);
        assert_eq!(reason, "target not labeled agentic.target=true");
        assert_eq!(result.status, ResultStatus::Skipped);
    }

    #[tokio::test]
    async fn missing_target_reports_noop_with_explanatory_reason() {
        let rt = MockRuntime::new();
        let decision = Decision::new(Action::Restart, "app", "heuristic");

        let (action, reason, result) = handle(&rt, 5, &decision).await;

        assert_eq!(action, Action::Noop);
        assert_eq!(reason, "target container not found");
        assert_eq!(result.status, ResultStatus::Error);
    }
}
