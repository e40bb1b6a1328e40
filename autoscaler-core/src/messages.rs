use serde::{Deserialize, Serialize};

/// Payload published on `alerts` by the probe. `kind` is always `latency_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyWindow {
    #[serde(default = "latency_metrics_kind")]
    pub kind: String,
    pub endpoint: String,
    pub window_sec: f64,
    pub requests: u32,
    pub success_rate: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    pub replicas: u32,
    pub ts: f64,
}

fn latency_metrics_kind() -> String {
    "latency_metrics".to_string()
}

impl LatencyWindow {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: impl Into<String>,
        window_sec: f64,
        requests: u32,
        success_rate: f64,
        avg_ms: f64,
        p95_ms: f64,
        replicas: u32,
        ts: f64,
    ) -> Self {
        Self {
            kind: latency_metrics_kind(),
            endpoint: endpoint.into(),
            window_sec,
            requests,
            success_rate,
            avg_ms,
            p95_ms,
            replicas,
            ts,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Noop,
    Restart,
    ScaleUp,
    ScaleDown,
}

impl Action {
    /// Whether emitting this action should reset the planner's cooldown clock.
    pub fn is_impactful(self) -> bool {
        matches!(self, Action::Restart | Action::ScaleUp | Action::ScaleDown)
    }
}

pub const MAX_REASON_LEN: usize = 160;

/// Truncates `reason` to `MAX_REASON_LEN` chars, respecting UTF-8 boundaries.
pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        return reason.to_string();
    }
    reason.chars().take(MAX_REASON_LEN).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub target: String,
    pub reason: String,
}

impl Decision {
    pub fn new(action: Action, target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            action,
            target: target.into(),
            reason: truncate_reason(&reason.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    pub p95_ms: f64,
    pub baseline_ms: f64,
    pub sigma_ms: f64,
    pub low_windows: Vec<bool>,
    pub replicas: u32,
}

/// Payload published on `actions` by the planner. `kind` is always `plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEnvelope {
    pub ts: f64,
    pub kind: String,
    pub container: String,
    pub decision: Decision,
    pub telemetry: Telemetry,
}

impl PlanEnvelope {
    pub fn new(
        ts: f64,
        container: impl Into<String>,
        decision: Decision,
        telemetry: Telemetry,
    ) -> Self {
        Self {
            ts,
            kind: "plan".to_string(),
            container: container.into(),
            decision,
            telemetry,
        }
    }
}

/// An error record published on `actions` when a window's processing raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanError {
    pub kind: String,
    pub error: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Noop,
    Skipped,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultOutcome {
    pub status: ResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultOutcome {
    pub fn new(status: ResultStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
        }
    }

    pub fn status_only(status: ResultStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

/// Payload published on `results` by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub ts: f64,
    pub action: Action,
    pub target: String,
    pub reason: String,
    pub result: ResultOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_truncates_at_160_chars() {
        let long = "x".repeat(200);
        let d = Decision::new(Action::Noop, "app", long);
        assert_eq!(d.reason.chars().count(), MAX_REASON_LEN);
    }

    #[test]
    fn action_serializes_snake_case() {
        let v = serde_json::to_value(Action::ScaleUp).unwrap();
        assert_eq!(v, serde_json::json!("scale_up"));
    }
}
