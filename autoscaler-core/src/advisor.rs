//! The large-language-model oracle is one instance of a general "advisor"
//! capability: given telemetry, return a decision. `RemoteAdvisor` is the
//! production implementation; `HeuristicOnly` and `MockAdvisor` exist so the
//! planner binary and its tests never have to special-case "no oracle
//! configured" outside this trait boundary.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::messages::Action;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub p95_ms: f64,
    pub baseline_ms: f64,
    pub sigma_ms: f64,
    pub pct_of_baseline: Option<f64>,
    pub low_windows: Vec<bool>,
    pub replicas: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub cooldown_ok: bool,
    pub have_baseline: bool,
    pub params: TelemetryParams,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryParams {
    #[serde(rename = "ALPHA_UP")]
    pub alpha_up: f64,
    #[serde(rename = "BETA_DOWN")]
    pub beta_down: f64,
    #[serde(rename = "K_SIGMA")]
    pub k_sigma: f64,
    #[serde(rename = "LOW_NEED_N")]
    pub low_need_n: usize,
    #[serde(rename = "WARMUP_WINDOWS")]
    pub warmup_windows: usize,
}

/// The advisor's raw reply. `target` is intentionally absent: the planner
/// always forces the configured primary identifier regardless of what the
/// advisor returns, per §4.2.5.
#[derive(Debug, Clone)]
pub struct AdvisorReply {
    pub action: Action,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum AdvisorError {
    /// HTTP 429. `retry_after` is the parsed `Retry-After` header, when numeric.
    RateLimited { retry_after: Option<f64> },
    /// Network error, non-429 HTTP failure, or a response body that didn't parse.
    Other(String),
}

impl std::fmt::Display for AdvisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdvisorError::RateLimited { .. } => write!(f, "llm_429"),
            AdvisorError::Other(e) => write!(f, "{e}"),
        }
    }
}

#[async_trait]
pub trait Advisor: Send + Sync {
    async fn decide(&self, payload: &TelemetryPayload) -> Result<AdvisorReply, AdvisorError>;
}

/// Gemini-compatible `generateContent` oracle, rebuilt from
/// `original_source/planner.py`'s `_call_gemini`.
pub struct RemoteAdvisor {
    url: String,
    api_key: String,
    http: reqwest::Client,
}

const SYSTEM_INSTRUCTION: &str = r#"You are an autoscaling planner for a web service.
You receive recent latency history (p95 per window), a rolling baseline (median of p95),
dispersion sigma (1.4826 * MAD), current p95, recent 'near-baseline' booleans, replica counts,
and cooldown status.

Your job: decide "scale_up", "scale_down", or "noop" for target "app" using only data-driven rules.
Return ONLY this compact JSON:
{"action":"noop|restart|scale_up|scale_down","target":"app","reason":"<short>"}

Principles:
- Treat baseline_ms ~ idle latency (robust rolling median of p95).
- Define pct_of_baseline = p95_ms / baseline_ms. Also consider sigma_ms.
- High load: if pct_of_baseline is clearly elevated, or (p95_ms - baseline_ms)/max(sigma_ms,1) is very high,
  and replicas < max_replicas, choose "scale_up".
- Idle/low: if pct_of_baseline stays near 1.0 for several consecutive windows and replicas > min_replicas,
  choose "scale_down".
- Always respect cooldown: if cooldown_ok is false, return "noop" with reason "cooldown".
- Keep reasons short (e.g., "8.3x baseline", "near baseline for 3w").

Target is always "app".
"#;

impl RemoteAdvisor {
    pub fn new(url: String, api_key: String) -> Self {
        Self {
            url,
            api_key,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Advisor for RemoteAdvisor {
    async fn decide(&self, payload: &TelemetryPayload) -> Result<AdvisorReply, AdvisorError> {
        let body = serde_json::json!({
            "system_instruction": {"parts": [{"text": SYSTEM_INSTRUCTION}]},
            "contents": [{"parts": [{"text": serde_json::to_string(payload).unwrap_or_default()}]}],
            "generation_config": {
                "temperature": 0.05,
                "max_output_tokens": 128,
                "response_mime_type": "application/json",
            }
        });

        let resp = self
            .http
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| AdvisorError::Other(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok());
            return Err(AdvisorError::RateLimited { retry_after });
        }

        if !resp.status().is_success() {
            return Err(AdvisorError::Other(format!(
                "http status {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdvisorError::Other(e.to_string()))?;

        parse_gemini_reply(&data).map_err(AdvisorError::Other)
    }
}

fn parse_gemini_reply(data: &serde_json::Value) -> Result<AdvisorReply, String> {
    let text = data
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.get(0))
        .and_then(|p| p.get("text"))
        .and_then(|t| t.as_str())
        .unwrap_or("{}")
        .trim();

    let text = strip_code_fence(text);

    let parsed: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| format!("bad json from advisor: {e}"))?;

    let action = match parsed.get("action").and_then(|a| a.as_str()) {
        Some("restart") => Action::Restart,
        Some("scale_up") => Action::ScaleUp,
        Some("scale_down") => Action::ScaleDown,
        _ => Action::Noop,
    };
    let reason = parsed
        .get("reason")
        .and_then(|r| r.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    Ok(AdvisorReply { action, reason })
}

fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.trim_end_matches("```").trim();
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Always defers to the deterministic heuristic. Used when no API key is
/// configured; never called directly by `Engine`, which runs the heuristic
/// itself, but kept so binaries can treat "no oracle" uniformly as "an
/// advisor that always declines" rather than an `Option<Box<dyn Advisor>>`.
pub struct HeuristicOnly;

#[async_trait]
impl Advisor for HeuristicOnly {
    async fn decide(&self, _payload: &TelemetryPayload) -> Result<AdvisorReply, AdvisorError> {
        Err(AdvisorError::Other("no advisor configured".to_string()))
    }
}

/// Returns a pre-programmed sequence of replies, one per call; used by
/// planner integration tests (e.g. scenario 5's mocked 429 on call 3).
pub struct MockAdvisor {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<AdvisorReply, AdvisorError>>>,
}

impl MockAdvisor {
    pub fn new(replies: Vec<Result<AdvisorReply, AdvisorError>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into_iter().collect()),
        }
    }
}

#[async_trait]
impl Advisor for MockAdvisor {
    async fn decide(&self, _payload: &TelemetryPayload) -> Result<AdvisorReply, AdvisorError> {
        self.replies
            .lock()
            .expect("mock advisor mutex poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(AdvisorError::Other("mock advisor exhausted".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fenced_json_with_json_tag() {
        let input = "```json\n{\"action\":\"noop\",\"reason\":\"ok\"}\n```";
        assert_eq!(
            strip_code_fence(input),
            "{\"action\":\"noop\",\"reason\":\"ok\"}"
        );
    }

    #[test]
    fn strips_fence_without_tag() {
        let input = "```\n{\"action\":\"noop\"}\n```";
        assert_eq!(strip_code_fence(input), "{\"action\":\"noop\"}");
    }

    #[test]
    fn unknown_action_maps_to_noop() {
        let data = serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "{\"action\":\"explode\",\"reason\":\"x\"}"}]}}]
        });
        let reply = parse_gemini_reply(&data).unwrap();
        assert_eq!(reply.action, Action::Noop);
    }
}
