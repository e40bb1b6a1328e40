//! The planner's decision engine: rolling baseline, near-baseline
//! classifier, band-change/heartbeat cadence, oracle safety gates, the
//! deterministic heuristic fallback, and cooldown enforcement. No I/O lives
//! here; the planner binary performs the oracle HTTP call and hands the
//! result back via [`Engine::finish_window`].

use std::collections::VecDeque;

use rand::Rng;

use crate::advisor::{AdvisorError, AdvisorReply, TelemetryParams, TelemetryPayload};
use crate::messages::{Action, Decision, LatencyWindow, PlanEnvelope, Telemetry};

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub target: String,
    pub cooldown_sec: f64,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub llm_rpm: f64,
    pub llm_heartbeat_sec: f64,
    pub llm_backoff_base_sec: f64,
    pub llm_backoff_max_sec: f64,
    pub hist_windows: usize,
    pub warmup_windows: usize,
    pub low_need_n: usize,
    pub alpha_up: f64,
    pub beta_down: f64,
    pub k_sigma: f64,
    pub idle_hint_ms: f64,
    /// Whether an oracle API key is configured. The engine never sees the
    /// key itself; the planner binary owns the HTTP client and its secret.
    pub has_api_key: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            target: "app".to_string(),
            cooldown_sec: 20.0,
            min_replicas: 2,
            max_replicas: 10,
            llm_rpm: 2.0,
            llm_heartbeat_sec: 300.0,
            llm_backoff_base_sec: 10.0,
            llm_backoff_max_sec: 300.0,
            hist_windows: 60,
            warmup_windows: 12,
            low_need_n: 3,
            alpha_up: 8.0,
            beta_down: 1.10,
            k_sigma: 2.5,
            idle_hint_ms: 0.0,
            has_api_key: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Init,
    VeryHigh,
    High,
    Mid,
    Near,
    Low,
}

fn band_for(baseline: f64, ratio: f64) -> Band {
    if baseline <= 0.0 {
        return Band::Init;
    }
    if ratio >= 8.0 {
        Band::VeryHigh
    } else if ratio >= 3.0 {
        Band::High
    } else if ratio >= 1.5 {
        Band::Mid
    } else if ratio >= 0.9 {
        Band::Near
    } else {
        Band::Low
    }
}

#[derive(Debug, Clone, PartialEq)]
struct BandKey {
    band: Band,
    replicas: u32,
    low_flags: Vec<bool>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    updated_ts: f64,
}

impl TokenBucket {
    fn new(rpm: f64, now: f64) -> Self {
        Self {
            tokens: rpm,
            updated_ts: now,
        }
    }

    fn refill(&mut self, rpm: f64, now: f64) {
        let delta_min = (now - self.updated_ts) / 60.0;
        self.tokens = (self.tokens + rpm * delta_min).min(rpm);
        self.updated_ts = now;
    }

    fn try_take(&mut self, rpm: f64, now: f64) -> bool {
        self.refill(rpm, now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Backoff {
    until_ts: f64,
    power: u32,
}

impl Backoff {
    fn new() -> Self {
        Self {
            until_ts: 0.0,
            power: 0,
        }
    }
}

/// Mutable state owned exclusively by the planner's single consumer loop.
pub struct Engine {
    cfg: PlannerConfig,
    p95_history: VecDeque<f64>,
    low_flags: VecDeque<bool>,
    last_action_ts: f64,
    last_llm_call_ts: f64,
    token_bucket: TokenBucket,
    backoff: Backoff,
    last_band_key: Option<BandKey>,
}

/// Everything computed for a window before deciding whether to consult the
/// advisor. Carries what [`Engine::finish_window`] needs to complete the
/// decision once the (optional) advisor call has resolved.
pub struct WindowDecisionPoint {
    pub payload: TelemetryPayload,
    pub consult_advisor: bool,
    /// Set only when `consult_advisor` is false: which gate refused.
    pub refusal_tag: Option<&'static str>,
    telemetry: Telemetry,
    baseline: f64,
    sigma: f64,
    replicas: u32,
    have_baseline: bool,
}

fn robust_stats(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let baseline = median(samples);
    if samples.len() == 1 {
        return (baseline, 0.0);
    }
    let abs_dev: Vec<f64> = samples.iter().map(|x| (x - baseline).abs()).collect();
    let mad = median(&abs_dev);
    let sigma = if mad > 0.0 { 1.4826 * mad } else { 0.0 };
    (baseline, sigma)
}

fn median(samples: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn is_near_baseline(p95: f64, baseline: f64, sigma: f64, beta_down: f64) -> bool {
    if baseline <= 0.0 {
        return false;
    }
    let cushion = (5.0_f64).max(0.25 * sigma);
    p95 <= baseline * beta_down + cushion
}

/// §4.2.6: conservative fallback when the advisor is unavailable, refused,
/// or its result is being overridden by cooldown.
fn heuristic_decision(
    cfg: &PlannerConfig,
    p95: f64,
    baseline: f64,
    sigma: f64,
    replicas: u32,
    have_baseline: bool,
    low_flags: &VecDeque<bool>,
) -> Decision {
    if !have_baseline {
        return Decision::new(Action::Noop, &cfg.target, "warming");
    }
    let ratio = if baseline > 0.0 { p95 / baseline } else { 0.0 };
    let z = (p95 - baseline) / if sigma > 0.0 { sigma } else { 1.0 };

    if (ratio >= cfg.alpha_up || z >= 6.0) && replicas < cfg.max_replicas {
        return Decision::new(
            Action::ScaleUp,
            &cfg.target,
            format!("{ratio:.1}x baseline"),
        );
    }

    let low_enough = low_flags.len() == cfg.low_need_n && low_flags.iter().all(|&b| b);
    if low_enough && replicas > cfg.min_replicas {
        return Decision::new(
            Action::ScaleDown,
            &cfg.target,
            format!("near baseline for {}w", cfg.low_need_n),
        );
    }

    Decision::new(Action::Noop, &cfg.target, "heuristic")
}

impl Engine {
    pub fn new(cfg: PlannerConfig, now: f64) -> Self {
        let hist_windows = cfg.hist_windows.max(1);
        let low_need_n = cfg.low_need_n.max(1);
        let token_bucket = TokenBucket::new(cfg.llm_rpm, now);
        Self {
            cfg,
            p95_history: VecDeque::with_capacity(hist_windows),
            low_flags: VecDeque::with_capacity(low_need_n),
            last_action_ts: f64::NEG_INFINITY,
            last_llm_call_ts: f64::NEG_INFINITY,
            token_bucket,
            backoff: Backoff::new(),
            last_band_key: None,
        }
    }

    fn cooldown_ok(&self, now: f64) -> bool {
        (now - self.last_action_ts) >= self.cfg.cooldown_sec
    }

    /// Rolling baseline, near-baseline classifier, band-key cadence check,
    /// and the oracle safety gates (§4.2.1-4.2.4). Does not call the advisor.
    pub fn begin_window(&mut self, window: &LatencyWindow, now: f64) -> WindowDecisionPoint {
        let p95 = window.p95_ms;
        if self.p95_history.len() == self.cfg.hist_windows.max(1) {
            self.p95_history.pop_front();
        }
        self.p95_history.push_back(p95);

        let (mut baseline, sigma) = robust_stats(self.p95_history.make_contiguous());
        let have_baseline = self.p95_history.len() >= self.cfg.warmup_windows.max(1);
        if !have_baseline && self.cfg.idle_hint_ms > 0.0 && baseline == 0.0 {
            baseline = self.cfg.idle_hint_ms;
        }

        let replicas = window.replicas;

        let near = have_baseline && is_near_baseline(p95, baseline, sigma, self.cfg.beta_down);
        if self.low_flags.len() == self.cfg.low_need_n.max(1) {
            self.low_flags.pop_front();
        }
        self.low_flags.push_back(near);

        let low_windows: Vec<bool> = self.low_flags.iter().copied().collect();

        let ratio = if baseline > 0.0 { p95 / baseline } else { 0.0 };
        let band_key = BandKey {
            band: band_for(baseline, ratio),
            replicas,
            low_flags: low_windows.clone(),
        };
        let changed = self.last_band_key.as_ref() != Some(&band_key);
        self.last_band_key = Some(band_key);

        let mut rng = rand::thread_rng();
        let jitter: f64 = rng.gen_range(0.9..=1.1);
        let jittered_heartbeat = self.cfg.llm_heartbeat_sec * jitter;
        let heartbeat = (now - self.last_llm_call_ts) >= jittered_heartbeat;

        let cooldown_ok = self.cooldown_ok(now);
        let in_backoff = now < self.backoff.until_ts;

        let gates_pass =
            self.cfg.has_api_key && !in_backoff && (changed || heartbeat) && cooldown_ok;
        let consult_advisor = if gates_pass {
            self.token_bucket.try_take(self.cfg.llm_rpm, now)
        } else {
            false
        };

        let refusal_tag = if consult_advisor {
            None
        } else if in_backoff {
            Some("llm_backoff")
        } else if !self.cfg.has_api_key {
            Some("no_llm_key")
        } else if !cooldown_ok {
            Some("cooldown")
        } else {
            Some("cadence")
        };

        let pct_of_baseline = if baseline > 0.0 {
            Some(p95 / baseline)
        } else {
            None
        };
        let payload = TelemetryPayload {
            p95_ms: p95,
            baseline_ms: baseline,
            sigma_ms: sigma,
            pct_of_baseline,
            low_windows: low_windows.clone(),
            replicas,
            min_replicas: self.cfg.min_replicas,
            max_replicas: self.cfg.max_replicas,
            cooldown_ok,
            have_baseline,
            params: TelemetryParams {
                alpha_up: self.cfg.alpha_up,
                beta_down: self.cfg.beta_down,
                k_sigma: self.cfg.k_sigma,
                low_need_n: self.cfg.low_need_n,
                warmup_windows: self.cfg.warmup_windows,
            },
        };

        let telemetry = Telemetry {
            p95_ms: p95,
            baseline_ms: baseline,
            sigma_ms: sigma,
            low_windows,
            replicas,
        };

        WindowDecisionPoint {
            payload,
            consult_advisor,
            refusal_tag,
            telemetry,
            baseline,
            sigma,
            replicas,
            have_baseline,
        }
    }

    /// Applies the (optional) advisor outcome, falls back to the heuristic
    /// when refused or on failure, enforces cooldown, and emits the envelope.
    /// `advisor_result` must be `Some` iff `point.consult_advisor` was true.
    pub fn finish_window(
        &mut self,
        point: WindowDecisionPoint,
        advisor_result: Option<Result<AdvisorReply, AdvisorError>>,
        now: f64,
    ) -> PlanEnvelope {
        let p95 = point.telemetry.p95_ms;
        let low_flags = self.low_flags.clone();
        let low_flags = &low_flags;

        let mut decision = if point.consult_advisor {
            match advisor_result.expect("consult_advisor implies an advisor result") {
                Ok(reply) => {
                    self.last_llm_call_ts = now;
                    self.backoff.power = 0;
                    Decision::new(reply.action, &self.cfg.target, reply.reason)
                }
                Err(AdvisorError::RateLimited { retry_after }) => {
                    self.handle_rate_limited(retry_after, now);
                    let mut d = heuristic_decision(
                        &self.cfg,
                        p95,
                        point.baseline,
                        point.sigma,
                        point.replicas,
                        point.have_baseline,
                        low_flags,
                    );
                    d.reason = format!("{} (llm_backoff)", d.reason);
                    d
                }
                Err(AdvisorError::Other(err)) => {
                    let mut d = heuristic_decision(
                        &self.cfg,
                        p95,
                        point.baseline,
                        point.sigma,
                        point.replicas,
                        point.have_baseline,
                        low_flags,
                    );
                    d.reason = format!("{} (llm_fallback: {err})", d.reason);
                    d
                }
            }
        } else {
            let mut d = heuristic_decision(
                &self.cfg,
                p95,
                point.baseline,
                point.sigma,
                point.replicas,
                point.have_baseline,
                low_flags,
            );
            if let Some(tag) = point.refusal_tag {
                d.reason = format!("{} ({tag})", d.reason);
            }
            d
        };

        // Cooldown override (§4.2.7) applies regardless of decision source.
        if !self.cooldown_ok(now) && decision.action.is_impactful() {
            decision = Decision::new(Action::Noop, &self.cfg.target, "cooldown");
        }

        if decision.action.is_impactful() {
            self.last_action_ts = now;
        }

        PlanEnvelope::new(now, &self.cfg.target, decision, point.telemetry)
    }

    fn handle_rate_limited(&mut self, retry_after: Option<f64>, now: f64) {
        let wait = retry_after.unwrap_or_else(|| {
            self.cfg.llm_backoff_base_sec * 2f64.powi(self.backoff.power as i32)
        });
        let wait = wait.min(self.cfg.llm_backoff_max_sec);
        self.backoff.power = (self.backoff.power + 1).min(4);
        self.backoff.until_ts = now + wait;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(p95: f64, replicas: u32) -> LatencyWindow {
        LatencyWindow::new("http://lb/", 3.0, 40, 1.0, p95 * 0.6, p95, replicas, 0.0)
    }

    fn run_window(engine: &mut Engine, p95: f64, replicas: u32, now: f64) -> PlanEnvelope {
        let point = engine.begin_window(&window(p95, replicas), now);
        let advisor_result = if point.consult_advisor {
            Some(Err(AdvisorError::Other("no advisor in test".to_string())))
        } else {
            None
        };
        engine.finish_window(point, advisor_result, now)
    }

    #[test]
    fn scenario_1_cold_start_idle_traffic() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..11 {
            let env = run_window(&mut engine, 50.0, 2, i as f64);
            assert_eq!(env.decision.action, Action::Noop);
            assert!(env.decision.reason.starts_with("warming"));
        }
    }

    #[test]
    fn scenario_2_warmup_then_spike() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            let env = run_window(&mut engine, 50.0, 2, i as f64);
            assert_eq!(env.decision.action, Action::Noop);
        }
        let env = run_window(&mut engine, 1200.0, 2, 100.0);
        assert_eq!(env.decision.action, Action::ScaleUp);
        assert!(
            env.decision.reason.starts_with("24.0x baseline"),
            "got reason {:?}",
            env.decision.reason
        );
    }

    #[test]
    fn scenario_3_cooldown_suppression() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            run_window(&mut engine, 50.0, 2, i as f64);
        }
        let scale_up = run_window(&mut engine, 1200.0, 2, 100.0);
        assert_eq!(scale_up.decision.action, Action::ScaleUp);

        let suppressed = run_window(&mut engine, 1200.0, 3, 110.0);
        assert_eq!(suppressed.decision.action, Action::Noop);
        assert_eq!(suppressed.decision.reason, "cooldown");
    }

    #[test]
    fn scenario_4_drain_back_to_idle() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            run_window(&mut engine, 50.0, 2, i as f64);
        }
        run_window(&mut engine, 1200.0, 2, 100.0);

        let w1 = run_window(&mut engine, 52.0, 3, 121.0);
        assert_eq!(w1.decision.action, Action::Noop);
        let w2 = run_window(&mut engine, 52.0, 3, 142.0);
        assert_eq!(w2.decision.action, Action::Noop);
        let w3 = run_window(&mut engine, 52.0, 3, 163.0);
        assert_eq!(w3.decision.action, Action::ScaleDown);
        assert!(
            w3.decision.reason.starts_with("near baseline for 3w"),
            "got reason {:?}",
            w3.decision.reason
        );
    }

    #[test]
    fn invariant_no_scale_up_at_replica_cap() {
        let cfg = PlannerConfig {
            max_replicas: 3,
            ..PlannerConfig::default()
        };
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            run_window(&mut engine, 50.0, 3, i as f64);
        }
        let env = run_window(&mut engine, 1200.0, 3, 100.0);
        assert_ne!(env.decision.action, Action::ScaleUp);
    }

    #[test]
    fn invariant_no_scale_down_at_replica_floor() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..20 {
            let env = run_window(&mut engine, 50.0, 2, i as f64);
            assert_ne!(env.decision.action, Action::ScaleDown);
        }
    }

    #[test]
    fn telemetry_matches_window_under_decision() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            run_window(&mut engine, 50.0, 2, i as f64);
        }
        let env = run_window(&mut engine, 1200.0, 2, 100.0);
        assert_eq!(env.telemetry.p95_ms, 1200.0);
        assert_eq!(env.telemetry.replicas, 2);
    }

    #[test]
    fn identical_windows_at_baseline_scale_down_once_then_cooldown() {
        let cfg = PlannerConfig::default();
        let mut engine = Engine::new(cfg, 0.0);
        for i in 0..12 {
            run_window(&mut engine, 50.0, 3, i as f64);
        }
        let mut impactful = 0;
        let mut t = 12.0;
        for _ in 0..10 {
            let env = run_window(&mut engine, 50.0, 3, t);
            if env.decision.action.is_impactful() {
                impactful += 1;
            }
            t += 1.0;
        }
        assert!(impactful <= 1);
    }

    #[test]
    fn p95_quantile_is_order_independent() {
        let samples_a = vec![10.0, 20.0, 5.0, 30.0, 15.0];
        let mut samples_b = samples_a.clone();
        samples_b.reverse();
        assert_eq!(median(&samples_a), median(&samples_b));
    }
}
