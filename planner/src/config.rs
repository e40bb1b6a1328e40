use autoscaler_core::planner::PlannerConfig;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "planner",
    version,
    about = "Latency-baseline decision engine for the autoscaler"
)]
pub struct Args {
    #[arg(
        long,
        env = "LLM_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
    )]
    pub llm_url: String,

    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    pub llm_api_key: String,

    #[arg(long, env = "COOLDOWN_SEC", default_value_t = 20.0)]
    pub cooldown_sec: f64,

    #[arg(long, env = "MIN_REPLICAS", default_value_t = 2)]
    pub min_replicas: u32,

    #[arg(long, env = "MAX_REPLICAS", default_value_t = 10)]
    pub max_replicas: u32,

    #[arg(long, env = "LLM_RPM", default_value_t = 2.0)]
    pub llm_rpm: f64,

    #[arg(long, env = "LLM_HEARTBEAT_SEC", default_value_t = 300.0)]
    pub llm_heartbeat_sec: f64,

    #[arg(long, env = "LLM_BACKOFF_BASE_SEC", default_value_t = 10.0)]
    pub llm_backoff_base_sec: f64,

    #[arg(long, env = "LLM_BACKOFF_MAX_SEC", default_value_t = 300.0)]
    pub llm_backoff_max_sec: f64,

    #[arg(long, env = "HIST_WINDOWS", default_value_t = 60)]
    pub hist_windows: usize,

    #[arg(long, env = "WARMUP_WINDOWS", default_value_t = 12)]
    pub warmup_windows: usize,

    #[arg(long, env = "LOW_NEED_N", default_value_t = 3)]
    pub low_need_n: usize,

    #[arg(long, env = "ALPHA_UP", default_value_t = 8.0)]
    pub alpha_up: f64,

    #[arg(long, env = "BETA_DOWN", default_value_t = 1.10)]
    pub beta_down: f64,

    #[arg(long, env = "K_SIGMA", default_value_t = 2.5)]
    pub k_sigma: f64,

    #[arg(long, env = "IDLE_HINT_MS", default_value_t = 0.0)]
    pub idle_hint_ms: f64,

    /// Primary container/deployment identifier the planner targets.
    #[arg(long, env = "PRIMARY_NAME", default_value = "app")]
    pub primary_name: String,

    #[arg(long, env = "BUS_URL", default_value = "redis://127.0.0.1:6379")]
    pub bus_url: String,
}

impl Args {
    pub fn has_api_key(&self) -> bool {
        !self.llm_api_key.trim().is_empty()
    }

    pub fn engine_config(&self) -> PlannerConfig {
        if self.llm_backoff_base_sec > self.llm_backoff_max_sec {
            tracing::warn!(
                base = self.llm_backoff_base_sec,
                max = self.llm_backoff_max_sec,
                "LLM_BACKOFF_BASE_SEC > LLM_BACKOFF_MAX_SEC; clamping base to max"
            );
        }
        PlannerConfig {
            target: self.primary_name.clone(),
            cooldown_sec: self.cooldown_sec,
            min_replicas: self.min_replicas,
            max_replicas: self.max_replicas,
            llm_rpm: self.llm_rpm,
            llm_heartbeat_sec: self.llm_heartbeat_sec,
            llm_backoff_base_sec: self.llm_backoff_base_sec.min(self.llm_backoff_max_sec),
            llm_backoff_max_sec: self.llm_backoff_max_sec,
            hist_windows: self.hist_windows,
            warmup_windows: self.warmup_windows,
            low_need_n: self.low_need_n,
            alpha_up: self.alpha_up,
            beta_down: self.beta_down,
            k_sigma: self.k_sigma,
            idle_hint_ms: self.idle_hint_ms,
            has_api_key: self.has_api_key(),
        }
    }
}
