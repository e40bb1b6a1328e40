use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "probe",
    version,
    about = "Samples endpoint latency and publishes latency_metrics"
)]
pub struct Args {
    /// Seconds between windows.
    #[arg(long, env = "SAMPLE_INTERVAL", default_value_t = 3.0)]
    pub sample_interval: f64,

    /// Sequential GETs issued per window.
    #[arg(long, env = "PROBE_REQUESTS", default_value_t = 40)]
    pub probe_requests: u32,

    /// Endpoint to sample.
    #[arg(long, env = "TARGET_URL", default_value = "http://lb/")]
    pub target_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "TIMEOUT_S", default_value_t = 2.5)]
    pub timeout_s: f64,

    /// Name of the primary container, used to count replicas via Docker.
    #[arg(long, env = "PRIMARY_NAME", default_value = "app")]
    pub primary_name: String,

    /// Redis URL backing the bus.
    #[arg(long, env = "BUS_URL", default_value = "redis://127.0.0.1:6379")]
    pub bus_url: String,

    /// Skip Docker introspection and always report 1 replica.
    #[arg(long, env = "NO_RUNTIME_INTROSPECTION")]
    pub no_runtime_introspection: bool,
}

impl Args {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.sample_interval.max(0.0))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s.max(0.0))
    }
}
