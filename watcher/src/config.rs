use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "watcher",
    version,
    about = "Keeps the reverse proxy's upstream list in sync with live replicas"
)]
pub struct Args {
    /// Name of the primary container; siblings match `{primary}-dup-<epoch>`.
    #[arg(long, env = "PRIMARY_NAME", default_value = "app")]
    pub primary_name: String,

    /// Directory the upstream config is written into.
    #[arg(long, env = "CONF_DIR", default_value = "/work/conf.d")]
    pub conf_dir: String,

    /// Port the backends listen on.
    #[arg(long, env = "APP_PORT", default_value_t = 8080)]
    pub app_port: u16,

    /// Container name of the reverse proxy, reloaded via `exec`.
    #[arg(long, env = "LB_CONTAINER", default_value = "lb")]
    pub lb_container: String,

    /// Seconds between reconciliation passes.
    #[arg(long, env = "RECONCILE_INTERVAL", default_value_t = 3.0)]
    pub reconcile_interval: f64,
}

impl Args {
    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs_f64(self.reconcile_interval.max(0.1))
    }
}
