use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "executor",
    version,
    about = "Applies planner decisions to the container runtime"
)]
pub struct Args {
    /// Independent hard cap on total replicas (base + siblings); wins over
    /// whatever the planner believed it was bounding.
    #[arg(long, env = "MAX_REPLICAS", default_value_t = 5)]
    pub max_replicas: usize,

    #[arg(long, env = "BUS_URL", default_value = "redis://127.0.0.1:6379")]
    pub bus_url: String,
}
