use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "view",
    version,
    about = "Read-only HTTP surface over the autoscaler's bus traffic"
)]
pub struct Args {
    #[arg(long, env = "BUS_URL", default_value = "redis://127.0.0.1:6379")]
    pub bus_url: String,

    #[arg(long, env = "VIEW_BIND", default_value = "0.0.0.0:8090")]
    pub bind: String,
}
