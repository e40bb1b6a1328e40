mod config;
mod metrics;

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use autoscaler_core::bus::{publish, RedisBus};
use autoscaler_core::messages::LatencyWindow;
use autoscaler_core::runtime::{ContainerRuntime, DockerRuntime};
use clap::Parser;
use config::Args;
use eyre::Result;

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

async fn probe_once(client: &reqwest::Client, url: &str, timeout: Duration) -> (bool, f64) {
    let t0 = Instant::now();
    let ok = match client.get(url).timeout(timeout).send().await {
        Ok(resp) => (200..300).contains(&resp.status().as_u16()),
        Err(_) => false,
    };
    let dt_ms = t0.elapsed().as_secs_f64() * 1000.0;
    (ok, dt_ms)
}

async fn count_replicas(runtime: &dyn ContainerRuntime, primary: &str) -> u32 {
    match runtime.list_running(primary).await {
        Ok(containers) if !containers.is_empty() => containers.len() as u32,
        Ok(_) => 1,
        Err(err) => {
            tracing::debug!(error = %err, "replica introspection unavailable; reporting 1");
            1
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let client = reqwest::Client::new();
    let bus = RedisBus::new(&args.bus_url)?;
    let runtime: Option<DockerRuntime> = if args.no_runtime_introspection {
        None
    } else {
        Some(DockerRuntime::new())
    };

    tracing::info!(
        target_url = %args.target_url,
        sample_interval = args.sample_interval,
        probe_requests = args.probe_requests,
        "probe starting"
    );

    let mut interval = tokio::time::interval(args.sample_interval());
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                let mut latencies = Vec::with_capacity(args.probe_requests as usize);
                let mut successes = 0u32;
                for _ in 0..args.probe_requests {
                    let (ok, ms) = probe_once(&client, &args.target_url, args.timeout()).await;
                    if ok {
                        successes += 1;
                    }
                    latencies.push(ms);
                }

                let requests = latencies.len() as u32;
                let avg_ms = if requests > 0 {
                    latencies.iter().sum::<f64>() / requests as f64
                } else {
                    0.0
                };
                let p95_ms = metrics::p95(&latencies);
                let success_rate = if requests > 0 {
                    successes as f64 / requests as f64
                } else {
                    1.0
                };

                let replicas = match &runtime {
                    Some(rt) => count_replicas(rt, &args.primary_name).await,
                    None => 1,
                };

                let window = LatencyWindow::new(
                    args.target_url.clone(),
                    args.sample_interval,
                    requests,
                    round1000(success_rate),
                    round1(avg_ms),
                    round1(p95_ms),
                    replicas,
                    now_unix(),
                );

                tracing::info!(?window, "latency_metrics");
                publish(&bus, "alerts", &window).await;
            }
        }
    }

    Ok(())
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round1000(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
