mod conf;
mod config;

use std::path::PathBuf;

use autoscaler_core::runtime::{ContainerRuntime, DockerRuntime};
use clap::Parser;
use config::Args;
use eyre::Result;

fn backend_list(containers: &[autoscaler_core::runtime::ContainerInfo], port: u16) -> Vec<String> {
    let mut backends: Vec<String> = containers
        .iter()
        .filter_map(|c| c.first_network_ip().map(|ip| format!("{ip}:{port}")))
        .collect();
    backends.sort();
    backends
}

async fn reload_proxy(rt: &dyn ContainerRuntime, lb_container: &str) {
    if rt
        .exec(lb_container, &["nginx", "-s", "reload"])
        .await
        .is_ok()
    {
        return;
    }
    tracing::warn!("nginx -s reload failed in {lb_container}, falling back to kill -HUP 1");
    if let Err(err) = rt.exec(lb_container, &["sh", "-lc", "kill -HUP 1"]).await {
        tracing::error!(error = %err, "proxy reload fallback also failed");
    }
}

async fn reconcile(
    rt: &dyn ContainerRuntime,
    args: &Args,
    last: &mut Vec<String>,
    conf_path: &std::path::Path,
) {
    let containers = match rt.list_running(&args.primary_name).await {
        Ok(c) => c,
        Err(err) => {
            tracing::warn!(error = %err, "failed to list containers for reconciliation");
            return;
        }
    };

    let backends = backend_list(&containers, args.app_port);
    if &backends == last {
        return;
    }

    let body = conf::render_upstream_conf(&backends);
    let changed = match std::fs::read_to_string(conf_path) {
        Ok(existing) => existing != body,
        Err(_) => true,
    };

    if changed {
        if let Err(err) = std::fs::create_dir_all(conf_path.parent().unwrap_or(conf_path)) {
            tracing::error!(error = %err, "failed to create conf dir");
            return;
        }
        if let Err(err) = std::fs::write(conf_path, &body) {
            tracing::error!(error = %err, "failed to write upstream conf");
            return;
        }
        tracing::info!(backends = ?backends, "upstream list changed, reloading proxy");
        reload_proxy(rt, &args.lb_container).await;
    }

    *last = backends;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = DockerRuntime::new();
    let conf_path = PathBuf::from(&args.conf_dir).join("upstreams.conf");

    tracing::info!(
        primary_name = %args.primary_name,
        conf_dir = %args.conf_dir,
        "watcher starting"
    );

    let mut last: Vec<String> = Vec::new();
    let mut interval = tokio::time::interval(args.reconcile_interval());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
            _ = interval.tick() => {
                reconcile(&runtime, &args, &mut last, &conf_path).await;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_core::runtime::ContainerInfo;

    fn with_ip(name: &str, ip: &str) -> ContainerInfo {
        ContainerInfo {
            name: name.to_string(),
            image: "app:latest".to_string(),
            labels: Default::default(),
            networks: vec![("net0".to_string(), Some(ip.to_string()))],
        }
    }

    #[test]
    fn backend_list_is_sorted_and_skips_containers_without_ips() {
        let containers = vec![
            with_ip("app-dup-200", "10.0.0.3"),
            with_ip("app", "10.0.0.1"),
            ContainerInfo {
                name: "app-dup-100".to_string(),
                image: "app:latest".to_string(),
                labels: Default::default(),
                networks: vec![],
            },
        ];
        let backends = backend_list(&containers, 8080);
        assert_eq!(
            backends,
            vec!["10.0.0.1:8080".to_string(), "10.0.0.3:8080".to_string()]
        );
    }
}
