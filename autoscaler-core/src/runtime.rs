//! The container runtime driver is an external collaborator per spec §1;
//! only the operations the executor/watcher/probe actually invoke are
//! modeled here, generic over a trait the way the teacher parameterizes
//! over `ethers::providers::Middleware`. `DockerRuntime` shells out to the
//! `docker` CLI (the corpus ships no bundled Docker Engine API client);
//! `MockRuntime` is an in-memory table used by tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

pub const AGENTIC_TARGET_LABEL: &str = "agentic.target";

#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub labels: HashMap<String, String>,
    /// `(network_name, ip)` pairs in Docker's reported order; the first
    /// entry is "the first network" referred to throughout the spec.
    pub networks: Vec<(String, Option<String>)>,
}

impl ContainerInfo {
    pub fn is_opted_in(&self) -> bool {
        self.labels.get(AGENTIC_TARGET_LABEL).map(String::as_str) == Some("true")
    }

    pub fn first_network(&self) -> Option<&str> {
        self.networks.first().map(|(name, _)| name.as_str())
    }

    pub fn first_network_ip(&self) -> Option<&str> {
        self.networks.first().and_then(|(_, ip)| ip.as_deref())
    }
}

/// `^{base}-dup-\d+$`, the sibling naming contract shared by planner,
/// executor, watcher, and probe.
pub fn sibling_pattern(base: &str) -> Regex {
    Regex::new(&format!("^{}-dup-[0-9]+$", regex::escape(base))).expect("valid sibling regex")
}

pub fn sibling_name(base: &str, epoch_seconds: u64) -> String {
    format!("{base}-dup-{epoch_seconds}")
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// All containers named exactly `base` or matching its sibling pattern,
    /// running or not, sorted by name (so "last sibling" is deterministic).
    /// This is the executor's safety-wall count (§4.3): a stopped-but-not-
    /// yet-removed sibling still counts against the cap.
    async fn list_like(&self, base: &str) -> eyre::Result<Vec<ContainerInfo>>;

    /// Same matching rule as [`Self::list_like`] but running containers
    /// only — the replica count the probe (§6) and watcher (§4.4) must
    /// report. Defaults to `list_like` for runtimes that don't model a
    /// stopped state; `DockerRuntime` overrides it to exclude exited
    /// containers.
    async fn list_running(&self, base: &str) -> eyre::Result<Vec<ContainerInfo>> {
        self.list_like(base).await
    }

    async fn get(&self, name: &str) -> eyre::Result<Option<ContainerInfo>>;

    async fn start_sibling(
        &self,
        name: &str,
        image: &str,
        network: Option<&str>,
    ) -> eyre::Result<()>;

    async fn stop_and_remove(&self, name: &str, stop_grace: Duration) -> eyre::Result<()>;

    async fn restart(&self, name: &str, stop_grace: Duration) -> eyre::Result<()>;

    /// Runs `cmd` inside `container` (used by the watcher's proxy reload).
    async fn exec(&self, container: &str, cmd: &[&str]) -> eyre::Result<()>;
}

pub fn list_siblings<'a>(base: &str, all_like: &'a [ContainerInfo]) -> Vec<&'a ContainerInfo> {
    all_like.iter().filter(|c| c.name != base).collect()
}

/// In-memory runtime used by tests. Doesn't enforce Docker semantics beyond
/// what the spec's invariants require.
#[derive(Default)]
pub struct MockRuntime {
    containers: tokio::sync::Mutex<HashMap<String, ContainerInfo>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, container: ContainerInfo) {
        self.containers
            .lock()
            .await
            .insert(container.name.clone(), container);
    }

    pub async fn snapshot(&self) -> Vec<ContainerInfo> {
        self.containers.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn list_like(&self, base: &str) -> eyre::Result<Vec<ContainerInfo>> {
        let pattern = sibling_pattern(base);
        let containers = self.containers.lock().await;
        let mut out: Vec<ContainerInfo> = containers
            .values()
            .filter(|c| c.name == base || pattern.is_match(&c.name))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    async fn get(&self, name: &str) -> eyre::Result<Option<ContainerInfo>> {
        Ok(self.containers.lock().await.get(name).cloned())
    }

    async fn start_sibling(
        &self,
        name: &str,
        image: &str,
        network: Option<&str>,
    ) -> eyre::Result<()> {
        let networks = network
            .map(|n| vec![(n.to_string(), Some("10.0.0.2".to_string()))])
            .unwrap_or_default();
        self.containers.lock().await.insert(
            name.to_string(),
            ContainerInfo {
                name: name.to_string(),
                image: image.to_string(),
                labels: HashMap::from([(AGENTIC_TARGET_LABEL.to_string(), "true".to_string())]),
                networks,
            },
        );
        Ok(())
    }

    async fn stop_and_remove(&self, name: &str, _stop_grace: Duration) -> eyre::Result<()> {
        self.containers.lock().await.remove(name);
        Ok(())
    }

    async fn restart(&self, name: &str, _stop_grace: Duration) -> eyre::Result<()> {
        if !self.containers.lock().await.contains_key(name) {
            return Err(eyre::eyre!("container {name} not found"));
        }
        Ok(())
    }

    async fn exec(&self, _container: &str, _cmd: &[&str]) -> eyre::Result<()> {
        Ok(())
    }
}

/// Shells out to the `docker` CLI. Kept deliberately small: only the
/// operations §4.3/§4.4 actually need.
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> eyre::Result<String> {
        let output = tokio::process::Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| eyre::eyre!("failed to spawn docker: {e}"))?;
        if !output.status.success() {
            return Err(eyre::eyre!(
                "docker {:?} failed: {}",
                args,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerRuntime {
    async fn list_matching(&self, base: &str, all: bool) -> eyre::Result<Vec<ContainerInfo>> {
        let pattern = sibling_pattern(base);
        let mut args = vec!["ps"];
        if all {
            args.push("-a");
        }
        args.extend(["--format", "{{.Names}}"]);
        let out = self.run(&args).await?;
        let mut names: Vec<String> = out
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|n| !n.is_empty() && (n == base || pattern.is_match(n)))
            .collect();
        names.sort();

        let mut containers = Vec::with_capacity(names.len());
        for name in names {
            if let Some(info) = self.get(&name).await? {
                containers.push(info);
            }
        }
        Ok(containers)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_like(&self, base: &str) -> eyre::Result<Vec<ContainerInfo>> {
        self.list_matching(base, true).await
    }

    async fn list_running(&self, base: &str) -> eyre::Result<Vec<ContainerInfo>> {
        self.list_matching(base, false).await
    }

    async fn get(&self, name: &str) -> eyre::Result<Option<ContainerInfo>> {
        let output = tokio::process::Command::new("docker")
            .args(["inspect", name])
            .output()
            .await
            .map_err(|e| eyre::eyre!("failed to spawn docker: {e}"))?;
        if !output.status.success() {
            return Ok(None);
        }
        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| eyre::eyre!("failed to parse docker inspect output: {e}"))?;
        let entry = match parsed.get(0) {
            Some(e) => e,
            None => return Ok(None),
        };

        let image = entry
            .get("Config")
            .and_then(|c| c.get("Image"))
            .and_then(|i| i.as_str())
            .unwrap_or_default()
            .to_string();

        let labels: HashMap<String, String> = entry
            .get("Config")
            .and_then(|c| c.get("Labels"))
            .and_then(|l| l.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let networks = entry
            .get("NetworkSettings")
            .and_then(|n| n.get("Networks"))
            .and_then(|n| n.as_object())
            .map(|obj| {
                obj.iter()
                    .map(|(name, v)| {
                        let ip = v
                            .get("IPAddress")
                            .and_then(|i| i.as_str())
                            .map(String::from);
                        (name.clone(), ip)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Some(ContainerInfo {
            name: name.to_string(),
            image,
            labels,
            networks,
        }))
    }

    async fn start_sibling(
        &self,
        name: &str,
        image: &str,
        network: Option<&str>,
    ) -> eyre::Result<()> {
        let mut args = vec!["run", "-d", "--name", name];
        if let Some(net) = network {
            args.push("--network");
            args.push(net);
        }
        args.push(image);
        self.run(&args).await?;
        Ok(())
    }

    async fn stop_and_remove(&self, name: &str, stop_grace: Duration) -> eyre::Result<()> {
        let secs = stop_grace.as_secs().to_string();
        self.run(&["stop", "-t", &secs, name]).await?;
        self.run(&["rm", name]).await?;
        Ok(())
    }

    async fn restart(&self, name: &str, stop_grace: Duration) -> eyre::Result<()> {
        let secs = stop_grace.as_secs().to_string();
        self.run(&["restart", "-t", &secs, name]).await?;
        Ok(())
    }

    async fn exec(&self, container: &str, cmd: &[&str]) -> eyre::Result<()> {
        let mut args = vec!["exec", container];
        args.extend_from_slice(cmd);
        self.run(&args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_pattern_matches_contract() {
        let pattern = sibling_pattern("app");
        assert!(pattern.is_match("app-dup-1690000000"));
        assert!(!pattern.is_match("app"));
        assert!(!pattern.is_match("app-dup-abc"));
        assert!(!pattern.is_match("other-dup-123"));
    }

    #[tokio::test]
    async fn mock_runtime_lists_primary_and_siblings_sorted() {
        let rt = MockRuntime::new();
        rt.seed(ContainerInfo {
            name: "app".to_string(),
            image: "img".to_string(),
            labels: HashMap::new(),
            networks: vec![],
        })
        .await;
        rt.start_sibling("app-dup-200", "img", None).await.unwrap();
        rt.start_sibling("app-dup-100", "img", None).await.unwrap();

        let all = rt.list_like("app").await.unwrap();
        let names: Vec<&str> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["app", "app-dup-100", "app-dup-200"]);

        let siblings = list_siblings("app", &all);
        assert_eq!(siblings.len(), 2);
    }
}
