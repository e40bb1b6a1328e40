//! Pure dispatch logic against the `ContainerRuntime` trait boundary.
//! Kept free of bus I/O so it can be exercised directly in tests, mirroring
//! how `autoscaler_core::planner::Engine` separates decision from I/O.

use std::time::Duration;

use autoscaler_core::messages::{Action, ResultOutcome, ResultStatus};
use autoscaler_core::runtime::{list_siblings, sibling_name, ContainerRuntime};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// §4.3 step 1: look up `target` and enforce the opt-in label. `Ok(None)`
/// means dispatch should proceed; `Ok(Some(outcome))` means it was already
/// decided (not found, or present but not opted in).
pub async fn check_opt_in(
    rt: &dyn ContainerRuntime,
    target: &str,
) -> eyre::Result<Result<(), ResultOutcome>> {
    match rt.get(target).await? {
        None => Ok(Err(ResultOutcome::new(
            ResultStatus::Error,
            "target container not found",
        ))),
        Some(info) if !info.is_opted_in() => Ok(Err(ResultOutcome::new(
            ResultStatus::Skipped,
            "target not labeled agentic.target=true",
        ))),
        Some(_) => Ok(Ok(())),
    }
}

pub async fn dispatch(
    rt: &dyn ContainerRuntime,
    action: Action,
    target: &str,
    max_replicas: usize,
) -> eyre::Result<ResultOutcome> {
    match action {
        Action::Restart => {
            rt.restart(target, STOP_GRACE).await?;
            Ok(ResultOutcome::new(
                ResultStatus::Ok,
                format!("restarted {target}"),
            ))
        }
        Action::ScaleUp => scale_up(rt, target, max_replicas).await,
        Action::ScaleDown => scale_down(rt, target).await,
        Action::Noop => Ok(ResultOutcome::new(ResultStatus::Ok, "noop")),
    }
}

async fn scale_up(
    rt: &dyn ContainerRuntime,
    target: &str,
    max_replicas: usize,
) -> eyre::Result<ResultOutcome> {
    let all_like = rt.list_like(target).await?;
    if all_like.len() >= max_replicas {
        return Ok(ResultOutcome::new(
            ResultStatus::Noop,
            format!("max replicas {max_replicas} reached"),
        ));
    }

    let base = rt
        .get(target)
        .await?
        .ok_or_else(|| eyre::eyre!("target {target} disappeared before scale_up"))?;

    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let name = sibling_name(target, epoch);

    rt.start_sibling(&name, &base.image, base.first_network())
        .await?;
    Ok(ResultOutcome::new(
        ResultStatus::Ok,
        format!("started {name} from {}", base.image),
    ))
}

async fn scale_down(rt: &dyn ContainerRuntime, target: &str) -> eyre::Result<ResultOutcome> {
    let all_like = rt.list_like(target).await?;
    let siblings = list_siblings(target, &all_like);
    let Some(last) = siblings.last() else {
        return Ok(ResultOutcome::new(
            ResultStatus::Noop,
            "no siblings to remove",
        ));
    };
    let name = last.name.clone();
    rt.stop_and_remove(&name, STOP_GRACE).await?;
    Ok(ResultOutcome::new(
        ResultStatus::Ok,
        format!("removed {name}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoscaler_core::runtime::{ContainerInfo, MockRuntime, AGENTIC_TARGET_LABEL};
    use std::collections::HashMap;

    fn opted_in(name: &str) -> ContainerInfo {
        ContainerInfo {
            name: name.to_string(),
            image: "app:latest".to_string(),
            labels: HashMap::from([(AGENTIC_TARGET_LABEL.to_string(), "true".to_string())]),
            networks: vec![("net0".to_string(), Some("10.0.0.5".to_string()))],
        }
    }

    #[tokio::test]
    async fn missing_target_is_error() {
        let rt = MockRuntime::new();
        let outcome = check_opt_in(&rt, "app").await.unwrap().unwrap_err();
        assert_eq!(outcome.status, ResultStatus::Error);
    }

    #[tokio::test]
    async fn unlabeled_target_is_skipped() {
        let rt = MockRuntime::new();
        rt.seed(ContainerInfo {
            name: "app".to_string(),
            image: "app:latest".to_string(),
            labels: HashMap::new(),
            networks: vec![],
        })
        .await;
        let outcome = check_opt_in(&rt, "app").await.unwrap().unwrap_err();
        assert_eq!(outcome.status, ResultStatus::Skipped);
    }

    #[tokio::test]
    async fn scale_up_starts_sibling_with_same_image_and_network() {
        let rt = MockRuntime::new();
        rt.seed(opted_in("app")).await;
        let outcome = dispatch(&rt, Action::ScaleUp, "app", 5).await.unwrap();
        assert_eq!(outcome.status, ResultStatus::Ok);
        let siblings = list_siblings("app", &rt.list_like("app").await.unwrap()).len();
        assert_eq!(siblings, 1);
    }

    #[tokio::test]
    async fn scale_up_refuses_at_cap() {
        let rt = MockRuntime::new();
        rt.seed(opted_in("app")).await;
        rt.start_sibling("app-dup-1", "app:latest", None)
            .await
            .unwrap();
        let outcome = dispatch(&rt, Action::ScaleUp, "app", 2).await.unwrap();
        assert_eq!(outcome.status, ResultStatus::Noop);
        assert_eq!(outcome.message.as_deref(), Some("max replicas 2 reached"));
    }

    #[tokio::test]
    async fn scale_down_with_no_siblings_is_noop() {
        let rt = MockRuntime::new();
        rt.seed(opted_in("app")).await;
        let outcome = dispatch(&rt, Action::ScaleDown, "app", 5).await.unwrap();
        assert_eq!(outcome.status, ResultStatus::Noop);
        assert_eq!(outcome.message.as_deref(), Some("no siblings to remove"));
    }

    #[tokio::test]
    async fn scale_down_removes_last_sibling_by_name() {
        let rt = MockRuntime::new();
        rt.seed(opted_in("app")).await;
        rt.start_sibling("app-dup-100", "app:latest", None)
            .await
            .unwrap();
        rt.start_sibling("app-dup-200", "app:latest", None)
            .await
            .unwrap();
        let outcome = dispatch(&rt, Action::ScaleDown, "app", 5).await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("removed app-dup-200"));
        let remaining = rt.list_like("app").await.unwrap();
        assert!(remaining.iter().any(|c| c.name == "app-dup-100"));
        assert!(!remaining.iter().any(|c| c.name == "app-dup-200"));
    }
}
