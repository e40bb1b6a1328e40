use std::sync::Arc;

use autoscaler_core::messages::{ActionResult, LatencyWindow};
use serde::Serialize;
use tokio::sync::Mutex;

const MAX_EVENTS: usize = 100;

#[derive(Debug, Default, Serialize)]
pub struct ViewState {
    pub latency: Option<LatencyWindow>,
    pub events: Vec<ActionResult>,
}

impl ViewState {
    fn record_latency(&mut self, window: LatencyWindow) {
        self.latency = Some(window);
    }

    fn record_result(&mut self, result: ActionResult) {
        self.events.push(result);
        if self.events.len() > MAX_EVENTS {
            let overflow = self.events.len() - MAX_EVENTS;
            self.events.drain(0..overflow);
        }
    }
}

pub type SharedState = Arc<Mutex<ViewState>>;

pub async fn apply_latency(state: &SharedState, window: LatencyWindow) {
    state.lock().await.record_latency(window);
}

pub async fn apply_result(state: &SharedState, result: ActionResult) {
    state.lock().await.record_result(result);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: u32) -> ActionResult {
        ActionResult {
            ts: n as f64,
            action: autoscaler_core::messages::Action::Noop,
            target: "app".to_string(),
            reason: "heuristic".to_string(),
            result: autoscaler_core::messages::ResultOutcome::status_only(
                autoscaler_core::messages::ResultStatus::Ok,
            ),
        }
    }

    #[test]
    fn event_log_is_bounded_to_100() {
        let mut state = ViewState::default();
        for n in 0..150 {
            state.record_result(result(n));
        }
        assert_eq!(state.events.len(), MAX_EVENTS);
        assert_eq!(state.events.first().unwrap().ts, 50.0);
        assert_eq!(state.events.last().unwrap().ts, 149.0);
    }
}
