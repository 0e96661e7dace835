use anyhow::{anyhow, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use shuttle_axum::axum::{routing::get, Router};

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder once per process; later calls reuse it.
    pub fn init() -> Result<Self> {
        let handle = HANDLE
            .get_or_try_init(|| {
                let handle = PrometheusBuilder::new()
                    .install_recorder()
                    .map_err(|e| anyhow!("prometheus: install recorder: {e}"))?;
                describe();
                Ok::<_, anyhow::Error>(handle)
            })?
            .clone();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("guard_turns_total", "Turns processed by the decision engine");
    describe_counter!("guard_alerts_dispatched_total", "Alert dispatch attempts");
    describe_counter!("guard_alerts_throttled_total", "Alerts held back by the cooldown");
    describe_counter!("guard_questions_suggested_total", "Verification questions surfaced");
    describe_counter!("guard_oracle_failures_total", "Failed or timed out port calls, by port");
    describe_counter!("guard_numbers_reported_total", "Suspicious-number reports");
    describe_counter!("guard_wake_detections_total", "Wake word detections");
    describe_counter!("guard_fragments_dropped_total", "Final fragments dropped on a full analysis backlog");
    describe_gauge!("guard_active_sessions", "Sessions currently published in the registry");
}
