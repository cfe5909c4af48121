use anyhow::anyhow;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const SCORING_TOTAL: &str = "scenario_scoring_total";
pub const SCORING_DURATION_US: &str = "scenario_scoring_duration_us";
pub const EXPR_ERRORS_TOTAL: &str = "scenario_expr_errors_total";
pub const THRESHOLD_REFRESH_TOTAL: &str = "scenario_threshold_refresh_total";
pub const THRESHOLD_GENERATION: &str = "scenario_threshold_generation";

/// One-time metric descriptions (so series carry help text on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(SCORING_TOTAL, "Scoring calls, labelled by the returned scenario.");
        describe_histogram!(
            SCORING_DURATION_US,
            Unit::Microseconds,
            "Wall time of one score_scenarios call."
        );
        describe_counter!(
            EXPR_ERRORS_TOTAL,
            "Expression evaluations that failed and degraded to false."
        );
        describe_counter!(
            THRESHOLD_REFRESH_TOTAL,
            "Threshold refreshes that published a new table."
        );
        describe_gauge!(THRESHOLD_GENERATION, "Generation of the published threshold table.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Binaries only; fails if a
    /// recorder is already installed.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow!("prometheus: install recorder: {e}"))?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Prometheus exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
