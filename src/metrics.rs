//! Prometheus metrics for the ruo operator.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Labels identifying one `UpgradePlan`.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PlanLabels {
    pub name: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    pub name: String,
    pub namespace: String,
    pub result: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PhaseLabels {
    pub name: String,
    pub namespace: String,
    pub phase: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReleaseLabels {
    pub name: String,
    pub namespace: String,
    pub release: String,
}

pub struct Metrics {
    pub reconcile_total: Family<ReconcileLabels, Counter>,
    pub reconcile_duration_seconds: Family<PlanLabels, Histogram>,
    pub upgrade_phase_info: Family<PhaseLabels, Gauge>,
    pub upgrade_completed_total: Family<ReleaseLabels, Counter>,
    pub condition_failed_total: Family<PlanLabels, Counter>,
    pub phase_transition_total: Family<PhaseLabels, Counter>,
    pub phase_duration_seconds: Family<PhaseLabels, Histogram>,
    /// When the current phase of each plan started.
    phase_start_times: Mutex<HashMap<PlanLabels, Instant>>,
    /// Label values recorded per plan, dropped with [`Metrics::forget`].
    series: Mutex<HashMap<PlanLabels, PlanSeries>>,
}

#[derive(Default)]
struct PlanSeries {
    phases: BTreeSet<String>,
    releases: BTreeSet<String>,
}

/// Values of the `result` label on `ruo_reconcile`.
pub const RECONCILE_RESULTS: [&str; 3] = ["success", "requeue", "error"];

const RECONCILE_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// 1s to 2h: OS phases reboot every node in turn.
const PHASE_DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0,
];

impl Metrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let reconcile_total = Family::<ReconcileLabels, Counter>::default();
        registry.register(
            "ruo_reconcile",
            "Total number of reconcile calls",
            reconcile_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<PlanLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(RECONCILE_BUCKETS.iter().copied())
            });
        registry.register(
            "ruo_reconcile_duration_seconds",
            "Duration of reconcile calls in seconds",
            reconcile_duration_seconds.clone(),
        );

        let upgrade_phase_info = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "ruo_upgrade_phase_info",
            "Current upgrade phase (1=active, 0=inactive)",
            upgrade_phase_info.clone(),
        );

        let upgrade_completed_total = Family::<ReleaseLabels, Counter>::default();
        registry.register(
            "ruo_upgrade_completed",
            "Total number of upgrades that finished every component",
            upgrade_completed_total.clone(),
        );

        let condition_failed_total = Family::<PlanLabels, Counter>::default();
        registry.register(
            "ruo_condition_failed",
            "Total number of component conditions that turned Failed",
            condition_failed_total.clone(),
        );

        let phase_transition_total = Family::<PhaseLabels, Counter>::default();
        registry.register(
            "ruo_phase_transition",
            "Total number of phase transitions",
            phase_transition_total.clone(),
        );

        let phase_duration_seconds = Family::<PhaseLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(PHASE_DURATION_BUCKETS.iter().copied())
        });
        registry.register(
            "ruo_phase_duration_seconds",
            "Time spent in each upgrade phase in seconds",
            phase_duration_seconds.clone(),
        );

        Self {
            reconcile_total,
            reconcile_duration_seconds,
            upgrade_phase_info,
            upgrade_completed_total,
            condition_failed_total,
            phase_transition_total,
            phase_duration_seconds,
            phase_start_times: Mutex::new(HashMap::new()),
            series: Mutex::new(HashMap::new()),
        }
    }

    fn start_times(&self) -> MutexGuard<'_, HashMap<PlanLabels, Instant>> {
        self.phase_start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn series(&self) -> MutexGuard<'_, HashMap<PlanLabels, PlanSeries>> {
        self.series.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn observe_reconcile(&self, plan: &PlanLabels, result: &str, elapsed: Duration) {
        self.reconcile_total
            .get_or_create(&ReconcileLabels {
                name: plan.name.clone(),
                namespace: plan.namespace.clone(),
                result: result.to_string(),
            })
            .inc();
        self.reconcile_duration_seconds
            .get_or_create(plan)
            .observe(elapsed.as_secs_f64());
    }

    /// Track the start of the current phase. Idempotent across reconcile loops.
    pub fn ensure_phase_start(&self, plan: &PlanLabels) {
        self.start_times()
            .entry(plan.clone())
            .or_insert_with(Instant::now);
    }

    /// Observe how long the finished phase took. `None` if its start was never seen.
    pub fn observe_phase_duration(&self, plan: &PlanLabels, phase: &str) -> Option<f64> {
        let start = self.start_times().remove(plan)?;
        let duration = start.elapsed().as_secs_f64();
        self.phase_duration_seconds
            .get_or_create(&phase_labels(plan, phase))
            .observe(duration);
        Some(duration)
    }

    /// Record the active phase, emitting transition metrics when it moved.
    pub fn record_phase(&self, plan: &PlanLabels, previous: &str, current: &str) {
        {
            let mut series = self.series();
            let phases = &mut series.entry(plan.clone()).or_default().phases;
            phases.insert(previous.to_string());
            phases.insert(current.to_string());
        }

        if previous == current {
            self.upgrade_phase_info
                .get_or_create(&phase_labels(plan, current))
                .set(1);
            self.ensure_phase_start(plan);
            return;
        }

        self.observe_phase_duration(plan, previous);
        self.upgrade_phase_info
            .get_or_create(&phase_labels(plan, previous))
            .set(0);
        self.upgrade_phase_info
            .get_or_create(&phase_labels(plan, current))
            .set(1);
        self.phase_transition_total
            .get_or_create(&phase_labels(plan, current))
            .inc();
        self.ensure_phase_start(plan);
    }

    pub fn record_completed(&self, plan: &PlanLabels, release: &str) {
        self.series()
            .entry(plan.clone())
            .or_default()
            .releases
            .insert(release.to_string());
        self.upgrade_completed_total
            .get_or_create(&ReleaseLabels {
                name: plan.name.clone(),
                namespace: plan.namespace.clone(),
                release: release.to_string(),
            })
            .inc();
    }

    pub fn record_failed_conditions(&self, plan: &PlanLabels, count: usize) {
        if count > 0 {
            self.condition_failed_total
                .get_or_create(plan)
                .inc_by(count as u64);
        }
    }
}

impl Metrics {
    /// Drop every series of a deleted plan.
    pub fn forget(&self, plan: &PlanLabels) {
        self.start_times().remove(plan);
        let series = self.series().remove(plan).unwrap_or_default();

        for result in RECONCILE_RESULTS {
            self.reconcile_total.remove(&ReconcileLabels {
                name: plan.name.clone(),
                namespace: plan.namespace.clone(),
                result: result.to_string(),
            });
        }
        self.reconcile_duration_seconds.remove(plan);
        self.condition_failed_total.remove(plan);

        for phase in &series.phases {
            let labels = phase_labels(plan, phase);
            self.upgrade_phase_info.remove(&labels);
            self.phase_transition_total.remove(&labels);
            self.phase_duration_seconds.remove(&labels);
        }
        for release in series.releases {
            self.upgrade_completed_total.remove(&ReleaseLabels {
                name: plan.name.clone(),
                namespace: plan.namespace.clone(),
                release,
            });
        }
    }
}

fn phase_labels(plan: &PlanLabels, phase: &str) -> PhaseLabels {
    PhaseLabels {
        name: plan.name.clone(),
        namespace: plan.namespace.clone(),
        phase: phase.to_string(),
    }
}

/// Axum handler that encodes the registry as OpenMetrics text.
async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut buf = String::new();
    if encode(&mut buf, &registry).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics".to_string(),
        );
    }
    (StatusCode::OK, buf)
}

/// Start the metrics server on the given port.
pub async fn serve(port: u16, registry: Arc<Registry>) -> anyhow::Result<()> {
    use axum::Router;
    use axum::routing::get;
    use tokio::net::TcpListener;
    use tracing::info;

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    info!("Metrics server listening on port {}", port);
    axum::serve(listener, app).await?;
    Ok(())
}
