//! Workload phase: upgrade one release chart with its dependency and add-on charts.
//!
//! Dependencies block: the first one not at the target version halts the
//! workload with its own condition. Add-ons never block: their outcomes are
//! reported as events, only an add-on still in progress holds the workload.

use std::time::Duration;

use tracing::{debug, warn};

use super::PhaseContext;
use crate::chart::{self, ChartState};
use crate::cluster::EventKind;
use crate::crd::{ReleaseChart, UpgradePlanStatus, workload_condition_type};
use crate::error::{Result, RuoError};
use crate::external::HelmChart;
use crate::status;

enum Step {
    Continue,
    Halt(Option<Duration>),
}

fn multiple_charts_message(release_name: &str) -> String {
    RuoError::MultipleHelmCharts(release_name.to_string()).to_string()
}

/// Record a chart state on the workload condition.
fn apply(
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    state: ChartState,
    release_name: &str,
) -> Option<Duration> {
    let (reason, requeue) = state.outcome();
    status::set_condition(
        status,
        condition_type,
        reason,
        state.formatted_message(release_name),
    );
    requeue.then_some(Duration::ZERO)
}

/// Evaluate a blocking chart. Ambiguous `HelmChart`s fail the workload.
async fn evaluate_blocking(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    target: &ReleaseChart,
    resources: &[HelmChart],
) -> Result<Result<ChartState, Option<Duration>>> {
    match chart::evaluate(ctx, target, resources).await {
        Ok(state) => Ok(Ok(state)),
        Err(RuoError::MultipleHelmCharts(name)) => {
            status::set_failed(status, condition_type, multiple_charts_message(&name));
            Ok(Err(Some(Duration::ZERO)))
        }
        Err(e) => Err(e),
    }
}

async fn dependencies(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    workload: &ReleaseChart,
    resources: &[HelmChart],
) -> Result<Step> {
    for dependency in &workload.dependency_charts {
        let state =
            match evaluate_blocking(ctx, status, condition_type, dependency, resources).await? {
                Ok(state) => state,
                Err(requeue) => return Ok(Step::Halt(requeue)),
            };
        debug!("Dependency chart {} is {}", dependency.release_name, state);

        if !state.is_done() {
            let requeue = apply(status, condition_type, state, &dependency.release_name);
            return Ok(Step::Halt(requeue));
        }
    }
    Ok(Step::Continue)
}

async fn addons(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    workload: &ReleaseChart,
    resources: &[HelmChart],
) -> Result<Step> {
    for addon in &workload.addon_charts {
        let state = match chart::evaluate(ctx, addon, resources).await {
            Ok(state) => state,
            Err(RuoError::MultipleHelmCharts(name)) => {
                warn!("Skipping add-on {}: multiple HelmCharts", name);
                ctx.event(
                    EventKind::Warning,
                    condition_type,
                    &multiple_charts_message(&name),
                )
                .await;
                continue;
            }
            Err(e) => return Err(e),
        };
        debug!("Add-on chart {} is {}", addon.release_name, state);

        match state {
            ChartState::Failed => {
                let message = format!(
                    "'{}' upgraded successfully, but add-on component '{}' failed to upgrade",
                    workload.release_name, addon.release_name
                );
                ctx.event(EventKind::Warning, condition_type, &message).await;
            }
            ChartState::NotInstalled => {
                let message = format!(
                    "'{}' add-on component upgrade skipped as it is missing in the cluster",
                    addon.release_name
                );
                ctx.event(EventKind::Normal, condition_type, &message).await;
            }
            ChartState::Succeeded => {
                let message = format!(
                    "'{}' add-on component successfully upgraded",
                    addon.release_name
                );
                ctx.event(EventKind::Normal, condition_type, &message).await;
            }
            ChartState::VersionAlreadyInstalled => {}
            ChartState::InProgress => {
                status::set_in_progress(
                    status,
                    condition_type,
                    state.formatted_message(&addon.release_name),
                );
                return Ok(Step::Halt(Some(ctx.settings.node_poll_interval)));
            }
            ChartState::Unknown => return Ok(Step::Halt(None)),
        }
    }
    Ok(Step::Continue)
}

/// Advance one workload: dependencies first, then the core chart, then add-ons.
pub async fn execute(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    workload: &ReleaseChart,
) -> Result<Option<Duration>> {
    let resources = ctx.cluster.list_helm_charts().await?;
    let condition_type = workload_condition_type(&workload.pretty_name);

    if let Step::Halt(requeue) =
        dependencies(ctx, status, &condition_type, workload, &resources).await?
    {
        return Ok(requeue);
    }

    let core = match evaluate_blocking(ctx, status, &condition_type, workload, &resources).await? {
        Ok(state) => state,
        Err(requeue) => return Ok(requeue),
    };

    if core == ChartState::NotInstalled && !workload.dependency_charts.is_empty() {
        status::set_failed(
            status,
            &condition_type,
            format!(
                "'{}' core chart is missing, but dependency charts are present",
                workload.release_name
            ),
        );
        return Ok(Some(Duration::ZERO));
    }

    if !core.is_done() {
        return Ok(apply(status, &condition_type, core, &workload.release_name));
    }

    if let Step::Halt(requeue) = addons(ctx, status, &condition_type, workload, &resources).await? {
        return Ok(requeue);
    }

    // Report the core chart, whatever the add-ons did.
    Ok(apply(status, &condition_type, core, &workload.release_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::{helm_chart, installed, job, release_chart, upgrade_plan};
    use crate::cluster::fake::{FakeCluster, FakeState};
    use crate::config::Settings;
    use crate::crd::UpgradeReason;

    const CONDITION: &str = "Metal3Upgraded";

    fn workload(dependencies: &[&str], addons: &[&str]) -> ReleaseChart {
        let mut metal3 = release_chart("metal3", "0.8.0");
        metal3.pretty_name = "Metal3".to_string();
        metal3.dependency_charts = dependencies
            .iter()
            .map(|name| release_chart(name, "0.8.0"))
            .collect();
        metal3.addon_charts = addons.iter().map(|name| release_chart(name, "0.8.0")).collect();
        metal3
    }

    /// Chart at the target version, upgraded by this release and finished.
    fn upgraded(state: &mut FakeState, name: &str) {
        let job_name = format!("helm-install-{name}");
        state.helm_releases.push(installed(name, "0.8.0"));
        state.helm_charts.push(helm_chart(name, "0.8.0", "3.1.0", &job_name));
        state.jobs.push(job(&job_name, Some("Complete")));
    }

    async fn step(
        cluster: &FakeCluster,
        workload: &ReleaseChart,
        status: &mut UpgradePlanStatus,
    ) -> Option<Duration> {
        let settings = Settings::default();
        let plan = upgrade_plan("3.1.0");
        let ctx = PhaseContext::new(cluster, &settings, &plan);
        execute(&ctx, status, workload).await.unwrap()
    }

    fn message(status: &UpgradePlanStatus) -> Option<&str> {
        status.condition(CONDITION).map(|c| c.message.as_str())
    }

    #[tokio::test]
    async fn test_dependency_not_installed_skips_workload() {
        let cluster = FakeCluster::default();
        let mut status = UpgradePlanStatus::default();

        let requeue = step(&cluster, &workload(&["metal3-crd"], &["ironic"]), &mut status).await;
        assert_eq!(requeue, Some(Duration::ZERO));
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Skipped));
        assert_eq!(cluster.state().helm_lookups, vec!["metal3-crd".to_string()]);
    }

    #[tokio::test]
    async fn test_dependency_in_progress_halts_before_core() {
        let cluster = FakeCluster::new(FakeState {
            helm_releases: vec![installed("metal3-crd", "0.7.0"), installed("metal3", "0.7.0")],
            ..Default::default()
        });
        let mut status = UpgradePlanStatus::default();

        let requeue = step(&cluster, &workload(&["metal3-crd"], &[]), &mut status).await;
        assert_eq!(requeue, None);
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::InProgress));
        assert_eq!(message(&status), Some("Chart metal3-crd upgrade is in progress"));

        let state = cluster.state();
        assert_eq!(state.helm_lookups, vec!["metal3-crd".to_string()]);
        assert_eq!(state.created, vec!["HelmChart/kube-system/metal3-crd".to_string()]);
    }

    #[tokio::test]
    async fn test_order_dependencies_core_addons() {
        let cluster = FakeCluster::default();
        {
            let mut state = cluster.state();
            for name in ["metal3-crd", "metal3-ipam", "metal3", "ironic"] {
                upgraded(&mut state, name);
            }
        }
        let mut status = UpgradePlanStatus::default();

        let requeue = step(
            &cluster,
            &workload(&["metal3-crd", "metal3-ipam"], &["ironic"]),
            &mut status,
        )
        .await;
        assert_eq!(requeue, Some(Duration::ZERO));
        assert_eq!(
            cluster.state().helm_lookups,
            vec!["metal3-crd", "metal3-ipam", "metal3", "ironic"]
        );
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Succeeded));
        assert_eq!(message(&status), Some("Chart metal3 upgrade succeeded"));
    }

    #[tokio::test]
    async fn test_core_missing_with_dependencies_fails() {
        let cluster = FakeCluster::new(FakeState {
            helm_releases: vec![installed("metal3-crd", "0.8.0")],
            ..Default::default()
        });
        let mut status = UpgradePlanStatus::default();

        let requeue = step(&cluster, &workload(&["metal3-crd"], &[]), &mut status).await;
        assert_eq!(requeue, Some(Duration::ZERO));
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Failed));
        assert_eq!(
            message(&status),
            Some("'metal3' core chart is missing, but dependency charts are present")
        );
    }

    #[tokio::test]
    async fn test_core_not_installed_without_dependencies_is_skipped() {
        let cluster = FakeCluster::default();
        let mut status = UpgradePlanStatus::default();

        step(&cluster, &workload(&[], &["ironic"]), &mut status).await;
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Skipped));
        assert_eq!(cluster.state().helm_lookups, vec!["metal3".to_string()]);
    }

    #[tokio::test]
    async fn test_addon_outcomes_are_events() {
        let cluster = FakeCluster::default();
        {
            let mut state = cluster.state();
            upgraded(&mut state, "metal3");
            upgraded(&mut state, "ironic");
            state.helm_releases.push(installed("dashboard", "0.8.0"));
            state
                .helm_charts
                .push(helm_chart("dashboard", "0.8.0", "3.1.0", "helm-install-dashboard"));
            state.jobs.push(job("helm-install-dashboard", Some("Failed")));
        }
        let mut status = UpgradePlanStatus::default();

        step(
            &cluster,
            &workload(&[], &["ironic", "missing", "dashboard"]),
            &mut status,
        )
        .await;

        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Succeeded));
        let state = cluster.state();
        let events: Vec<(EventKind, &str)> = state
            .events
            .iter()
            .map(|(kind, _, message)| (*kind, message.as_str()))
            .collect();
        assert_eq!(
            events,
            vec![
                (EventKind::Normal, "'ironic' add-on component successfully upgraded"),
                (
                    EventKind::Normal,
                    "'missing' add-on component upgrade skipped as it is missing in the cluster"
                ),
                (
                    EventKind::Warning,
                    "'metal3' upgraded successfully, but add-on component 'dashboard' failed to upgrade"
                ),
            ]
        );
        assert!(state.events.iter().all(|(_, reason, _)| reason == CONDITION));
    }

    #[tokio::test]
    async fn test_addon_in_progress_holds_workload() {
        let cluster = FakeCluster::default();
        {
            let mut state = cluster.state();
            upgraded(&mut state, "metal3");
            state.helm_releases.push(installed("ironic", "0.7.0"));
        }
        let mut status = UpgradePlanStatus::default();

        let requeue = step(&cluster, &workload(&[], &["ironic"]), &mut status).await;
        assert_eq!(requeue, Some(Settings::default().node_poll_interval));
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::InProgress));
        assert_eq!(message(&status), Some("Chart ironic upgrade is in progress"));
    }

    #[tokio::test]
    async fn test_multiple_helm_charts() {
        let duplicate = |namespace: &str| {
            let mut chart = helm_chart("metal3", "0.8.0", "3.1.0", "job");
            chart.metadata.namespace = Some(namespace.to_string());
            chart
        };
        let cluster = FakeCluster::new(FakeState {
            helm_releases: vec![installed("metal3", "0.8.0")],
            helm_charts: vec![duplicate("kube-system"), duplicate("metal3-system")],
            ..Default::default()
        });
        let mut status = UpgradePlanStatus::default();

        let requeue = step(&cluster, &workload(&[], &[]), &mut status).await;
        assert_eq!(requeue, Some(Duration::ZERO));
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Failed));
        assert_eq!(
            message(&status),
            Some("Unable to upgrade Helm release 'metal3' backed by multiple HelmChart resources")
        );
    }

    #[tokio::test]
    async fn test_addon_multiple_helm_charts_is_warning() {
        let cluster = FakeCluster::default();
        {
            let mut state = cluster.state();
            upgraded(&mut state, "metal3");
            state.helm_releases.push(installed("ironic", "0.8.0"));
            let mut other = helm_chart("ironic", "0.8.0", "3.1.0", "job");
            other.metadata.namespace = Some("ironic-system".to_string());
            state.helm_charts.push(helm_chart("ironic", "0.8.0", "3.1.0", "job"));
            state.helm_charts.push(other);
        }
        let mut status = UpgradePlanStatus::default();

        step(&cluster, &workload(&[], &["ironic"]), &mut status).await;
        assert_eq!(status.reason(CONDITION), Some(UpgradeReason::Succeeded));
        let state = cluster.state();
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.events[0].0, EventKind::Warning);
    }
}
