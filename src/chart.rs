//! Chart state evaluation and core component convergence checks.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::cluster::ClusterApi;
use crate::config::Settings;
use crate::crd::{ContainerImage, CoreComponent, ReleaseChart, UpgradeReason};
use crate::error::{Result, RuoError};
use crate::external::HelmChart;
use crate::phases::PhaseContext;
use crate::upgrade::helm::{self, BaseValues};

/// Upgrade state of one chart, derived fresh on every reconcile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartState {
    Unknown,
    NotInstalled,
    VersionAlreadyInstalled,
    InProgress,
    Succeeded,
    Failed,
}

impl ChartState {
    pub fn formatted_message(self, chart: &str) -> String {
        match self {
            Self::Unknown => format!("State of chart {chart} is unknown"),
            Self::NotInstalled => format!("Chart {chart} is not installed"),
            Self::VersionAlreadyInstalled => {
                format!("Specified version of chart {chart} is already installed")
            }
            Self::InProgress => format!("Chart {chart} upgrade is in progress"),
            Self::Succeeded => format!("Chart {chart} upgrade succeeded"),
            Self::Failed => format!("Chart {chart} upgrade failed"),
        }
    }

    /// Condition reason and whether to requeue immediately.
    pub const fn outcome(self) -> (UpgradeReason, bool) {
        match self {
            Self::NotInstalled | Self::VersionAlreadyInstalled => (UpgradeReason::Skipped, true),
            Self::InProgress => (UpgradeReason::InProgress, false),
            Self::Succeeded => (UpgradeReason::Succeeded, true),
            Self::Failed => (UpgradeReason::Failed, true),
            Self::Unknown => (UpgradeReason::Error, false),
        }
    }

    /// The chart is at the target version and later components may proceed.
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::VersionAlreadyInstalled)
    }
}

impl std::fmt::Display for ChartState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Terminal outcome of a Job, `None` while it is still running.
fn job_outcome(job: &Job) -> Option<(ChartState, String)> {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .find(|c| c.status == "True" && (c.type_ == "Complete" || c.type_ == "Failed"))
        .map(|c| {
            let state = if c.type_ == "Complete" {
                ChartState::Succeeded
            } else {
                ChartState::Failed
            };
            (state, c.message.clone().unwrap_or_default())
        })
}

fn job_complete(job: &Job) -> bool {
    matches!(job_outcome(job), Some((ChartState::Succeeded, _)))
}

/// Drive one chart towards the release version and report where it stands.
///
/// `resources` is every `HelmChart` in the cluster, listed once per pass.
pub async fn evaluate(
    ctx: &PhaseContext<'_>,
    chart: &ReleaseChart,
    resources: &[HelmChart],
) -> Result<ChartState> {
    let Some(installed) = ctx.cluster.latest_helm_release(&chart.release_name).await? else {
        return Ok(ChartState::NotInstalled);
    };

    let existing = match resources
        .iter()
        .filter(|c| c.name_any() == chart.release_name)
        .collect::<Vec<_>>()
        .as_slice()
    {
        [] => None,
        [one] => Some(*one),
        _ => return Err(RuoError::MultipleHelmCharts(chart.release_name.clone())),
    };
    let user_values = ctx.plan.spec.values_for(&chart.name);
    let release_version = &ctx.plan.spec.release_version;

    let Some(existing) = existing else {
        if installed.chart_version == chart.version {
            return Ok(ChartState::VersionAlreadyInstalled);
        }
        let values = helm::merge_values(
            &BaseValues::Map(&installed.config),
            chart.values.as_ref(),
            user_values,
        )?;
        let helm_chart = helm::new_helm_chart(
            ctx.settings,
            &installed,
            chart,
            values,
            ctx.identity(),
            release_version,
        );
        ctx.create_helm_chart(&helm_chart).await?;
        return Ok(ChartState::InProgress);
    };

    if existing.spec.version != chart.version {
        let values = helm::merge_values(
            &BaseValues::Yaml(&existing.spec.values_content),
            chart.values.as_ref(),
            user_values,
        )?;
        let updated = helm::update_helm_chart(
            ctx.settings,
            existing,
            chart,
            values,
            ctx.identity(),
            release_version,
        );
        ctx.cluster.replace_helm_chart(&updated).await?;
        info!(
            "Updated HelmChart {} to version {}",
            chart.release_name, chart.version
        );
        return Ok(ChartState::InProgress);
    }

    if existing.annotations().get(&ctx.settings.keys.release) != Some(release_version) {
        return Ok(ChartState::VersionAlreadyInstalled);
    }

    let Some(job_name) = existing.job_name() else {
        debug!("HelmChart {} has no job yet", chart.release_name);
        return Ok(ChartState::Unknown);
    };
    let namespace = existing
        .namespace()
        .unwrap_or_else(|| ctx.settings.chart_namespace.clone());
    let Some(job) = ctx.cluster.get_job(&namespace, job_name).await? else {
        return Ok(ChartState::Unknown);
    };

    match job_outcome(&job) {
        None => Ok(ChartState::InProgress),
        Some((ChartState::Failed, message)) => {
            info!(
                "Helm chart upgrade job failed: chart={}, job={}/{}, status={}",
                chart.name, namespace, job_name, message
            );
            Ok(ChartState::Failed)
        }
        Some((state, _)) => Ok(state),
    }
}

/// Every declared container is present and its image contains the declared image.
fn contains_container_images(deployment: &Deployment, expected: &[ContainerImage]) -> bool {
    let containers = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|s| s.containers.as_slice())
        .unwrap_or_default();

    expected.iter().all(|want| {
        containers
            .iter()
            .find(|c| c.name == want.name)
            .and_then(|c| c.image.as_deref())
            .is_some_and(|image| image.contains(&want.image))
    })
}

fn deployment_available(deployment: &Deployment) -> bool {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.type_ == "Available" && c.status == "True")
}

async fn helm_core_upgraded(
    cluster: &dyn ClusterApi,
    settings: &Settings,
    name: &str,
    version: &str,
) -> Result<Option<bool>> {
    let Some(chart) = cluster.get_helm_chart(&settings.chart_namespace, name).await? else {
        return Ok(None);
    };
    // A HelmChart without its Job is being re-run.
    let Some(job_name) = chart.job_name() else {
        return Ok(Some(false));
    };
    let Some(job) = cluster.get_job(&settings.chart_namespace, job_name).await? else {
        return Ok(Some(false));
    };
    if !job_complete(&job) {
        return Ok(Some(false));
    }

    let release = cluster.latest_helm_release(name).await?;
    Ok(Some(release.is_some_and(|r| r.chart_version == version)))
}

async fn deployment_core_upgraded(
    cluster: &dyn ClusterApi,
    settings: &Settings,
    name: &str,
    containers: &[ContainerImage],
) -> Result<Option<bool>> {
    let Some(deployment) = cluster.get_deployment(&settings.chart_namespace, name).await? else {
        return Ok(None);
    };
    Ok(Some(
        deployment_available(&deployment) && contains_container_images(&deployment, containers),
    ))
}

/// Whether a core component runs its target version. `None` if it is absent from the cluster.
pub async fn core_component_upgraded(
    cluster: &dyn ClusterApi,
    settings: &Settings,
    component: &CoreComponent,
) -> Result<Option<bool>> {
    match component {
        CoreComponent::HelmChart { name, version } => {
            helm_core_upgraded(cluster, settings, name, version).await
        }
        CoreComponent::Deployment { name, containers } => {
            deployment_core_upgraded(cluster, settings, name, containers).await
        }
    }
}

/// First core component that has not converged yet.
pub async fn pending_core_component<'c>(
    cluster: &dyn ClusterApi,
    settings: &Settings,
    components: &'c [CoreComponent],
) -> Result<Option<&'c str>> {
    for component in components {
        match core_component_upgraded(cluster, settings, component).await? {
            None => debug!("Core component {} not present, skipping", component.name()),
            Some(true) => {}
            Some(false) => return Ok(Some(component.name())),
        }
    }
    Ok(None)
}
