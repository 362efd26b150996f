//! Upgrade phase implementations.
//!
//! Each phase reads the current status, advances one step per reconcile and
//! returns when to run again: `Some(ZERO)` for an immediate requeue, `Some(d)`
//! to poll after `d`, `None` to wait for a watch event.

pub mod deletion;
pub mod initialize;
pub mod kubernetes;
pub mod os;
pub mod release;
pub mod workloads;

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use tracing::info;

use crate::cluster::{ClusterApi, EventKind};
use crate::config::Settings;
use crate::crd::{
    KUBERNETES_UPGRADED, OS_UPGRADED, UpgradePlan, UpgradePlanStatus, workload_condition_type,
};
use crate::error::{Result, RuoError};
use crate::external::{HelmChart, Plan};
use crate::nodes::{self, Target};
use crate::upgrade::naming;

/// Everything a phase needs to act on one `UpgradePlan`.
pub struct PhaseContext<'a> {
    pub cluster: &'a dyn ClusterApi,
    pub settings: &'a Settings,
    pub plan: &'a UpgradePlan,
}

impl<'a> PhaseContext<'a> {
    pub fn new(cluster: &'a dyn ClusterApi, settings: &'a Settings, plan: &'a UpgradePlan) -> Self {
        Self {
            cluster,
            settings,
            plan,
        }
    }

    /// Identity labels/annotations for objects created on behalf of the plan.
    pub fn identity(&self) -> BTreeMap<String, String> {
        naming::identity(&self.settings.keys, self.plan)
    }

    pub async fn event(&self, kind: EventKind, reason: &str, message: &str) {
        self.cluster
            .publish_event(self.plan, kind, reason, message)
            .await;
    }

    async fn created(&self, kind: &str, meta: &ObjectMeta) {
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        let name = meta.name.as_deref().unwrap_or_default();
        info!("{} created: {}/{}", kind, namespace, name);
        self.event(
            EventKind::Normal,
            &format!("{kind}Created"),
            &format!("{kind} created: {namespace}/{name}"),
        )
        .await;
    }

    pub async fn create_plan(&self, plan: &Plan) -> Result<()> {
        self.cluster.create_plan(plan).await?;
        self.created("Plan", &plan.metadata).await;
        Ok(())
    }

    pub async fn create_secret(&self, secret: &Secret) -> Result<()> {
        self.cluster.create_secret(secret).await?;
        self.created("Secret", &secret.metadata).await;
        Ok(())
    }

    pub async fn create_helm_chart(&self, chart: &HelmChart) -> Result<()> {
        self.cluster.create_helm_chart(chart).await?;
        self.created("HelmChart", &chart.metadata).await;
        Ok(())
    }

    pub async fn create_job(&self, job: &Job) -> Result<()> {
        self.cluster.create_job(job).await?;
        self.created("Job", &job.metadata).await;
        Ok(())
    }
}

/// Suffix of the current attempt, set by the Initialize phase.
pub fn naming_suffix(status: &UpgradePlanStatus) -> Result<String> {
    status
        .naming_suffix
        .clone()
        .ok_or(RuoError::MissingField("status.namingSuffix"))
}

/// Where one node tier (control plane or workers) of a phase stands.
pub enum Tier {
    /// Not converged yet; return with this requeue.
    Waiting(Option<Duration>),
    Upgraded,
}

/// Ensure the tier's Plan exists and check whether its nodes reached the target.
///
/// Creating the Plan ends the pass; the Plan's own status changes trigger the next one.
pub async fn drive_tier(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    plan: &Plan,
    nodes: &[Node],
    target: Target<'_>,
    message: &str,
) -> Result<Tier> {
    let namespace = plan.namespace().unwrap_or_default();
    let Some(existing) = ctx.cluster.get_plan(&namespace, &plan.name_any()).await? else {
        crate::status::set_in_progress(status, condition_type, message);
        ctx.create_plan(plan).await?;
        return Ok(Tier::Waiting(None));
    };

    if nodes::upgraded(nodes, existing.spec.node_selector.as_ref(), target)? {
        return Ok(Tier::Upgraded);
    }
    crate::status::set_in_progress(status, condition_type, message);
    Ok(Tier::Waiting(Some(ctx.settings.node_poll_interval)))
}

/// Phase an `UpgradePlan` is in, judged from its conditions.
pub fn active_phase(status: &UpgradePlanStatus) -> &'static str {
    if status.conditions.is_empty() {
        "Initialize"
    } else if !status.is_succeeded(OS_UPGRADED) {
        "OperatingSystem"
    } else if !status.is_succeeded(KUBERNETES_UPGRADED) {
        "Kubernetes"
    } else if status
        .conditions
        .iter()
        .any(|c| !status.is_finished(&c.r#type))
    {
        "Workloads"
    } else {
        "Completed"
    }
}

/// Advance the upgrade by one step.
///
/// `status` is mutated in place and must be persisted by the caller whatever
/// the outcome.
pub async fn run(ctx: &PhaseContext<'_>, status: &mut UpgradePlanStatus) -> Result<Option<Duration>> {
    let Some(manifest) = release::resolve(ctx).await? else {
        release::install(ctx).await?;
        return Ok(None);
    };
    let release = &manifest.spec;

    let generation = ctx.plan.metadata.generation.unwrap_or_default();
    if status.observed_generation != generation {
        return Ok(initialize::execute(
            status,
            generation,
            release,
            naming::generate_suffix(),
        ));
    }

    let components = &release.components;
    if !status.is_succeeded(OS_UPGRADED) {
        return os::execute(ctx, status, &release.release_version, &components.operating_system).await;
    }
    if !status.is_succeeded(KUBERNETES_UPGRADED) {
        return kubernetes::execute(ctx, status, &components.kubernetes).await;
    }

    for chart in &components.workloads.helm {
        if !status.is_finished(&workload_condition_type(&chart.pretty_name)) {
            return workloads::execute(ctx, status, chart).await;
        }
    }

    complete(ctx, status).await;
    Ok(None)
}

async fn complete(ctx: &PhaseContext<'_>, status: &mut UpgradePlanStatus) {
    let release_version = &ctx.plan.spec.release_version;
    if status.last_successful_release_version.as_ref() == Some(release_version) {
        return;
    }

    info!(
        "Upgrade of {} to release {} completed",
        ctx.plan.name_any(),
        release_version
    );
    status.last_successful_release_version = Some(release_version.clone());
    ctx.event(
        EventKind::Normal,
        "UpgradeCompleted",
        &format!("Upgrade to release {release_version} completed"),
    )
    .await;
}
