//! UpgradePlan controller: finalizer handling, phase dispatch, error policy and watch mapping.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use tracing::{error, info, warn};

use crate::cluster::ClusterApi;
use crate::config::{Keys, Settings};
use crate::crd::{ReleaseManifest, UpgradePlan, UpgradePlanStatus, UpgradeReason};
use crate::error::{Result, RuoError};
use crate::external::{HelmChart, Plan};
use crate::metrics::{Metrics, PlanLabels};
use crate::phases::deletion::{self, Deletion};
use crate::phases::{self, PhaseContext};
use crate::upgrade::naming;

/// Delay standing in for "requeue immediately".
const IMMEDIATE_REQUEUE: Duration = Duration::from_millis(100);
const TRANSIENT_RETRY: Duration = Duration::from_secs(10);
const PERMANENT_RETRY: Duration = Duration::from_secs(60);

/// Shared context for the controller.
pub struct Context {
    pub cluster: Arc<dyn ClusterApi>,
    pub settings: Arc<Settings>,
    pub metrics: Arc<Metrics>,
}

fn to_action(requeue: Option<Duration>) -> Action {
    match requeue {
        Some(d) if d.is_zero() => Action::requeue(IMMEDIATE_REQUEUE),
        Some(d) => Action::requeue(d),
        None => Action::await_change(),
    }
}

/// Reconcile an UpgradePlan.
///
/// One step per call: deletion cleanup, finalizer, or the next phase step.
pub async fn reconcile(plan: Arc<UpgradePlan>, ctx: Arc<Context>) -> Result<Action> {
    let labels = PlanLabels {
        name: plan.name_any(),
        namespace: plan.namespace().unwrap_or_default(),
    };
    let start = Instant::now();

    let deleting = plan.metadata.deletion_timestamp.is_some();
    let mut released = false;
    let result = if deleting {
        finalize(&plan, &ctx).await.map(|done| {
            released = done;
            None
        })
    } else {
        apply(&plan, &ctx, &labels).await
    };

    let outcome = match &result {
        Ok(None) => "success",
        Ok(Some(_)) => "requeue",
        Err(_) => "error",
    };
    ctx.metrics
        .observe_reconcile(&labels, outcome, start.elapsed());
    if released {
        ctx.metrics.forget(&labels);
    }

    result.map(to_action)
}

async fn apply(
    plan: &UpgradePlan,
    ctx: &Context,
    labels: &PlanLabels,
) -> Result<Option<Duration>> {
    let finalizer = &ctx.settings.keys.finalizer;
    if !plan.finalizers().contains(finalizer) {
        let mut finalizers = plan.finalizers().to_vec();
        finalizers.push(finalizer.clone());
        ctx.cluster.set_finalizers(plan, finalizers).await?;
        info!("Added finalizer to {}/{}", labels.namespace, labels.name);
        return Ok(Some(Duration::ZERO));
    }

    let previous = plan.status.clone().unwrap_or_default();
    let mut status = previous.clone();
    let phase_ctx = PhaseContext::new(ctx.cluster.as_ref(), &ctx.settings, plan);

    let outcome = phases::run(&phase_ctx, &mut status).await;
    if let Err(e) = &outcome {
        error!("Reconcile error for {}: {}", labels.name, e);
    }
    // Status is written whatever the outcome.
    let persisted = ctx.cluster.patch_status(plan, &status).await;

    record_progress(&ctx.metrics, labels, &previous, &status);
    RuoError::join(outcome, persisted)
}

fn record_progress(
    metrics: &Metrics,
    labels: &PlanLabels,
    previous: &UpgradePlanStatus,
    current: &UpgradePlanStatus,
) {
    metrics.record_phase(
        labels,
        phases::active_phase(previous),
        phases::active_phase(current),
    );
    metrics.record_failed_conditions(labels, newly_failed(previous, current));

    if let Some(release) = &current.last_successful_release_version
        && previous.last_successful_release_version.as_ref() != Some(release)
    {
        metrics.record_completed(labels, release);
    }
}

/// Conditions that turned Failed during this step.
fn newly_failed(previous: &UpgradePlanStatus, current: &UpgradePlanStatus) -> usize {
    current
        .conditions
        .iter()
        .filter(|c| c.reason == UpgradeReason::Failed)
        .filter(|c| previous.reason(&c.r#type) != Some(UpgradeReason::Failed))
        .count()
}

/// Clean up after a deleted plan. Returns true once the finalizer is gone.
async fn finalize(plan: &UpgradePlan, ctx: &Context) -> Result<bool> {
    let finalizer = &ctx.settings.keys.finalizer;
    if !plan.finalizers().contains(finalizer) {
        return Ok(true);
    }

    let phase_ctx = PhaseContext::new(ctx.cluster.as_ref(), &ctx.settings, plan);
    match deletion::execute(&phase_ctx).await? {
        // The Plan watch fires once the node upgrade settles.
        Deletion::Deferred => Ok(false),
        Deletion::Completed => {
            let remaining = plan
                .finalizers()
                .iter()
                .filter(|f| *f != finalizer)
                .cloned()
                .collect();
            ctx.cluster.set_finalizers(plan, remaining).await?;
            info!("Removed finalizer from {}", plan.name_any());
            Ok(true)
        }
    }
}

/// Error policy for the controller.
pub fn error_policy(plan: Arc<UpgradePlan>, err: &RuoError, _ctx: Arc<Context>) -> Action {
    if err.is_transient() {
        warn!("Transient error for {}, will retry: {}", plan.name_any(), err);
        Action::requeue(TRANSIENT_RETRY)
    } else {
        error!("Controller error for {}: {}", plan.name_any(), err);
        Action::requeue(PERMANENT_RETRY)
    }
}

/// Owning UpgradePlan from an object's identity annotations.
fn owner(keys: &Keys, meta: &kube::api::ObjectMeta) -> Option<ObjectRef<UpgradePlan>> {
    let (name, namespace) = naming::owner_of(keys, meta)?;
    Some(ObjectRef::new(&name).within(&namespace))
}

/// A Plan only signals progress once it stops applying.
pub fn map_plan(keys: &Keys, plan: &Plan) -> Option<ObjectRef<UpgradePlan>> {
    if plan.is_applying() {
        return None;
    }
    owner(keys, &plan.metadata)
}

pub fn map_secret(keys: &Keys, secret: &Secret) -> Option<ObjectRef<UpgradePlan>> {
    owner(keys, &secret.metadata)
}

fn job_finished(job: &Job) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .into_iter()
        .flatten()
        .any(|c| c.status == "True" && (c.type_ == "Complete" || c.type_ == "Failed"))
}

/// Finished Jobs map to their plan directly, or through the HelmChart that ran them.
pub fn map_job(
    settings: &Settings,
    job: &Job,
    helm_chart: impl Fn(&ObjectRef<HelmChart>) -> Option<Arc<HelmChart>>,
) -> Option<ObjectRef<UpgradePlan>> {
    if !job_finished(job) {
        return None;
    }
    if let Some(plan) = owner(&settings.keys, &job.metadata) {
        return Some(plan);
    }

    let chart_name = job.labels().get(&settings.keys.helm_chart_job)?;
    let chart_ref = ObjectRef::new(chart_name).within(&settings.chart_namespace);
    let chart = helm_chart(&chart_ref)?;
    owner(&settings.keys, &chart.metadata)
}

/// Every plan in the manifest's namespace that requests its release.
pub fn map_release_manifest(
    manifest: &ReleaseManifest,
    plans: &[Arc<UpgradePlan>],
) -> Vec<ObjectRef<UpgradePlan>> {
    let namespace = manifest.namespace();
    plans
        .iter()
        .filter(|p| p.namespace() == namespace)
        .filter(|p| p.spec.release_version == manifest.spec.release_version)
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}
