//! Kubernetes phase: move every node to the release's distribution version.

use std::time::Duration;

use tracing::info;

use super::{PhaseContext, Tier, drive_tier, naming_suffix};
use crate::chart;
use crate::crd::manifest::Kubernetes;
use crate::crd::{KUBERNETES_UPGRADED, KubernetesDistribution, UpgradePlanStatus};
use crate::drain::DrainPolicy;
use crate::error::Result;
use crate::nodes::{self, Target};
use crate::status;
use crate::upgrade::kubernetes::{self, Distribution};
use crate::upgrade::naming::NodeRole;

/// Core components must converge after the nodes before the phase is done.
async fn core_components_converged(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    target: &KubernetesDistribution,
) -> Result<bool> {
    let pending =
        chart::pending_core_component(ctx.cluster, ctx.settings, &target.core_components).await?;
    if let Some(name) = pending {
        status::set_in_progress(
            status,
            KUBERNETES_UPGRADED,
            format!("Waiting for {name} core component to be upgraded"),
        );
        return Ok(false);
    }
    Ok(true)
}

pub async fn execute(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    kubernetes: &Kubernetes,
) -> Result<Option<Duration>> {
    let nodes = ctx.cluster.list_nodes().await?;
    let distribution = Distribution::detect(&nodes)?;
    let target = distribution.target(kubernetes);

    let suffix = naming_suffix(status)?;
    let identity = ctx.identity();
    let settings = ctx.settings;
    let drain = DrainPolicy::resolve(
        &nodes,
        &settings.keys.control_plane,
        ctx.plan.spec.disable_drain.as_ref(),
    );
    let kubelet = Target::KubeletVersion(&target.version);

    let control_plane = kubernetes::upgrade_plan(
        settings,
        NodeRole::ControlPlane,
        distribution,
        &target.version,
        &suffix,
        drain.control_plane,
        identity.clone(),
    );
    if let Tier::Waiting(requeue) = drive_tier(
        ctx,
        status,
        KUBERNETES_UPGRADED,
        &control_plane,
        &nodes,
        kubelet,
        "Control plane nodes are being upgraded",
    )
    .await?
    {
        return Ok(requeue);
    }

    if !nodes::control_plane_only(&nodes, &settings.keys.control_plane) {
        let worker = kubernetes::upgrade_plan(
            settings,
            NodeRole::Worker,
            distribution,
            &target.version,
            &suffix,
            drain.worker,
            identity,
        );
        if let Tier::Waiting(requeue) = drive_tier(
            ctx,
            status,
            KUBERNETES_UPGRADED,
            &worker,
            &nodes,
            kubelet,
            "Worker nodes are being upgraded",
        )
        .await?
        {
            return Ok(requeue);
        }
    }

    if !core_components_converged(ctx, status, target).await? {
        return Ok(Some(settings.node_poll_interval));
    }

    info!("All nodes run {} {}", distribution, target.version);
    status::set_succeeded(status, KUBERNETES_UPGRADED, "All cluster nodes are upgraded");
    Ok(Some(Duration::ZERO))
}
