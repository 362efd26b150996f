//! Operating system phase: migrate every node to the release's OS image.

use std::time::Duration;

use tracing::{info, warn};

use super::{PhaseContext, Tier, drive_tier, naming_suffix};
use crate::crd::{OS_UPGRADED, OperatingSystem, UpgradePlanStatus};
use crate::drain::DrainPolicy;
use crate::error::Result;
use crate::nodes::{self, Target};
use crate::status;
use crate::upgrade::naming::{self, NodeRole};
use crate::upgrade::os;

pub async fn execute(
    ctx: &PhaseContext<'_>,
    status: &mut UpgradePlanStatus,
    release_version: &str,
    target: &OperatingSystem,
) -> Result<Option<Duration>> {
    let nodes = ctx.cluster.list_nodes().await?;

    let unsupported = os::unsupported_nodes(&nodes, &target.supported_archs);
    if !unsupported.is_empty() {
        let message = format!(
            "Unsupported node architecture for node(s): {}",
            unsupported.join(", ")
        );
        warn!("{}", message);
        status::set_failed(status, OS_UPGRADED, message);
        return Ok(None);
    }

    let suffix = naming_suffix(status)?;
    let identity = ctx.identity();
    let settings = ctx.settings;

    let secret_name = naming::os_secret_name(&suffix);
    if ctx
        .cluster
        .get_secret(&settings.upgrade_namespace, &secret_name)
        .await?
        .is_none()
    {
        let secret = os::upgrade_secret(settings, target, &suffix, identity.clone());
        ctx.create_secret(&secret).await?;
        return Ok(None);
    }

    let drain = DrainPolicy::resolve(
        &nodes,
        &settings.keys.control_plane,
        ctx.plan.spec.disable_drain.as_ref(),
    );
    let image = Target::OsImage(&target.pretty_name);

    let control_plane = os::upgrade_plan(
        settings,
        NodeRole::ControlPlane,
        release_version,
        target,
        &suffix,
        drain.control_plane,
        identity.clone(),
    );
    if let Tier::Waiting(requeue) = drive_tier(
        ctx,
        status,
        OS_UPGRADED,
        &control_plane,
        &nodes,
        image,
        "Control plane nodes are being upgraded",
    )
    .await?
    {
        return Ok(requeue);
    }

    if !nodes::control_plane_only(&nodes, &settings.keys.control_plane) {
        let worker = os::upgrade_plan(
            settings,
            NodeRole::Worker,
            release_version,
            target,
            &suffix,
            drain.worker,
            identity,
        );
        if let Tier::Waiting(requeue) = drive_tier(
            ctx,
            status,
            OS_UPGRADED,
            &worker,
            &nodes,
            image,
            "Worker nodes are being upgraded",
        )
        .await?
        {
            return Ok(requeue);
        }
    }

    info!("All nodes run {}", target.pretty_name);
    status::set_succeeded(status, OS_UPGRADED, "All cluster nodes are upgraded");
    Ok(Some(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::upgrade_plan;
    use crate::cluster::fake::{FakeCluster, FakeState};
    use crate::config::Settings;
    use crate::crd::UpgradeReason;
    use crate::phases::tests::{NEW_OS, OLD_K8S, OLD_OS, operating_system};
    use crate::nodes::tests::node;
    use kube::ResourceExt;

    fn initialized() -> UpgradePlanStatus {
        UpgradePlanStatus {
            naming_suffix: Some("abcdef0123".to_string()),
            observed_generation: 1,
            ..Default::default()
        }
    }

    async fn step(cluster: &FakeCluster, status: &mut UpgradePlanStatus) -> Option<Duration> {
        let settings = Settings::default();
        let plan = upgrade_plan("3.1.0");
        let ctx = PhaseContext::new(cluster, &settings, &plan);
        execute(&ctx, status, "3.1.0", &operating_system()).await.unwrap()
    }

    fn upgrade_role(cluster: &FakeCluster, control_plane: bool) {
        for node in &mut cluster.state().nodes {
            let is_cp = node
                .labels()
                .get(crate::nodes::tests::CP_LABEL)
                .is_some_and(|v| v == "true");
            if is_cp != control_plane {
                continue;
            }
            if let Some(info) = node.status.as_mut().and_then(|s| s.node_info.as_mut()) {
                info.os_image = NEW_OS.to_string();
            }
        }
    }

    #[tokio::test]
    async fn test_unsupported_architecture_fails() {
        let mut arm = node("arm-1", false, OLD_K8S, OLD_OS);
        if let Some(info) = arm.status.as_mut().and_then(|s| s.node_info.as_mut()) {
            info.architecture = "s390x".to_string();
        }
        let cluster = FakeCluster::new(FakeState {
            nodes: vec![node("cp-1", true, OLD_K8S, OLD_OS), arm],
            ..Default::default()
        });
        let mut status = initialized();

        assert_eq!(step(&cluster, &mut status).await, None);
        assert_eq!(status.reason(OS_UPGRADED), Some(UpgradeReason::Failed));
        assert!(
            status
                .condition(OS_UPGRADED)
                .is_some_and(|c| c.message.contains("arm-1"))
        );
        assert!(cluster.state().created.is_empty());
    }

    #[tokio::test]
    async fn test_two_tier_rollout() {
        let cluster = FakeCluster::new(FakeState {
            nodes: vec![
                node("cp-1", true, OLD_K8S, OLD_OS),
                node("w-1", false, OLD_K8S, OLD_OS),
                node("w-2", false, OLD_K8S, OLD_OS),
            ],
            ..Default::default()
        });
        let mut status = initialized();
        let poll = Settings::default().node_poll_interval;

        assert_eq!(step(&cluster, &mut status).await, None);
        assert_eq!(
            cluster.state().created,
            vec!["Secret/cattle-system/os-upgrade-secret-abcdef0123".to_string()]
        );

        assert_eq!(step(&cluster, &mut status).await, None);
        assert_eq!(step(&cluster, &mut status).await, Some(poll));
        assert_eq!(
            status.condition(OS_UPGRADED).map(|c| c.message.as_str()),
            Some("Control plane nodes are being upgraded")
        );

        upgrade_role(&cluster, true);
        assert_eq!(step(&cluster, &mut status).await, None);
        {
            let state = cluster.state();
            assert_eq!(state.created.len(), 3);
            assert_eq!(
                state.created[2],
                "Plan/cattle-system/workers-sl-micro-6-0-abcdef0123"
            );
            // One control-plane node and two workers: only workers drain.
            let cp = &state.plans[0];
            let worker = &state.plans[1];
            assert!(cp.spec.drain.is_none());
            assert!(worker.spec.drain.is_some());
        }
        assert_eq!(
            status.condition(OS_UPGRADED).map(|c| c.message.as_str()),
            Some("Worker nodes are being upgraded")
        );
        assert_eq!(step(&cluster, &mut status).await, Some(poll));

        upgrade_role(&cluster, false);
        assert_eq!(step(&cluster, &mut status).await, Some(Duration::ZERO));
        assert_eq!(status.reason(OS_UPGRADED), Some(UpgradeReason::Succeeded));
    }

    #[tokio::test]
    async fn test_missing_suffix_is_error() {
        let cluster = FakeCluster::new(FakeState {
            nodes: vec![node("cp-1", true, OLD_K8S, OLD_OS)],
            ..Default::default()
        });
        let settings = Settings::default();
        let plan = upgrade_plan("3.1.0");
        let ctx = PhaseContext::new(&cluster, &settings, &plan);
        let mut status = UpgradePlanStatus::default();
        assert!(
            execute(&ctx, &mut status, "3.1.0", &operating_system())
                .await
                .is_err()
        );
    }
}
