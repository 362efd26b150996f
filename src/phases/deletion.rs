//! Cleanup of everything an `UpgradePlan` created before it goes away.

use kube::ResourceExt;
use tracing::info;

use super::PhaseContext;
use crate::error::Result;
use crate::upgrade::naming;

/// Outcome of a cleanup attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Deletion {
    /// A node upgrade is still applying; retry when its Plan changes.
    Deferred,
    /// Every owned Plan and Secret is gone; the finalizer may be removed.
    Completed,
}

/// Delete the Plans and Secrets owned by the plan, unless one is still applying.
pub async fn execute(ctx: &PhaseContext<'_>) -> Result<Deletion> {
    let namespace = &ctx.settings.upgrade_namespace;
    let keys = &ctx.settings.keys;

    let plans: Vec<_> = ctx
        .cluster
        .list_plans(namespace)
        .await?
        .into_iter()
        .filter(|p| naming::is_owned_by(keys, &p.metadata, ctx.plan))
        .collect();

    if let Some(applying) = plans.iter().find(|p| p.is_applying()) {
        info!(
            "Deletion of {} deferred: plan {} is still applying",
            ctx.plan.name_any(),
            applying.name_any()
        );
        return Ok(Deletion::Deferred);
    }

    for plan in &plans {
        ctx.cluster.delete_plan(namespace, &plan.name_any()).await?;
        info!("Plan deleted: {}/{}", namespace, plan.name_any());
    }

    let secrets = ctx.cluster.list_secrets(namespace).await?;
    for secret in secrets
        .iter()
        .filter(|s| naming::is_owned_by(keys, &s.metadata, ctx.plan))
    {
        ctx.cluster.delete_secret(namespace, &secret.name_any()).await?;
        info!("Secret deleted: {}/{}", namespace, secret.name_any());
    }

    Ok(Deletion::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::upgrade_plan;
    use crate::cluster::fake::{FakeCluster, FakeState};
    use crate::config::Settings;
    use crate::external::{Plan, PlanSpec, PlanStatus};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn owned_meta(name: &str, owner: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("cattle-system".to_string()),
            annotations: Some(BTreeMap::from([
                (
                    "lifecycle.ruo.io/upgrade-plan-name".to_string(),
                    owner.to_string(),
                ),
                (
                    "lifecycle.ruo.io/upgrade-plan-namespace".to_string(),
                    "upgrades".to_string(),
                ),
            ])),
            ..Default::default()
        }
    }

    fn plan(name: &str, owner: &str, applying: &[&str]) -> Plan {
        Plan {
            metadata: owned_meta(name, owner),
            spec: PlanSpec::default(),
            status: Some(PlanStatus {
                applying: applying.iter().map(ToString::to_string).collect(),
            }),
        }
    }

    fn secret(name: &str, owner: &str) -> Secret {
        Secret {
            metadata: owned_meta(name, owner),
            ..Default::default()
        }
    }

    async fn delete(cluster: &FakeCluster) -> Deletion {
        let settings = Settings::default();
        let owner = upgrade_plan("3.1.0");
        let ctx = PhaseContext::new(cluster, &settings, &owner);
        execute(&ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_deletes_owned_objects_only() {
        let cluster = FakeCluster::new(FakeState {
            plans: vec![
                plan("control-plane-sl-micro-6-0-abc", "upgrade", &[]),
                plan("workers-sl-micro-6-0-abc", "upgrade", &[]),
                plan("control-plane-sl-micro-6-0-xyz", "other", &["node-1"]),
            ],
            secrets: vec![
                secret("os-upgrade-secret-abc", "upgrade"),
                secret("os-upgrade-secret-xyz", "other"),
            ],
            ..Default::default()
        });

        assert_eq!(delete(&cluster).await, Deletion::Completed);
        let state = cluster.state();
        assert_eq!(
            state.deleted,
            vec![
                "Plan/cattle-system/control-plane-sl-micro-6-0-abc".to_string(),
                "Plan/cattle-system/workers-sl-micro-6-0-abc".to_string(),
                "Secret/cattle-system/os-upgrade-secret-abc".to_string(),
            ]
        );
        assert_eq!(state.plans.len(), 1);
        assert_eq!(state.secrets.len(), 1);
    }

    #[tokio::test]
    async fn test_applying_plan_defers_deletion() {
        let cluster = FakeCluster::new(FakeState {
            plans: vec![
                plan("control-plane-sl-micro-6-0-abc", "upgrade", &[]),
                plan("workers-sl-micro-6-0-abc", "upgrade", &["worker-2"]),
            ],
            secrets: vec![secret("os-upgrade-secret-abc", "upgrade")],
            ..Default::default()
        });

        assert_eq!(delete(&cluster).await, Deletion::Deferred);
        assert!(cluster.state().deleted.is_empty());

        // The Plan finishes; the next attempt cleans up.
        cluster.state().plans[1].status = Some(PlanStatus::default());
        assert_eq!(delete(&cluster).await, Deletion::Completed);
        assert_eq!(cluster.state().deleted.len(), 3);
    }

    #[tokio::test]
    async fn test_nothing_to_delete() {
        let cluster = FakeCluster::default();
        assert_eq!(delete(&cluster).await, Deletion::Completed);
        assert!(cluster.state().deleted.is_empty());
    }
}
