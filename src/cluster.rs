//! Cluster access seam used by the reconcile phases.
//!
//! Phases only talk to the API server through [`ClusterApi`]. [`KubeCluster`]
//! is the production implementation; tests use an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::EventType;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

use crate::crd::{ReleaseManifest, UpgradePlan, UpgradePlanStatus};
use crate::error::{Result, RuoError};
use crate::external::{HelmChart, Plan};
use crate::status::EventRecorder;
use crate::upgrade::helm::{self, HelmRelease};

#[cfg(test)]
pub mod fake;

/// Kubernetes event severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => Self::Normal,
            EventKind::Warning => Self::Warning,
        }
    }
}

/// Reads and writes performed while reconciling an `UpgradePlan`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_release_manifests(&self, namespace: &str) -> Result<Vec<ReleaseManifest>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>>;
    async fn create_secret(&self, secret: &Secret) -> Result<()>;
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>>;
    async fn list_plans(&self, namespace: &str) -> Result<Vec<Plan>>;
    async fn create_plan(&self, plan: &Plan) -> Result<()>;
    async fn delete_plan(&self, namespace: &str, name: &str) -> Result<()>;

    /// `HelmChart` resources across all namespaces.
    async fn list_helm_charts(&self) -> Result<Vec<HelmChart>>;
    async fn get_helm_chart(&self, namespace: &str, name: &str) -> Result<Option<HelmChart>>;
    async fn create_helm_chart(&self, chart: &HelmChart) -> Result<()>;
    async fn replace_helm_chart(&self, chart: &HelmChart) -> Result<()>;

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>>;
    async fn create_job(&self, job: &Job) -> Result<()>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Latest revision of an installed Helm release, if any.
    async fn latest_helm_release(&self, release: &str) -> Result<Option<HelmRelease>>;

    async fn patch_status(&self, plan: &UpgradePlan, status: &UpgradePlanStatus) -> Result<()>;
    async fn set_finalizers(&self, plan: &UpgradePlan, finalizers: Vec<String>) -> Result<()>;
    async fn publish_event(&self, plan: &UpgradePlan, kind: EventKind, reason: &str, message: &str);
}

/// [`ClusterApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn plan_api(&self, plan: &UpgradePlan) -> Result<Api<UpgradePlan>> {
        let namespace = plan
            .namespace()
            .ok_or(RuoError::MissingField("metadata.namespace"))?;
        Ok(self.namespaced(&namespace))
    }
}

fn object_namespace(meta: &kube::api::ObjectMeta) -> Result<&str> {
    meta.namespace
        .as_deref()
        .ok_or(RuoError::MissingField("metadata.namespace"))
}

/// Field manager recorded on writes to `UpgradePlan`s.
const FIELD_MANAGER: &str = "ruo";

/// Merge patch pinned to the revision the reconcile read, so concurrent writers conflict.
fn status_patch(plan: &UpgradePlan, status: &UpgradePlanStatus) -> serde_json::Value {
    json!({
        "metadata": { "resourceVersion": plan.resource_version() },
        "status": status,
    })
}

fn finalizers_patch(plan: &UpgradePlan, finalizers: &[String]) -> serde_json::Value {
    json!({
        "metadata": {
            "resourceVersion": plan.resource_version(),
            "finalizers": finalizers,
        }
    })
}

/// Treat 404 on delete as success.
fn ignore_not_found<T>(result: kube::Result<T>) -> Result<()> {
    match result.map_err(RuoError::from) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn list_release_manifests(&self, namespace: &str) -> Result<Vec<ReleaseManifest>> {
        let api: Api<ReleaseManifest> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        let api: Api<Secret> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let api: Api<Secret> = self.namespaced(object_namespace(&secret.metadata)?);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Secret> = self.namespaced(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>> {
        let api: Api<Plan> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_plans(&self, namespace: &str) -> Result<Vec<Plan>> {
        let api: Api<Plan> = self.namespaced(namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        let api: Api<Plan> = self.namespaced(object_namespace(&plan.metadata)?);
        api.create(&PostParams::default(), plan).await?;
        Ok(())
    }

    async fn delete_plan(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Plan> = self.namespaced(namespace);
        ignore_not_found(api.delete(name, &DeleteParams::default()).await)
    }

    async fn list_helm_charts(&self) -> Result<Vec<HelmChart>> {
        let api: Api<HelmChart> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn get_helm_chart(&self, namespace: &str, name: &str) -> Result<Option<HelmChart>> {
        let api: Api<HelmChart> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_helm_chart(&self, chart: &HelmChart) -> Result<()> {
        let api: Api<HelmChart> = self.namespaced(object_namespace(&chart.metadata)?);
        api.create(&PostParams::default(), chart).await?;
        Ok(())
    }

    async fn replace_helm_chart(&self, chart: &HelmChart) -> Result<()> {
        let api: Api<HelmChart> = self.namespaced(object_namespace(&chart.metadata)?);
        api.replace(&chart.name_any(), &PostParams::default(), chart)
            .await?;
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let api: Api<Job> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let api: Api<Job> = self.namespaced(object_namespace(&job.metadata)?);
        api.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = self.namespaced(namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn latest_helm_release(&self, release: &str) -> Result<Option<HelmRelease>> {
        let api: Api<Secret> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&helm::storage_selector(release));
        let secrets = api.list(&params).await?.items;
        debug!("Found {} storage secrets for release {}", secrets.len(), release);
        helm::latest_release(release, &secrets)
    }

    async fn patch_status(&self, plan: &UpgradePlan, status: &UpgradePlanStatus) -> Result<()> {
        let patch = status_patch(plan, status);
        self.plan_api(plan)?
            .patch_status(&plan.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(&self, plan: &UpgradePlan, finalizers: Vec<String>) -> Result<()> {
        let patch = finalizers_patch(plan, &finalizers);
        self.plan_api(plan)?
            .patch(&plan.name_any(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn publish_event(&self, plan: &UpgradePlan, kind: EventKind, reason: &str, message: &str) {
        EventRecorder::new(self.client.clone(), plan)
            .publish(kind.into(), reason, message)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::tests::upgrade_plan;

    #[test]
    fn test_patches_carry_resource_version() {
        let mut plan = upgrade_plan("3.1.0");
        plan.metadata.resource_version = Some("1207".to_string());
        let status = UpgradePlanStatus {
            naming_suffix: Some("a1b2c3d4e5".to_string()),
            ..Default::default()
        };

        let patch = status_patch(&plan, &status);
        assert_eq!(patch["metadata"]["resourceVersion"], "1207");
        assert_eq!(patch["status"]["namingSuffix"], "a1b2c3d4e5");

        let patch = finalizers_patch(&plan, &["lifecycle.ruo.io/finalizer".to_string()]);
        assert_eq!(patch["metadata"]["resourceVersion"], "1207");
        assert_eq!(patch["metadata"]["finalizers"][0], "lifecycle.ruo.io/finalizer");
    }
}
