//! In-memory [`ClusterApi`] for phase tests.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Secret};
use kube::ResourceExt;

use super::{ClusterApi, EventKind};
use crate::crd::{ReleaseManifest, UpgradePlan, UpgradePlanStatus};
use crate::error::{Result, RuoError};
use crate::external::{HelmChart, Plan};
use crate::upgrade::helm::HelmRelease;

#[derive(Default)]
pub struct FakeState {
    pub manifests: Vec<ReleaseManifest>,
    pub nodes: Vec<Node>,
    pub secrets: Vec<Secret>,
    pub plans: Vec<Plan>,
    pub helm_charts: Vec<HelmChart>,
    pub jobs: Vec<Job>,
    pub deployments: Vec<Deployment>,
    pub helm_releases: Vec<HelmRelease>,
    pub statuses: Vec<UpgradePlanStatus>,
    pub events: Vec<(EventKind, String, String)>,
    /// "Kind/namespace/name" of every create call, in order.
    pub created: Vec<String>,
    /// "Kind/namespace/name" of every delete call, in order.
    pub deleted: Vec<String>,
    /// Release names passed to `latest_helm_release`, in order.
    pub helm_lookups: Vec<String>,
    pub finalizers: Option<Vec<String>>,
    /// `create_job` calls answered with AlreadyExists before creation succeeds.
    pub job_conflicts: usize,
    /// Number of `create_job` calls, rejected ones included.
    pub job_attempts: usize,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

fn key<K: ResourceExt>(kind: &str, obj: &K) -> String {
    format!("{kind}/{}/{}", obj.namespace().unwrap_or_default(), obj.name_any())
}

fn find<K: ResourceExt + Clone>(items: &[K], namespace: &str, name: &str) -> Option<K> {
    items
        .iter()
        .find(|o| o.name_any() == name && o.namespace().as_deref() == Some(namespace))
        .cloned()
}

fn in_namespace<K: ResourceExt + Clone>(items: &[K], namespace: &str) -> Vec<K> {
    items
        .iter()
        .filter(|o| o.namespace().as_deref() == Some(namespace))
        .cloned()
        .collect()
}

fn upsert<K: ResourceExt + Clone>(items: &mut Vec<K>, obj: &K) {
    items.retain(|o| !(o.name_any() == obj.name_any() && o.namespace() == obj.namespace()));
    items.push(obj.clone());
}

fn remove<K: ResourceExt>(items: &mut Vec<K>, namespace: &str, name: &str) {
    items.retain(|o| !(o.name_any() == name && o.namespace().as_deref() == Some(namespace)));
}

impl FakeCluster {
    pub fn new(state: FakeState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Lock the state. A poisoned lock only happens after a failed test.
    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn created_count(&self, prefix: &str) -> usize {
        self.state().created.iter().filter(|c| c.starts_with(prefix)).count()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn list_release_manifests(&self, namespace: &str) -> Result<Vec<ReleaseManifest>> {
        Ok(in_namespace(&self.state().manifests, namespace))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        Ok(self.state().nodes.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(find(&self.state().secrets, namespace, name))
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>> {
        Ok(in_namespace(&self.state().secrets, namespace))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<()> {
        let mut state = self.state();
        state.created.push(key("Secret", secret));
        upsert(&mut state.secrets, secret);
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.deleted.push(format!("Secret/{namespace}/{name}"));
        remove(&mut state.secrets, namespace, name);
        Ok(())
    }

    async fn get_plan(&self, namespace: &str, name: &str) -> Result<Option<Plan>> {
        Ok(find(&self.state().plans, namespace, name))
    }

    async fn list_plans(&self, namespace: &str) -> Result<Vec<Plan>> {
        Ok(in_namespace(&self.state().plans, namespace))
    }

    async fn create_plan(&self, plan: &Plan) -> Result<()> {
        let mut state = self.state();
        state.created.push(key("Plan", plan));
        upsert(&mut state.plans, plan);
        Ok(())
    }

    async fn delete_plan(&self, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state();
        state.deleted.push(format!("Plan/{namespace}/{name}"));
        remove(&mut state.plans, namespace, name);
        Ok(())
    }

    async fn list_helm_charts(&self) -> Result<Vec<HelmChart>> {
        Ok(self.state().helm_charts.clone())
    }

    async fn get_helm_chart(&self, namespace: &str, name: &str) -> Result<Option<HelmChart>> {
        Ok(find(&self.state().helm_charts, namespace, name))
    }

    async fn create_helm_chart(&self, chart: &HelmChart) -> Result<()> {
        let mut state = self.state();
        state.created.push(key("HelmChart", chart));
        upsert(&mut state.helm_charts, chart);
        Ok(())
    }

    async fn replace_helm_chart(&self, chart: &HelmChart) -> Result<()> {
        upsert(&mut self.state().helm_charts, chart);
        Ok(())
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        Ok(find(&self.state().jobs, namespace, name))
    }

    async fn create_job(&self, job: &Job) -> Result<()> {
        let mut state = self.state();
        state.job_attempts += 1;
        if state.job_conflicts > 0 {
            state.job_conflicts -= 1;
            return Err(RuoError::AlreadyExists(key("Job", job)));
        }
        state.created.push(key("Job", job));
        upsert(&mut state.jobs, job);
        Ok(())
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        Ok(find(&self.state().deployments, namespace, name))
    }

    async fn latest_helm_release(&self, release: &str) -> Result<Option<HelmRelease>> {
        let mut state = self.state();
        state.helm_lookups.push(release.to_string());
        Ok(state
            .helm_releases
            .iter()
            .filter(|r| r.name == release)
            .max_by_key(|r| r.revision)
            .cloned())
    }

    async fn patch_status(&self, _plan: &UpgradePlan, status: &UpgradePlanStatus) -> Result<()> {
        self.state().statuses.push(status.clone());
        Ok(())
    }

    async fn set_finalizers(&self, _plan: &UpgradePlan, finalizers: Vec<String>) -> Result<()> {
        self.state().finalizers = Some(finalizers);
        Ok(())
    }

    async fn publish_event(&self, _plan: &UpgradePlan, kind: EventKind, reason: &str, message: &str) {
        self.state()
            .events
            .push((kind, reason.to_string(), message.to_string()));
    }
}
