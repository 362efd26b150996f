//! Resources owned by the executors this operator drives.
//!
//! Only the fields the operator reads or writes are modelled. The CRDs themselves are
//! installed by system-upgrade-controller and helm-controller, so no schema is generated.
//! `HelmChart`s are replaced in full, so their unmodelled fields are carried through.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Node-level upgrade unit executed by system-upgrade-controller.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "upgrade.cattle.io",
    version = "v1",
    kind = "Plan",
    namespaced,
    status = "PlanStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    #[serde(default)]
    pub concurrency: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub cordon: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain: Option<DrainSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prepare: Option<ContainerSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<ContainerSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretSpec {
    pub name: String,
    pub path: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrainSpec {
    /// Drain timeout in nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    #[serde(
        default,
        rename = "deleteEmptydirData",
        skip_serializing_if = "Option::is_none"
    )]
    pub delete_emptydir_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_daemon_sets: Option<bool>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PlanStatus {
    /// Nodes the plan is currently being applied to.
    #[serde(default)]
    pub applying: Vec<String>,
}

impl Plan {
    /// At least one node is still being upgraded by this plan.
    pub fn is_applying(&self) -> bool {
        self.status.as_ref().is_some_and(|s| !s.applying.is_empty())
    }
}

/// Chart install/upgrade trigger reconciled by helm-controller.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "helm.cattle.io",
    version = "v1",
    kind = "HelmChart",
    namespaced,
    status = "HelmChartStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub values_content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_off_limit: Option<i32>,
    /// Fields managed by others (`set`, `createNamespace`, `valuesSecrets`, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartStatus {
    /// Job running the latest install or upgrade.
    #[serde(default)]
    pub job_name: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl HelmChart {
    pub fn job_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .map(|s| s.job_name.as_str())
            .filter(|n| !n.is_empty())
    }
}
