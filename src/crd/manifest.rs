//! `ReleaseManifest` types: the component inventory of a single release.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::schema::{preserve_unknown_list, preserve_unknown_object};
use super::types::Arch;

/// `ReleaseManifest` is published once per release and never mutated.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "lifecycle.ruo.io",
    version = "v1alpha1",
    kind = "ReleaseManifest",
    namespaced,
    shortname = "rm",
    printcolumn = r#"{"name":"VERSION","type":"string","jsonPath":".spec.releaseVersion"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifestSpec {
    pub release_version: String,
    #[serde(default)]
    pub components: Components,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Components {
    pub kubernetes: Kubernetes,
    pub operating_system: OperatingSystem,
    #[serde(default)]
    pub workloads: Workloads,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct Kubernetes {
    pub k3s: KubernetesDistribution,
    pub rke2: KubernetesDistribution,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubernetesDistribution {
    pub version: String,

    /// Components shipped with the distribution that must converge after the nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub core_components: Vec<CoreComponent>,
}

/// A distribution-bundled component, evaluated by kind.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CoreComponent {
    /// Installed through a `HelmChart` resource in the chart namespace.
    HelmChart { name: String, version: String },
    /// Plain `Deployment` in the chart namespace.
    Deployment {
        name: String,
        #[serde(default)]
        containers: Vec<ContainerImage>,
    },
}

impl CoreComponent {
    pub fn name(&self) -> &str {
        match self {
            Self::HelmChart { name, .. } | Self::Deployment { name, .. } => name,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystem {
    pub version: String,
    #[serde(rename = "zypperID")]
    pub zypper_id: String,
    pub cpe_scheme: String,
    #[serde(rename = "repoGPGPath")]
    pub repo_gpg_path: String,
    pub supported_archs: Vec<Arch>,
    pub pretty_name: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct Workloads {
    #[serde(default)]
    pub helm: Vec<ReleaseChart>,
}

/// A chart shipped with the release, with its dependency and add-on charts.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseChart {
    pub release_name: String,
    #[serde(rename = "chart")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    pub version: String,
    pub pretty_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub values: Option<serde_json::Value>,

    /// Charts that must be upgraded before this one.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub dependency_charts: Vec<ReleaseChart>,

    /// Optional charts upgraded after this one, never blocking it.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schemars(schema_with = "preserve_unknown_list")]
    pub addon_charts: Vec<ReleaseChart>,
}
