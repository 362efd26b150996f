//! `UpgradePlan` spec types.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::schema::preserve_unknown_object;
use super::status::UpgradePlanStatus;

/// `UpgradePlan` declares the release a cluster should be upgraded to.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "lifecycle.ruo.io",
    version = "v1alpha1",
    kind = "UpgradePlan",
    namespaced,
    status = "UpgradePlanStatus",
    shortname = "up",
    printcolumn = r#"{"name":"RELEASE","type":"string","jsonPath":".spec.releaseVersion"}"#,
    printcolumn = r#"{"name":"OS","type":"string","jsonPath":".status.conditions[?(@.type==\"OSUpgraded\")].reason"}"#,
    printcolumn = r#"{"name":"KUBERNETES","type":"string","jsonPath":".status.conditions[?(@.type==\"KubernetesUpgraded\")].reason"}"#,
    printcolumn = r#"{"name":"LAST","type":"string","jsonPath":".status.lastSuccessfulReleaseVersion"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePlanSpec {
    /// Target release version (e.g., "3.1.0").
    pub release_version: String,

    /// Per-role drain overrides. `true` disables draining for that role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_drain: Option<DisableDrain>,

    /// Per-chart value overrides merged on top of the release values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub helm: Vec<HelmValues>,
}

/// Drain overrides. Only ever turn draining off; unset keeps the topology default.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DisableDrain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<bool>,
}

/// User supplied values for a single chart.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmValues {
    /// Chart name as declared in the release manifest.
    pub chart: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_object")]
    pub values: Option<serde_json::Value>,
}

impl UpgradePlanSpec {
    /// User values for the given chart, if any were declared.
    pub fn values_for(&self, chart: &str) -> Option<&serde_json::Value> {
        self.helm
            .iter()
            .find(|h| h.chart == chart)
            .and_then(|h| h.values.as_ref())
    }
}
