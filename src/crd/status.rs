//! `UpgradePlan` status types and condition lookups.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ConditionStatus, UpgradeReason};

/// Condition type tracking the operating system upgrade.
pub const OS_UPGRADED: &str = "OSUpgraded";

/// Condition type tracking the Kubernetes distribution upgrade.
pub const KUBERNETES_UPGRADED: &str = "KubernetesUpgraded";

/// Condition type tracking a workload, derived from its display name.
pub fn workload_condition_type(pretty_name: &str) -> String {
    let compact: String = pretty_name.split_whitespace().collect();
    format!("{compact}Upgraded")
}

/// A condition on the upgrade plan.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeCondition {
    pub r#type: String,
    pub status: ConditionStatus,
    pub reason: UpgradeReason,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// `UpgradePlan` status defines the observed state of the upgrade.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePlanStatus {
    /// One condition per component, in the order they were first recorded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<UpgradeCondition>,

    /// Last observed generation of the spec.
    #[serde(default)]
    pub observed_generation: i64,

    /// Random token appended to every object created for the current attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub naming_suffix: Option<String>,

    /// Release version of the last upgrade that finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_successful_release_version: Option<String>,
}

impl UpgradePlanStatus {
    /// Look up a condition by type.
    pub fn condition(&self, condition_type: &str) -> Option<&UpgradeCondition> {
        self.conditions.iter().find(|c| c.r#type == condition_type)
    }

    /// Reason of a condition, if present.
    pub fn reason(&self, condition_type: &str) -> Option<UpgradeReason> {
        self.condition(condition_type).map(|c| c.reason)
    }

    /// Condition is present with status `True`.
    pub fn is_succeeded(&self, condition_type: &str) -> bool {
        self.condition(condition_type)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Condition reached a terminal state: succeeded, skipped or failed.
    pub fn is_finished(&self, condition_type: &str) -> bool {
        self.condition(condition_type).is_some_and(|c| {
            c.status == ConditionStatus::True
                || (c.status == ConditionStatus::False
                    && matches!(c.reason, UpgradeReason::Skipped | UpgradeReason::Failed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(t: &str, reason: UpgradeReason) -> UpgradeCondition {
        UpgradeCondition {
            r#type: t.to_string(),
            status: reason.status(),
            reason,
            message: String::new(),
            last_transition_time: Utc::now(),
        }
    }

    #[test]
    fn test_status_default() {
        let status = UpgradePlanStatus::default();
        assert!(status.conditions.is_empty());
        assert_eq!(status.observed_generation, 0);
        assert!(status.naming_suffix.is_none());
        assert!(status.last_successful_release_version.is_none());
    }

    #[test]
    fn test_workload_condition_type() {
        assert_eq!(workload_condition_type("Rancher"), "RancherUpgraded");
        assert_eq!(
            workload_condition_type("Endpoint Copier Operator"),
            "EndpointCopierOperatorUpgraded"
        );
    }

    #[test]
    fn test_is_finished() {
        let status = UpgradePlanStatus {
            conditions: vec![
                condition("A", UpgradeReason::Succeeded),
                condition("B", UpgradeReason::Skipped),
                condition("C", UpgradeReason::Failed),
                condition("D", UpgradeReason::InProgress),
                condition("E", UpgradeReason::Error),
                condition("F", UpgradeReason::Pending),
            ],
            ..Default::default()
        };
        assert!(status.is_finished("A"));
        assert!(status.is_finished("B"));
        assert!(status.is_finished("C"));
        assert!(!status.is_finished("D"));
        assert!(!status.is_finished("E"));
        assert!(!status.is_finished("F"));
        assert!(!status.is_finished("missing"));
    }

    #[test]
    fn test_is_succeeded_only_true() {
        let status = UpgradePlanStatus {
            conditions: vec![
                condition(OS_UPGRADED, UpgradeReason::Succeeded),
                condition(KUBERNETES_UPGRADED, UpgradeReason::Skipped),
            ],
            ..Default::default()
        };
        assert!(status.is_succeeded(OS_UPGRADED));
        assert!(!status.is_succeeded(KUBERNETES_UPGRADED));
    }

    #[test]
    fn test_condition_serialization() {
        let cond = condition(OS_UPGRADED, UpgradeReason::InProgress);
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "OSUpgraded");
        assert_eq!(json["status"], "False");
        assert_eq!(json["reason"], "InProgress");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
