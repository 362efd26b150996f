//! Condition builders and event recording for `UpgradePlan`.

use chrono::Utc;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Resource;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::debug;

use crate::crd::{UpgradeCondition, UpgradePlan, UpgradePlanStatus, UpgradeReason};

/// Set a condition, keeping its position in the list.
///
/// The transition time only moves when the condition's status changes.
pub fn set_condition(
    status: &mut UpgradePlanStatus,
    condition_type: &str,
    reason: UpgradeReason,
    message: impl Into<String>,
) {
    let message = message.into();
    let new_status = reason.status();
    debug!("Condition {} -> {} ({})", condition_type, reason, message);

    if let Some(existing) = status
        .conditions
        .iter_mut()
        .find(|c| c.r#type == condition_type)
    {
        if existing.status != new_status {
            existing.last_transition_time = Utc::now();
        }
        existing.status = new_status;
        existing.reason = reason;
        existing.message = message;
        return;
    }

    status.conditions.push(UpgradeCondition {
        r#type: condition_type.to_string(),
        status: new_status,
        reason,
        message,
        last_transition_time: Utc::now(),
    });
}

pub fn set_in_progress(status: &mut UpgradePlanStatus, condition_type: &str, message: impl Into<String>) {
    set_condition(status, condition_type, UpgradeReason::InProgress, message);
}

pub fn set_succeeded(status: &mut UpgradePlanStatus, condition_type: &str, message: impl Into<String>) {
    set_condition(status, condition_type, UpgradeReason::Succeeded, message);
}

pub fn set_failed(status: &mut UpgradePlanStatus, condition_type: &str, message: impl Into<String>) {
    set_condition(status, condition_type, UpgradeReason::Failed, message);
}

/// Event recorder bundled with its target `ObjectReference`.
pub struct EventRecorder {
    recorder: Recorder,
    obj_ref: ObjectReference,
}

impl EventRecorder {
    /// Create an event recorder for the given `UpgradePlan` resource.
    pub fn new(client: kube::Client, obj: &UpgradePlan) -> Self {
        let reporter = Reporter {
            controller: "ruo".into(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
            obj_ref: obj.object_ref(&()),
        }
    }

    /// Publish an event. Failures are logged, never propagated.
    pub async fn publish(&self, type_: EventType, reason: &str, message: &str) {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: reason.into(),
                    secondary: None,
                },
                &self.obj_ref,
            )
            .await
            .unwrap_or_else(|e| tracing::warn!("Failed to publish event {}: {}", reason, e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ConditionStatus, KUBERNETES_UPGRADED, OS_UPGRADED};

    #[test]
    fn test_set_condition_adds_new() {
        let mut status = UpgradePlanStatus::default();
        set_condition(&mut status, OS_UPGRADED, UpgradeReason::Pending, "not started");
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].status, ConditionStatus::Unknown);
        assert_eq!(status.conditions[0].message, "not started");
    }

    #[test]
    fn test_set_condition_keeps_position() {
        let mut status = UpgradePlanStatus::default();
        set_condition(&mut status, OS_UPGRADED, UpgradeReason::Pending, "");
        set_condition(&mut status, KUBERNETES_UPGRADED, UpgradeReason::Pending, "");
        set_succeeded(&mut status, OS_UPGRADED, "done");

        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].r#type, OS_UPGRADED);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
        assert_eq!(status.conditions[1].r#type, KUBERNETES_UPGRADED);
    }

    #[test]
    fn test_transition_time_only_moves_on_status_change() {
        let mut status = UpgradePlanStatus::default();
        set_in_progress(&mut status, OS_UPGRADED, "control plane");
        let first = status.conditions[0].last_transition_time;

        // InProgress -> Failed keeps status False
        set_failed(&mut status, OS_UPGRADED, "broken");
        assert_eq!(status.conditions[0].last_transition_time, first);
        assert_eq!(status.conditions[0].reason, UpgradeReason::Failed);

        set_succeeded(&mut status, OS_UPGRADED, "fixed");
        assert!(status.conditions[0].last_transition_time >= first);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_set_condition_replaces_message() {
        let mut status = UpgradePlanStatus::default();
        set_in_progress(&mut status, OS_UPGRADED, "Control plane nodes are being upgraded");
        set_in_progress(&mut status, OS_UPGRADED, "Worker nodes are being upgraded");
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].message, "Worker nodes are being upgraded");
    }
}
