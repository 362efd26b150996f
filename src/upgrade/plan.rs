//! Builder for system-upgrade-controller `Plan` objects.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};

use super::naming::NodeRole;
use crate::config::Settings;
use crate::external::{ContainerSpec, DrainSpec, Plan, PlanSpec, SecretSpec};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Incrementally assembles a `Plan` in the upgrade namespace.
pub struct PlanBuilder {
    meta: ObjectMeta,
    spec: PlanSpec,
}

impl PlanBuilder {
    pub fn new(settings: &Settings, name: &str, identity: BTreeMap<String, String>) -> Self {
        Self {
            meta: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(settings.upgrade_namespace.clone()),
                labels: Some(identity.clone()),
                annotations: Some(identity),
                ..Default::default()
            },
            spec: PlanSpec {
                service_account_name: settings.upgrade_service_account.clone(),
                cordon: true,
                ..Default::default()
            },
        }
    }

    /// Target the given role: selector, concurrency and, for control-plane nodes,
    /// the tolerations needed to schedule there.
    pub fn role(mut self, role: NodeRole, control_plane_label: &str) -> Self {
        let operator = match role {
            NodeRole::ControlPlane => "In",
            NodeRole::Worker => "NotIn",
        };
        self.spec.node_selector = Some(LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: control_plane_label.to_string(),
                operator: operator.to_string(),
                values: Some(vec!["true".to_string()]),
            }]),
            match_labels: None,
        });
        match role {
            NodeRole::ControlPlane => {
                self.spec.concurrency = 1;
                self.spec.tolerations = control_plane_tolerations(control_plane_label);
            }
            NodeRole::Worker => self.spec.concurrency = 2,
        }
        self
    }

    pub fn drain(mut self, enabled: bool) -> Self {
        self.spec.drain = enabled.then(|| DrainSpec {
            timeout: i64::try_from(DRAIN_TIMEOUT.as_nanos()).ok(),
            delete_emptydir_data: Some(true),
            ignore_daemon_sets: Some(true),
            force: true,
        });
        self
    }

    pub fn version(mut self, version: &str) -> Self {
        self.spec.version = Some(version.to_string());
        self
    }

    pub fn secret(mut self, name: &str, path: &str) -> Self {
        self.spec.secrets.push(SecretSpec {
            name: name.to_string(),
            path: path.to_string(),
        });
        self
    }

    pub fn prepare(mut self, container: ContainerSpec) -> Self {
        self.spec.prepare = Some(container);
        self
    }

    pub fn upgrade(mut self, container: ContainerSpec) -> Self {
        self.spec.upgrade = Some(container);
        self
    }

    pub fn build(self) -> Plan {
        Plan {
            metadata: self.meta,
            spec: self.spec,
            status: None,
        }
    }
}

fn toleration(key: &str, value: &str, effect: &str) -> Toleration {
    Toleration {
        key: Some(key.to_string()),
        operator: Some("Equal".to_string()),
        value: Some(value.to_string()),
        effect: Some(effect.to_string()),
        toleration_seconds: None,
    }
}

fn control_plane_tolerations(control_plane_label: &str) -> Vec<Toleration> {
    vec![
        toleration("CriticalAddonsOnly", "true", "NoExecute"),
        toleration(control_plane_label, "", "NoSchedule"),
        toleration("node-role.kubernetes.io/etcd", "", "NoExecute"),
    ]
}
