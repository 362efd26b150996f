//! Kubernetes distribution upgrade Plans.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;

use super::naming::{self, NodeRole};
use super::plan::PlanBuilder;
use crate::config::Settings;
use crate::crd::manifest::Kubernetes;
use crate::crd::KubernetesDistribution;
use crate::error::{Result, RuoError};
use crate::external::{ContainerSpec, Plan};

/// Kubernetes distributions the operator knows how to upgrade.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Distribution {
    K3s,
    Rke2,
}

impl Distribution {
    /// Detect the running distribution from the first node's kubelet version.
    pub fn detect(nodes: &[Node]) -> Result<Self> {
        let node = nodes.first().ok_or_else(|| {
            RuoError::UnsupportedDistribution("node list is empty".to_string())
        })?;
        let kubelet = node
            .status
            .as_ref()
            .and_then(|s| s.node_info.as_ref())
            .map_or("", |info| info.kubelet_version.as_str());

        if kubelet.contains("k3s") {
            Ok(Self::K3s)
        } else if kubelet.contains("rke2") {
            Ok(Self::Rke2)
        } else {
            Err(RuoError::UnsupportedDistribution(format!(
                "unsupported kubelet version '{kubelet}'"
            )))
        }
    }

    /// Target of this distribution in the release manifest.
    pub const fn target(self, kubernetes: &Kubernetes) -> &KubernetesDistribution {
        match self {
            Self::K3s => &kubernetes.k3s,
            Self::Rke2 => &kubernetes.rke2,
        }
    }

    pub fn upgrade_image(self, settings: &Settings) -> &str {
        match self {
            Self::K3s => &settings.k3s_upgrade_image,
            Self::Rke2 => &settings.rke2_upgrade_image,
        }
    }
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::K3s => write!(f, "k3s"),
            Self::Rke2 => write!(f, "rke2"),
        }
    }
}

pub fn upgrade_plan(
    settings: &Settings,
    role: NodeRole,
    distribution: Distribution,
    version: &str,
    suffix: &str,
    drain: bool,
    identity: BTreeMap<String, String>,
) -> Plan {
    let name = naming::kubernetes_plan_name(role, version, suffix);
    let image = distribution.upgrade_image(settings).to_string();

    let builder = PlanBuilder::new(settings, &name, identity)
        .role(role, &settings.keys.control_plane)
        .drain(drain)
        .version(version)
        .upgrade(ContainerSpec {
            image: image.clone(),
            ..Default::default()
        });

    match role {
        NodeRole::ControlPlane => builder.build(),
        NodeRole::Worker => {
            let control_plane = naming::kubernetes_plan_name(NodeRole::ControlPlane, version, suffix);
            builder
                .prepare(ContainerSpec {
                    image,
                    args: vec!["prepare".to_string(), control_plane],
                    ..Default::default()
                })
                .build()
        }
    }
}
