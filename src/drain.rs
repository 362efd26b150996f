//! Drain policy derived from cluster topology and user overrides.

use k8s_openapi::api::core::v1::Node;

use crate::crd::DisableDrain;
use crate::nodes;

/// Whether Plans for each role drain their nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainPolicy {
    pub control_plane: bool,
    pub worker: bool,
}

impl DrainPolicy {
    /// Topology default for the given (control-plane, worker) node counts.
    pub const fn from_counts(control_plane: usize, workers: usize) -> Self {
        let (control_plane, worker) = match (control_plane, workers) {
            (cp, w) if cp > 1 && w <= 1 => (true, false),
            (cp, w) if cp <= 1 && w > 1 => (false, true),
            (cp, w) if cp <= 1 && w <= 1 => (false, false),
            _ => (true, true),
        };
        Self {
            control_plane,
            worker,
        }
    }

    /// Apply user overrides. An override can only switch draining off.
    pub fn with_overrides(self, overrides: Option<&DisableDrain>) -> Self {
        let Some(overrides) = overrides else {
            return self;
        };
        Self {
            control_plane: self.control_plane && overrides.control_plane != Some(true),
            worker: self.worker && overrides.worker != Some(true),
        }
    }

    pub fn resolve(nodes: &[Node], control_plane_label: &str, overrides: Option<&DisableDrain>) -> Self {
        let (control_plane, workers) = nodes::role_counts(nodes, control_plane_label);
        Self::from_counts(control_plane, workers).with_overrides(overrides)
    }
}
