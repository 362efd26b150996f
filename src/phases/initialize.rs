//! Initialize phase: start a new upgrade attempt after a spec change.

use std::time::Duration;

use tracing::{info, warn};

use crate::crd::{
    KUBERNETES_UPGRADED, OS_UPGRADED, ReleaseManifestSpec, UpgradePlanStatus, UpgradeReason,
    workload_condition_type,
};
use crate::status;

fn pending_message(component: &str) -> String {
    format!("{component} upgrade is not yet started")
}

/// Record a fresh naming suffix and reset every condition to Pending.
///
/// A suffix equal to the previous one is rejected without touching the status,
/// so objects of the attempt still in flight are never reused.
pub fn execute(
    status: &mut UpgradePlanStatus,
    generation: i64,
    release: &ReleaseManifestSpec,
    suffix: String,
) -> Option<Duration> {
    if status.naming_suffix.as_deref() == Some(suffix.as_str()) {
        warn!("Generated naming suffix {} collides with the current one, retrying", suffix);
        return Some(Duration::ZERO);
    }

    info!(
        "Starting upgrade attempt {} for release {} (generation {})",
        suffix, release.release_version, generation
    );
    status.naming_suffix = Some(suffix);
    status.observed_generation = generation;

    status::set_condition(status, OS_UPGRADED, UpgradeReason::Pending, pending_message("OS"));
    status::set_condition(
        status,
        KUBERNETES_UPGRADED,
        UpgradeReason::Pending,
        pending_message("Kubernetes"),
    );
    for chart in &release.components.workloads.helm {
        status::set_condition(
            status,
            &workload_condition_type(&chart.pretty_name),
            UpgradeReason::Pending,
            pending_message(&chart.pretty_name),
        );
    }

    Some(Duration::ZERO)
}
