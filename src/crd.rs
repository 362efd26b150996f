//! Custom resources owned by the operator: `UpgradePlan` and `ReleaseManifest`.

pub mod manifest;
mod schema;
pub mod spec;
pub mod status;
pub mod types;

pub use manifest::{
    ContainerImage, CoreComponent, KubernetesDistribution, OperatingSystem, ReleaseChart,
    ReleaseManifest, ReleaseManifestSpec,
};
pub use spec::{DisableDrain, UpgradePlan, UpgradePlanSpec};
pub use status::{
    KUBERNETES_UPGRADED, OS_UPGRADED, UpgradeCondition, UpgradePlanStatus,
    workload_condition_type,
};
pub use types::{Arch, ConditionStatus, UpgradeReason};
