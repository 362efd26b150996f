//! Names and identity tags of the objects created for an upgrade attempt.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;

use crate::config::Keys;
use crate::crd::UpgradePlan;

/// 5 random bytes = 10 hexadecimal characters.
const SUFFIX_BYTES: usize = 5;

/// Node role targeted by a system-upgrade-controller Plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl NodeRole {
    pub const fn key(self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "workers",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Generate a fresh naming suffix.
pub fn generate_suffix() -> String {
    let mut bytes = [0u8; SUFFIX_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

pub fn os_plan_name(role: NodeRole, zypper_id: &str, version: &str, suffix: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        role.key(),
        zypper_id.to_lowercase(),
        version.replace('.', "-"),
        suffix
    )
}

pub fn os_secret_name(suffix: &str) -> String {
    format!("os-upgrade-secret-{suffix}")
}

pub fn kubernetes_plan_name(role: NodeRole, version: &str, suffix: &str) -> String {
    format!("{}-{}-{}", role.key(), version.replace('+', "-"), suffix)
}

/// Job name for installing the manifest of a release. One job per release version,
/// no naming suffix.
pub fn release_manifest_job_name(release_version: &str) -> String {
    let version = release_version.strip_prefix('v').unwrap_or(release_version);
    format!("apply-release-manifest-{}", version.replace('.', "-"))
}

/// Labels/annotations tying an object to the `UpgradePlan` that created it.
pub fn identity(keys: &Keys, plan: &UpgradePlan) -> BTreeMap<String, String> {
    BTreeMap::from([
        (keys.plan_name.clone(), plan.name_any()),
        (keys.plan_namespace.clone(), plan.namespace().unwrap_or_default()),
    ])
}

/// Read the owning `UpgradePlan` (name, namespace) back from an object's annotations.
pub fn owner_of(keys: &Keys, meta: &ObjectMeta) -> Option<(String, String)> {
    let annotations = meta.annotations.as_ref()?;
    let name = annotations.get(&keys.plan_name)?;
    let namespace = annotations.get(&keys.plan_namespace)?;
    Some((name.clone(), namespace.clone()))
}

/// Object carries the identity annotations of the given plan.
pub fn is_owned_by(keys: &Keys, meta: &ObjectMeta, plan: &UpgradePlan) -> bool {
    owner_of(keys, meta).is_some_and(|(name, namespace)| {
        name == plan.name_any() && Some(namespace) == plan.namespace()
    })
}
