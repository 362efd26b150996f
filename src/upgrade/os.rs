//! Operating system upgrade objects: the migration script Secret and its Plans.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::naming::{self, NodeRole};
use super::plan::PlanBuilder;
use crate::config::Settings;
use crate::crd::{Arch, OperatingSystem};
use crate::external::{ContainerSpec, Plan};

const SCRIPT_NAME: &str = "os-upgrade.sh";
const SCRIPT_TEMPLATE: &str = include_str!("templates/os-upgrade.sh");

/// Render the migration script for the target operating system.
pub fn render_script(os: &OperatingSystem) -> String {
    let archs = os
        .supported_archs
        .iter()
        .map(|a| a.long())
        .collect::<Vec<_>>()
        .join(" ");

    [
        ("{{CPE_SCHEME}}", os.cpe_scheme.as_str()),
        ("{{VERSION}}", os.version.as_str()),
        ("{{ZYPPER_ID}}", os.zypper_id.as_str()),
        ("{{REPO_GPG_PATH}}", os.repo_gpg_path.as_str()),
        ("{{SUPPORTED_ARCHS}}", archs.as_str()),
    ]
    .iter()
    .fold(SCRIPT_TEMPLATE.to_string(), |script, (placeholder, value)| {
        script.replace(placeholder, value)
    })
}

pub fn upgrade_secret(
    settings: &Settings,
    os: &OperatingSystem,
    suffix: &str,
    identity: BTreeMap<String, String>,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(naming::os_secret_name(suffix)),
            namespace: Some(settings.upgrade_namespace.clone()),
            labels: Some(identity.clone()),
            annotations: Some(identity),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(BTreeMap::from([(
            SCRIPT_NAME.to_string(),
            render_script(os),
        )])),
        ..Default::default()
    }
}

pub fn upgrade_plan(
    settings: &Settings,
    role: NodeRole,
    release_version: &str,
    os: &OperatingSystem,
    suffix: &str,
    drain: bool,
    identity: BTreeMap<String, String>,
) -> Plan {
    let name = naming::os_plan_name(role, &os.zypper_id, &os.version, suffix);
    let secret = naming::os_secret_name(suffix);
    let secret_on_host = format!("/run/system-upgrade/secrets/{secret}");

    PlanBuilder::new(settings, &name, identity)
        .role(role, &settings.keys.control_plane)
        .drain(drain)
        .version(release_version)
        .secret(&secret, &format!("/host{secret_on_host}"))
        .upgrade(ContainerSpec {
            image: settings.os_upgrade_image.clone(),
            command: vec!["chroot".to_string(), "/host".to_string()],
            args: vec!["sh".to_string(), format!("{secret_on_host}/{SCRIPT_NAME}")],
        })
        .build()
}

/// Names of nodes whose architecture is outside the supported set.
pub fn unsupported_nodes(nodes: &[Node], supported: &[Arch]) -> Vec<String> {
    nodes
        .iter()
        .filter(|node| {
            let arch = node
                .status
                .as_ref()
                .and_then(|s| s.node_info.as_ref())
                .map_or("", |info| info.architecture.as_str());
            !supported.iter().any(|a| a.matches(arch))
        })
        .map(ResourceExt::name_any)
        .collect()
}
