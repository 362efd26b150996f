//! Job publishing the `ReleaseManifest` of a release version.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::naming;
use crate::config::Settings;

pub fn install_job(
    settings: &Settings,
    release_version: &str,
    namespace: &str,
    identity: BTreeMap<String, String>,
) -> Job {
    let image = format!("{}:{}", settings.release_manifest_image, release_version);

    Job {
        metadata: ObjectMeta {
            name: Some(naming::release_manifest_job_name(release_version)),
            namespace: Some(namespace.to_string()),
            labels: Some(identity.clone()),
            annotations: Some(identity),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(0),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    service_account_name: Some(settings.release_manifest_service_account.clone()),
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: "release-manifest".to_string(),
                        image: Some(image),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        args: Some(vec![
                            "apply".to_string(),
                            "-f".to_string(),
                            "release_manifest.yaml".to_string(),
                        ]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
