//! Release resolution: find the manifest of the requested release or have it published.

use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;
use tokio_retry::Retry;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info};

use super::PhaseContext;
use crate::crd::ReleaseManifest;
use crate::error::Result;
use crate::upgrade::manifest;

/// Attempts at creating the install Job, the first one included.
const INSTALL_ATTEMPTS: usize = 5;

/// 500ms, 1s, 2s, 4s between attempts.
fn install_backoff() -> impl Iterator<Item = Duration> {
    ExponentialBackoff::from_millis(2)
        .factor(250)
        .max_delay(Duration::from_secs(4))
        .take(INSTALL_ATTEMPTS - 1)
}

/// Manifest in the plan's namespace whose version matches the requested one.
pub async fn resolve(ctx: &PhaseContext<'_>) -> Result<Option<ReleaseManifest>> {
    let namespace = ctx.plan.namespace().unwrap_or_default();
    let release_version = &ctx.plan.spec.release_version;

    let manifest = ctx
        .cluster
        .list_release_manifests(&namespace)
        .await?
        .into_iter()
        .find(|m| &m.spec.release_version == release_version);

    if manifest.is_none() {
        debug!("No ReleaseManifest for release {} in {}", release_version, namespace);
    }
    Ok(manifest)
}

/// Create the Job that publishes the release manifest.
///
/// A previous Job with the same name may still be terminating, so creation is
/// retried until it goes away. A live Job with that name counts as success.
pub async fn install(ctx: &PhaseContext<'_>) -> Result<()> {
    let namespace = ctx.plan.namespace().unwrap_or_default();
    let job = manifest::install_job(
        ctx.settings,
        &ctx.plan.spec.release_version,
        &namespace,
        ctx.identity(),
    );
    info!(
        "Installing release manifest {} via job {}",
        ctx.plan.spec.release_version,
        job.name_any()
    );

    Retry::start(install_backoff(), || create_install_job(ctx, &job)).await
}

async fn create_install_job(ctx: &PhaseContext<'_>, job: &Job) -> Result<()> {
    let Err(e) = ctx.create_job(job).await else {
        return Ok(());
    };
    if !e.is_conflict() {
        return Err(e);
    }

    let namespace = job.namespace().unwrap_or_default();
    match ctx.cluster.get_job(&namespace, &job.name_any()).await? {
        Some(existing) if existing.metadata.deletion_timestamp.is_none() => {
            debug!("Job {} already exists", job.name_any());
            Ok(())
        }
        _ => {
            debug!("Job {} is terminating, retrying", job.name_any());
            Err(e)
        }
    }
}
