//! Admission checks for `UpgradePlan` creation and edits.
//!
//! Pure functions over the old and new objects, meant to back a validating
//! webhook. No webhook server is run by the operator itself.

use semver::Version;
use thiserror::Error;

use crate::crd::{UpgradePlan, UpgradeReason};

/// Condition reasons during which the plan must not be edited.
const LOCKING_REASONS: [UpgradeReason; 3] = [
    UpgradeReason::InProgress,
    UpgradeReason::Pending,
    UpgradeReason::Error,
];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("release version is required")]
    MissingReleaseVersion,

    #[error("'{0}' is not a semantic version")]
    InvalidReleaseVersion(String),

    #[error("upgrade plan cannot be edited while condition '{condition}' is in '{reason}' state")]
    UpgradeInProgress {
        condition: String,
        reason: UpgradeReason,
    },

    #[error("any edits over '{0}' must come with an increment of the releaseVersion")]
    UnchangedReleaseVersion(String),

    #[error("new releaseVersion must be greater than the currently applied one ('{0}')")]
    OlderReleaseVersion(String),
}

/// Parse a release version, accepting an optional leading `v`.
pub fn parse_release_version(release_version: &str) -> Result<Version, ValidationError> {
    if release_version.is_empty() {
        return Err(ValidationError::MissingReleaseVersion);
    }
    let trimmed = release_version.strip_prefix('v').unwrap_or(release_version);
    Version::parse(trimmed)
        .map_err(|_| ValidationError::InvalidReleaseVersion(release_version.to_string()))
}

pub fn validate_create(plan: &UpgradePlan) -> Result<(), ValidationError> {
    parse_release_version(&plan.spec.release_version).map(|_| ())
}

pub fn validate_update(old: &UpgradePlan, new: &UpgradePlan) -> Result<(), ValidationError> {
    // Finalizer removal during deletion.
    let old_finalizers = old.metadata.finalizers.as_ref().map_or(0, Vec::len);
    let new_finalizers = new.metadata.finalizers.as_ref().map_or(0, Vec::len);
    if new.metadata.deletion_timestamp.is_some() && new_finalizers < old_finalizers {
        return Ok(());
    }

    if let Some(status) = &new.status
        && let Some(locked) = status
            .conditions
            .iter()
            .find(|c| LOCKING_REASONS.contains(&c.reason))
    {
        return Err(ValidationError::UpgradeInProgress {
            condition: locked.r#type.clone(),
            reason: locked.reason,
        });
    }

    let requested = parse_release_version(&new.spec.release_version)?;

    let Some(last) = old
        .status
        .as_ref()
        .and_then(|s| s.last_successful_release_version.as_deref())
        .filter(|v| !v.is_empty())
    else {
        return Ok(());
    };
    let last_version = parse_release_version(last)?;

    match requested.cmp(&last_version) {
        std::cmp::Ordering::Greater => Ok(()),
        std::cmp::Ordering::Equal => Err(ValidationError::UnchangedReleaseVersion(
            new.metadata.name.clone().unwrap_or_default(),
        )),
        std::cmp::Ordering::Less => Err(ValidationError::OlderReleaseVersion(last.to_string())),
    }
}
