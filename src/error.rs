//! Custom error types for ruo.

use thiserror::Error;

/// Errors that can occur while reconciling an `UpgradePlan`.
#[derive(Error, Debug)]
pub enum RuoError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Values error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid node selector: {0}")]
    InvalidSelector(String),

    #[error("None of the nodes match label selector: {0}")]
    NoMatchingNodes(String),

    #[error("Unable to determine current Kubernetes distribution: {0}")]
    UnsupportedDistribution(String),

    #[error("Helm release '{release}' could not be decoded: {reason}")]
    HelmRelease { release: String, reason: String },

    #[error("Invalid chart values: {0}")]
    ChartValues(String),

    #[error("Unable to upgrade Helm release '{0}' backed by multiple HelmChart resources")]
    MultipleHelmCharts(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Resource is missing {0}")]
    MissingField(&'static str),

    #[error("{reconcile}; status update failed: {status}")]
    Joined {
        reconcile: Box<RuoError>,
        status: Box<RuoError>,
    },
}

impl RuoError {
    /// Returns true if the API server answered 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Returns true if the API server answered 409 (already exists or conflict).
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::AlreadyExists(_) => true,
            Self::Kube(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    /// Returns true if this error is transient and should be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Kube(_) | Self::AlreadyExists(_) => true,
            Self::Joined { reconcile, status } => reconcile.is_transient() || status.is_transient(),
            _ => false,
        }
    }

    /// Combine a reconcile outcome with the outcome of persisting status.
    pub fn join<T>(
        reconcile: Result<T, Self>,
        status: Result<(), Self>,
    ) -> Result<T, Self> {
        match (reconcile, status) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Ok(())) | (Ok(_), Err(e)) => Err(e),
            (Err(reconcile), Err(status)) => Err(Self::Joined {
                reconcile: Box::new(reconcile),
                status: Box::new(status),
            }),
        }
    }
}

pub type Result<T, E = RuoError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_multiple_helm_charts() {
        let err = RuoError::MultipleHelmCharts("rancher".to_string());
        assert_eq!(
            err.to_string(),
            "Unable to upgrade Helm release 'rancher' backed by multiple HelmChart resources"
        );
    }

    #[test]
    fn test_error_display_no_matching_nodes() {
        let err = RuoError::NoMatchingNodes("node-role In [true]".to_string());
        assert_eq!(
            err.to_string(),
            "None of the nodes match label selector: node-role In [true]"
        );
    }

    #[test]
    fn test_error_display_helm_release() {
        let err = RuoError::HelmRelease {
            release: "metal3".to_string(),
            reason: "invalid gzip header".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Helm release 'metal3' could not be decoded: invalid gzip header"
        );
    }

    #[test]
    fn test_error_is_transient() {
        assert!(!RuoError::MultipleHelmCharts("x".to_string()).is_transient());
        assert!(!RuoError::UnsupportedDistribution("v1.30".to_string()).is_transient());
        assert!(!RuoError::InvalidSelector("bad".to_string()).is_transient());
    }

    #[test]
    fn test_error_not_found_only_for_api_errors() {
        assert!(!RuoError::MissingField("metadata.name").is_not_found());
        assert!(!RuoError::MissingField("metadata.name").is_conflict());
        assert!(RuoError::AlreadyExists("Job/upgrades/apply".to_string()).is_conflict());
        assert!(RuoError::AlreadyExists("Job/upgrades/apply".to_string()).is_transient());
    }

    #[test]
    fn test_join_keeps_single_error() {
        let joined: Result<u8> = RuoError::join(Ok(1), Err(RuoError::MissingField("status")));
        assert!(matches!(joined, Err(RuoError::MissingField("status"))));

        let joined: Result<u8> = RuoError::join(Err(RuoError::MissingField("spec")), Ok(()));
        assert!(matches!(joined, Err(RuoError::MissingField("spec"))));

        let joined: Result<u8> = RuoError::join(Ok(7), Ok(()));
        assert_eq!(joined.unwrap(), 7);
    }

    #[test]
    fn test_join_combines_both_errors() {
        let joined: Result<()> = RuoError::join(
            Err(RuoError::NoMatchingNodes("workers".to_string())),
            Err(RuoError::MissingField("metadata.name")),
        );
        let err = joined.unwrap_err();
        assert_eq!(
            err.to_string(),
            "None of the nodes match label selector: workers; status update failed: Resource is missing metadata.name"
        );
    }
}
