//! Command line / environment configuration and the derived runtime settings.

use std::time::Duration;

use clap::{Parser, Subcommand};
use const_format::concatcp;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");
const LONG_VERSION: &str = concatcp!(VERSION, " (commit: ", COMMIT, ", build: ", BUILD_DATE, ")");

pub mod env {
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    pub const HEALTH_PORT: &str = "HEALTH_PORT";
    pub const METRICS_PORT: &str = "METRICS_PORT";
    pub const UPGRADE_NAMESPACE: &str = "UPGRADE_NAMESPACE";
    pub const CHART_NAMESPACE: &str = "CHART_NAMESPACE";
    pub const UPGRADE_SERVICE_ACCOUNT: &str = "UPGRADE_SERVICE_ACCOUNT";
    pub const RELEASE_MANIFEST_IMAGE: &str = "RELEASE_MANIFEST_IMAGE";
    pub const RELEASE_MANIFEST_SERVICE_ACCOUNT: &str = "RELEASE_MANIFEST_SERVICE_ACCOUNT";
    pub const OS_UPGRADE_IMAGE: &str = "OS_UPGRADE_IMAGE";
    pub const RKE2_UPGRADE_IMAGE: &str = "RKE2_UPGRADE_IMAGE";
    pub const K3S_UPGRADE_IMAGE: &str = "K3S_UPGRADE_IMAGE";
    pub const NODE_POLL_INTERVAL_SECS: &str = "NODE_POLL_INTERVAL_SECS";
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the CustomResourceDefinitions owned by the operator as YAML
    Crd,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "ruo",
    version,
    long_version = LONG_VERSION,
    about = "Release Upgrade Operator",
    long_about = "Kubernetes operator that upgrades the operating system, the Kubernetes distribution and the Helm workloads of a cluster to a declared release."
)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Log format: json or pretty
    #[arg(long, env = env::LOG_FORMAT, default_value = "json")]
    pub log_format: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = env::LOG_LEVEL, default_value = "info")]
    pub log_level: String,

    /// Health check server port
    #[arg(long, env = env::HEALTH_PORT, default_value = "8080")]
    pub health_port: u16,

    /// Prometheus metrics server port
    #[arg(long, env = env::METRICS_PORT, default_value = "8081")]
    pub metrics_port: u16,

    /// Namespace of system-upgrade-controller (Plans and their Secrets)
    #[arg(long, env = env::UPGRADE_NAMESPACE, default_value = "cattle-system")]
    pub upgrade_namespace: String,

    /// Namespace of helm-controller HelmChart resources
    #[arg(long, env = env::CHART_NAMESPACE, default_value = "kube-system")]
    pub chart_namespace: String,

    /// Service account the upgrade Plans run as
    #[arg(long, env = env::UPGRADE_SERVICE_ACCOUNT, default_value = "system-upgrade-controller")]
    pub upgrade_service_account: String,

    /// Image publishing release manifests; the release version is used as tag
    #[arg(long, env = env::RELEASE_MANIFEST_IMAGE, default_value = "registry.suse.com/edge/release-manifest")]
    pub release_manifest_image: String,

    /// Service account the release manifest job runs as
    #[arg(long, env = env::RELEASE_MANIFEST_SERVICE_ACCOUNT, default_value = "ruo")]
    pub release_manifest_service_account: String,

    /// Image running the OS upgrade script on each node
    #[arg(long, env = env::OS_UPGRADE_IMAGE, default_value = "registry.suse.com/bci/bci-base:15.5")]
    pub os_upgrade_image: String,

    /// RKE2 upgrade image (tagged with the target version by system-upgrade-controller)
    #[arg(long, env = env::RKE2_UPGRADE_IMAGE, default_value = "rancher/rke2-upgrade")]
    pub rke2_upgrade_image: String,

    /// K3s upgrade image (tagged with the target version by system-upgrade-controller)
    #[arg(long, env = env::K3S_UPGRADE_IMAGE, default_value = "rancher/k3s-upgrade")]
    pub k3s_upgrade_image: String,

    /// Delay between checks while nodes converge, in seconds
    #[arg(long, env = env::NODE_POLL_INTERVAL_SECS, default_value = "60")]
    pub node_poll_interval_secs: u64,
}

impl Config {
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Validate values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), String> {
        if self.node_poll_interval_secs == 0 {
            return Err(format!("{} must be greater than 0", env::NODE_POLL_INTERVAL_SECS));
        }
        if !matches!(self.log_format.to_lowercase().as_str(), "json" | "pretty") {
            return Err(format!(
                "{} must be 'json' or 'pretty', got '{}'",
                env::LOG_FORMAT,
                self.log_format
            ));
        }
        Ok(())
    }
}

/// Label, annotation and finalizer keys written by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub finalizer: String,
    pub plan_name: String,
    pub plan_namespace: String,
    pub release: String,
    pub control_plane: String,
    pub helm_chart_job: String,
}

impl Default for Keys {
    fn default() -> Self {
        Self {
            finalizer: "lifecycle.ruo.io/finalizer".to_string(),
            plan_name: "lifecycle.ruo.io/upgrade-plan-name".to_string(),
            plan_namespace: "lifecycle.ruo.io/upgrade-plan-namespace".to_string(),
            release: "lifecycle.ruo.io/release".to_string(),
            control_plane: "node-role.kubernetes.io/control-plane".to_string(),
            helm_chart_job: "helmcharts.helm.cattle.io/chart".to_string(),
        }
    }
}

/// Immutable runtime settings shared by every component.
#[derive(Debug, Clone)]
pub struct Settings {
    pub keys: Keys,
    pub upgrade_namespace: String,
    pub chart_namespace: String,
    pub upgrade_service_account: String,
    pub release_manifest_image: String,
    pub release_manifest_service_account: String,
    pub os_upgrade_image: String,
    pub rke2_upgrade_image: String,
    pub k3s_upgrade_image: String,
    pub node_poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            keys: Keys::default(),
            upgrade_namespace: "cattle-system".to_string(),
            chart_namespace: "kube-system".to_string(),
            upgrade_service_account: "system-upgrade-controller".to_string(),
            release_manifest_image: "registry.suse.com/edge/release-manifest".to_string(),
            release_manifest_service_account: "ruo".to_string(),
            os_upgrade_image: "registry.suse.com/bci/bci-base:15.5".to_string(),
            rke2_upgrade_image: "rancher/rke2-upgrade".to_string(),
            k3s_upgrade_image: "rancher/k3s-upgrade".to_string(),
            node_poll_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            keys: Keys::default(),
            upgrade_namespace: config.upgrade_namespace.clone(),
            chart_namespace: config.chart_namespace.clone(),
            upgrade_service_account: config.upgrade_service_account.clone(),
            release_manifest_image: config.release_manifest_image.clone(),
            release_manifest_service_account: config.release_manifest_service_account.clone(),
            os_upgrade_image: config.os_upgrade_image.clone(),
            rke2_upgrade_image: config.rke2_upgrade_image.clone(),
            k3s_upgrade_image: config.k3s_upgrade_image.clone(),
            node_poll_interval: Duration::from_secs(config.node_poll_interval_secs),
        }
    }
}
