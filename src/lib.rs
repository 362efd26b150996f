//! ruo - Release Upgrade Operator.
//!
//! Upgrades a cluster to the release declared in an `UpgradePlan`: the node
//! operating system first, then the Kubernetes distribution, then the Helm
//! workloads listed in the release's `ReleaseManifest`.
//!
//! The `ruo` binary runs the controller. [`validation`] holds the admission
//! checks for an external validating webhook.

pub mod chart;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod drain;
pub mod error;
pub mod external;
pub mod health;
pub mod metrics;
pub mod nodes;
pub mod phases;
pub mod status;
pub mod upgrade;
pub mod validation;
