//! Builders for the objects that carry out an upgrade: system-upgrade-controller
//! Plans, the OS migration Secret, `HelmChart` triggers and the release manifest Job.

pub mod helm;
pub mod kubernetes;
pub mod manifest;
pub mod naming;
pub mod os;
pub mod plan;
