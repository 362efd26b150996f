//! Enum types for condition status, condition reasons and node architectures.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Tri-state status of a condition.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Reason recorded on an upgrade condition.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum UpgradeReason {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
    Error,
}

impl UpgradeReason {
    /// Status that always accompanies this reason.
    pub const fn status(self) -> ConditionStatus {
        match self {
            Self::Pending | Self::Error => ConditionStatus::Unknown,
            Self::InProgress | Self::Failed | Self::Skipped => ConditionStatus::False,
            Self::Succeeded => ConditionStatus::True,
        }
    }
}

impl std::fmt::Display for UpgradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InProgress => write!(f, "InProgress"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// CPU architecture supported by an operating system release.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum Arch {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
}

impl Arch {
    /// Long (kernel) name, e.g. `x86_64`.
    pub const fn long(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Short (Go/Kubernetes) name, e.g. `amd64`.
    pub const fn short(self) -> &'static str {
        match self {
            Self::X86_64 => "amd64",
            Self::Aarch64 => "arm64",
        }
    }

    /// Whether a node-reported architecture string names this architecture.
    pub fn matches(self, reported: &str) -> bool {
        reported == self.long() || reported == self.short()
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.long())
    }
}
