//! Common types and utilities shared between cloudfleet-api and its clients

use serde::{Deserialize, Serialize};

/// Health and lifecycle status of a registered cloud
///
/// Persisted as a small integer code; see [`CloudStatus::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudStatus {
    /// Reachable and registered
    #[default]
    Normal,
    /// Last probe or connection attempt failed
    Abnormal,
    /// Self-built cloud whose deployment has not finished
    Initializing,
}

impl CloudStatus {
    /// Status derived from a single health probe
    pub fn from_probe(healthy: bool) -> Self {
        if healthy {
            Self::Normal
        } else {
            Self::Abnormal
        }
    }

    /// Status once a deployment task has finished
    pub fn after_deploy(succeeded: bool) -> Self {
        Self::from_probe(succeeded)
    }

    /// Persisted code for this status
    pub fn code(self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Abnormal => 1,
            Self::Initializing => 2,
        }
    }

    /// Parse a persisted status code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Normal),
            1 => Some(Self::Abnormal),
            2 => Some(Self::Initializing),
            _ => None,
        }
    }

    pub fn is_normal(self) -> bool {
        self == Self::Normal
    }
}

impl std::fmt::Display for CloudStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Abnormal => write!(f, "abnormal"),
            Self::Initializing => write!(f, "initializing"),
        }
    }
}

/// How a cloud came to be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CloudType {
    /// Existing cluster onboarded with its kubeconfig
    #[default]
    Standard,
    /// Cluster provisioned end-to-end by the control plane
    #[serde(rename = "selfbuilt")]
    SelfBuilt,
}

impl CloudType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::SelfBuilt => "selfbuilt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standard" => Some(Self::Standard),
            "selfbuilt" => Some(Self::SelfBuilt),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloudType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a node in a self-built cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Master,
    Worker,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Worker => "worker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "master" => Some(Self::Master),
            "worker" => Some(Self::Worker),
            _ => None,
        }
    }
}

/// Public view of a cloud; never carries the credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    pub id: i64,
    pub resource_version: i64,
    /// System-generated unique name
    pub name: String,
    /// User-facing display name
    pub alias_name: String,
    pub status: CloudStatus,
    pub cloud_type: CloudType,
    pub kube_version: String,
    pub node_number: i64,
    pub description: String,
    /// Unix timestamp of registration
    pub created_at: i64,
    /// Unix timestamp of last modification
    pub modified_at: i64,
}

/// Paging parameters for cloud listing
///
/// A `page` of zero selects the unpaginated listing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageOptions {
    #[serde(default)]
    pub page: i64,
    #[serde(default)]
    pub limit: i64,
}

/// One page of clouds plus the total row count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudPage {
    pub data: Vec<Cloud>,
    pub total: i64,
}

/// Result of a cloud listing in either mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CloudList {
    Page(CloudPage),
    All(Vec<Cloud>),
}

/// Shared error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("System error: {0}")]
    System(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
