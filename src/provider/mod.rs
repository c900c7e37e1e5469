//! Cluster providers for different Kubernetes backends
//!
//! kubeforge ships three providers behind one [`ClusterProvider`] trait:
//! - Existing: clusters already reachable through a kubeconfig (no lifecycle management)
//! - EKS: AWS managed control planes, driven through the `aws` CLI
//! - Kubeadm: self-managed clusters bootstrapped over SSH on raw Linux hosts
//!
//! Providers are looked up by [`ClusterType`] through a [`ClusterManager`].

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bootstrap::BootstrapError;
use crate::config::{CreateOptions, NodeGroupSpec, ScaleOptions};
use crate::ssh::SshError;

mod eks;
mod existing;
mod kubeadm;
pub mod nodes;
mod registry;

pub use eks::EksProvider;
pub use existing::ExistingProvider;
pub use kubeadm::{HostConnector, KubeadmProvider, SshConnector};
pub use registry::ClusterManager;

pub const CLUSTER_NAME_REQUIRED: &str = "cluster name is required";
pub const NODE_GROUP_NAME_REQUIRED: &str = "node group name is required";
pub const REGION_REQUIRED: &str = "region is required";
pub const CONTROL_PLANE_HOST_REQUIRED: &str = "at least one control-plane host is required";
pub const MAX_BELOW_MIN: &str = "max size must be greater than or equal to min size";

/// How long a cancelled operation gets to wind down before its timeout is reported
const CANCEL_GRACE: Duration = Duration::from_secs(15);

/// Backend discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterType {
    Existing,
    Eks,
    Kubeadm,
}

impl ClusterType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Existing => "existing",
            Self::Eks => "eks",
            Self::Kubeadm => "kubeadm",
        }
    }
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClusterType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "existing" => Ok(Self::Existing),
            "eks" => Ok(Self::Eks),
            "kubeadm" => Ok(Self::Kubeadm),
            other => Err(ProviderError::InvalidConfiguration(format!(
                "unknown cluster type '{other}'"
            ))),
        }
    }
}

/// Lifecycle state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStatus {
    Creating,
    Active,
    Degraded,
    Updating,
    Deleting,
    Failed,
    Unknown,
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Updating => "updating",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Ready,
    NotReady,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("Ready"),
            Self::NotReady => f.write_str("NotReady"),
        }
    }
}

/// One Kubernetes node as seen by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub role: NodeRole,
    pub status: NodeStatus,
    pub internal_address: Option<String>,
    pub external_address: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// A cluster as seen by a provider; derived fresh on every call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub cluster_type: ClusterType,
    pub status: ClusterStatus,
    pub kubernetes_version: Option<String>,
    pub endpoint: Option<String>,
    pub control_plane_nodes: Vec<NodeInfo>,
    pub worker_nodes: Vec<NodeInfo>,
}

impl ClusterInfo {
    /// Info with no nodes and unknown status
    pub fn new(name: impl Into<String>, cluster_type: ClusterType) -> Self {
        Self {
            name: name.into(),
            cluster_type,
            status: ClusterStatus::Unknown,
            kubernetes_version: None,
            endpoint: None,
            control_plane_nodes: Vec::new(),
            worker_nodes: Vec::new(),
        }
    }
}

/// Point-in-time health report
///
/// Providers never fail a health check: problems are reported as
/// `healthy == false` with a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    /// Component name to status text (control-plane pods, managed services)
    pub component_statuses: BTreeMap<String, String>,
    pub node_statuses: BTreeMap<String, NodeStatus>,
    pub checked_at: DateTime<Utc>,
}

impl HealthStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            component_statuses: BTreeMap::new(),
            node_statuses: BTreeMap::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            ..Self::healthy(message)
        }
    }
}

/// A pool of worker nodes sharing a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    pub name: String,
    pub cluster: String,
    pub desired_size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub status: String,
    pub instance_types: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// Error type for provider operations
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("cluster '{0}' not found")]
    ClusterNotFound(String),

    #[error("node group '{group}' not found in cluster '{cluster}'")]
    NodeGroupNotFound { cluster: String, group: String },

    #[error("{operation} is not supported by the {provider} provider")]
    Unsupported {
        provider: ClusterType,
        operation: &'static str,
    },

    #[error("timed out: {0}")]
    Timeout(String),

    /// The provider's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("no provider registered for cluster type '{0}'")]
    NotRegistered(ClusterType),

    #[error("kubeconfig error: {0}")]
    Kubeconfig(String),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    #[error(transparent)]
    Remote(#[from] SshError),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl ProviderError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn unsupported(provider: ClusterType, operation: &'static str) -> Self {
        Self::Unsupported {
            provider,
            operation,
        }
    }

    /// Input was rejected before any side effect
    #[must_use]
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }

    /// Cancelled by the caller, at the provider or the SSH layer
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Remote(SshError::Cancelled))
            || matches!(self, Self::Bootstrap(e) if e.is_cancelled())
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Bootstrap(BootstrapError::Timeout(_)) => true,
            Self::Remote(SshError::Timeout { .. }) => true,
            _ => false,
        }
    }
}

/// Uniform lifecycle contract over every backend
///
/// Mutating operations validate their input and fail with
/// [`ProviderError::InvalidConfiguration`] before touching anything remote.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterProvider: Send + Sync {
    fn cluster_type(&self) -> ClusterType;

    async fn create(&self, options: &CreateOptions) -> Result<ClusterInfo, ProviderError>;

    async fn delete(&self, name: &str) -> Result<(), ProviderError>;

    async fn scale(&self, name: &str, options: &ScaleOptions) -> Result<(), ProviderError>;

    /// Kubeconfig YAML for the cluster
    async fn get_kubeconfig(&self, name: &str) -> Result<Vec<u8>, ProviderError>;

    /// Never fails; unreachable or misconfigured clusters report `healthy == false`
    async fn health(&self, name: &str) -> HealthStatus;

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProviderError>;

    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo, ProviderError>;

    async fn create_node_group(
        &self,
        cluster: &str,
        spec: &NodeGroupSpec,
    ) -> Result<NodeGroup, ProviderError>;

    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<NodeGroup>, ProviderError>;

    async fn get_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup, ProviderError>;

    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<(), ProviderError>;
}

pub(crate) fn require_cluster_name(name: &str) -> Result<(), ProviderError> {
    if name.trim().is_empty() {
        return Err(ProviderError::invalid(CLUSTER_NAME_REQUIRED));
    }
    Ok(())
}

pub(crate) fn require_node_group_name(name: &str) -> Result<(), ProviderError> {
    if name.trim().is_empty() {
        return Err(ProviderError::invalid(NODE_GROUP_NAME_REQUIRED));
    }
    Ok(())
}

pub(crate) fn validate_bounds(
    desired: u32,
    min: Option<u32>,
    max: Option<u32>,
) -> Result<(), ProviderError> {
    if let (Some(min), Some(max)) = (min, max) {
        if max < min {
            return Err(ProviderError::invalid(MAX_BELOW_MIN));
        }
    }
    if min.is_some_and(|min| desired < min) || max.is_some_and(|max| desired > max) {
        return Err(ProviderError::invalid(
            "desired size must be between min size and max size",
        ));
    }
    Ok(())
}

pub(crate) fn validate_scale(name: &str, options: &ScaleOptions) -> Result<(), ProviderError> {
    require_cluster_name(name)?;
    if let Some(group) = &options.node_group {
        require_node_group_name(group)?;
    }
    validate_bounds(options.desired_size, options.min_size, options.max_size)
}

pub(crate) fn validate_node_group_spec(
    cluster: &str,
    spec: &NodeGroupSpec,
) -> Result<(), ProviderError> {
    require_cluster_name(cluster)?;
    require_node_group_name(&spec.name)?;
    validate_bounds(spec.desired_size, Some(spec.min_size), Some(spec.max_size))
}

/// Run `operation` with a child of `parent`, cancelling it when `timeout` elapses
///
/// On timeout the child token is cancelled and the operation gets a short
/// grace period to stop remote work before [`ProviderError::Timeout`] is
/// returned.
pub(crate) async fn with_deadline<T, F, Fut>(
    timeout: Duration,
    parent: &CancellationToken,
    operation: &str,
    f: F,
) -> Result<T, ProviderError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let token = parent.child_token();
    let fut = f(token.clone());
    tokio::pin!(fut);

    tokio::select! {
        result = &mut fut => result,
        () = tokio::time::sleep(timeout) => {
            warn!(operation, timeout = ?timeout, "Operation timed out, cancelling");
            token.cancel();
            let _ = tokio::time::timeout(CANCEL_GRACE, fut).await;
            Err(ProviderError::Timeout(format!(
                "{operation} did not finish within {timeout:?}"
            )))
        }
    }
}
