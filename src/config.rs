//! Configuration types for kubeforge
//!
//! Everything here is a plain value built programmatically with consuming
//! setters, or deserialized from plan JSON. Nothing in this module reads the
//! environment.
//!
//! # Example
//!
//! ```
//! use kubeforge::config::{BootstrapConfig, CniPlugin, CreateOptions, HostSpec};
//!
//! let bootstrap = BootstrapConfig::builder()
//!     .kubernetes_version("1.31.2")
//!     .cni_plugin(CniPlugin::Flannel)
//!     .build();
//! assert_eq!(bootstrap.minor_version(), "1.31");
//!
//! let create = CreateOptions::new("lab")
//!     .control_plane_host(HostSpec::new("10.0.0.5").user("ubuntu"))
//!     .worker_host(HostSpec::new("10.0.0.6").user("ubuntu"));
//! assert_eq!(create.kubeadm.workers.len(), 1);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bootstrap::join::JoinArtifacts;
use crate::ssh::{HostKeyPolicy, KeySource, SshConfig, DEFAULT_SSH_PORT};

pub const DEFAULT_KUBERNETES_VERSION: &str = "1.31";
pub const DEFAULT_POD_CIDR: &str = "10.244.0.0/16";
pub const DEFAULT_SERVICE_CIDR: &str = "10.96.0.0/12";
pub const DEFAULT_CLUSTER_NAME: &str = "kubernetes";
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

/// Pod network add-on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CniPlugin {
    #[default]
    Calico,
    Flannel,
}

impl CniPlugin {
    /// Case-insensitive exact lookup; `None` for anything else
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "calico" => Some(Self::Calico),
            "flannel" => Some(Self::Flannel),
            _ => None,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Calico => "calico",
            Self::Flannel => "flannel",
        }
    }

    /// Pinned manifest applied by the CNI stage
    #[must_use]
    pub fn manifest_url(self) -> &'static str {
        match self {
            Self::Calico => {
                "https://raw.githubusercontent.com/projectcalico/calico/v3.28.0/manifests/calico.yaml"
            }
            Self::Flannel => {
                "https://github.com/flannel-io/flannel/releases/download/v0.25.6/kube-flannel.yml"
            }
        }
    }
}

impl fmt::Display for CniPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters for one bootstrap run
///
/// Immutable once built. Empty values passed to the builder fall back to
/// the defaults above.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapConfig {
    kubernetes_version: String,
    pod_cidr: String,
    service_cidr: String,
    cluster_name: String,
    control_plane_address: Option<String>,
    is_control_plane: bool,
    join_token: String,
    ca_cert_hash: String,
    cni_plugin: CniPlugin,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfigBuilder::default().build()
    }
}

impl BootstrapConfig {
    #[must_use]
    pub fn builder() -> BootstrapConfigBuilder {
        BootstrapConfigBuilder::default()
    }

    #[must_use]
    pub fn kubernetes_version(&self) -> &str {
        &self.kubernetes_version
    }

    /// `major.minor`, as used by the pkgs.k8s.io repository path
    #[must_use]
    pub fn minor_version(&self) -> String {
        self.kubernetes_version
            .split('.')
            .take(2)
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Value for `kubeadm init --kubernetes-version`
    ///
    /// A full patch version pins exactly; a bare minor tracks its latest patch.
    #[must_use]
    pub fn kubeadm_version(&self) -> String {
        if self.kubernetes_version.split('.').count() >= 3 {
            format!("v{}", self.kubernetes_version)
        } else {
            format!("stable-{}", self.minor_version())
        }
    }

    #[must_use]
    pub fn pod_cidr(&self) -> &str {
        &self.pod_cidr
    }

    #[must_use]
    pub fn service_cidr(&self) -> &str {
        &self.service_cidr
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    #[must_use]
    pub fn control_plane_address(&self) -> Option<&str> {
        self.control_plane_address.as_deref()
    }

    #[must_use]
    pub fn is_control_plane(&self) -> bool {
        self.is_control_plane
    }

    #[must_use]
    pub fn join_token(&self) -> &str {
        &self.join_token
    }

    #[must_use]
    pub fn ca_cert_hash(&self) -> &str {
        &self.ca_cert_hash
    }

    #[must_use]
    pub fn cni_plugin(&self) -> CniPlugin {
        self.cni_plugin
    }

    /// Copy of this config for joining a node with `artifacts`
    #[must_use]
    pub fn for_join(
        &self,
        artifacts: &JoinArtifacts,
        control_plane_address: &str,
        is_control_plane: bool,
    ) -> Self {
        Self {
            control_plane_address: Some(control_plane_address.to_string()),
            is_control_plane,
            join_token: artifacts.token.clone(),
            ca_cert_hash: artifacts.ca_cert_hash.clone(),
            ..self.clone()
        }
    }
}

/// Builder for [`BootstrapConfig`]
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfigBuilder {
    kubernetes_version: Option<String>,
    pod_cidr: Option<String>,
    service_cidr: Option<String>,
    cluster_name: Option<String>,
    control_plane_address: Option<String>,
    is_control_plane: bool,
    join_token: Option<String>,
    ca_cert_hash: Option<String>,
    cni_plugin: CniPlugin,
}

fn non_empty(value: impl Into<String>) -> Option<String> {
    let value = value.into();
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl BootstrapConfigBuilder {
    /// Accepts `1.31`, `1.31.2` or `v1.31.2`
    #[must_use]
    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version =
            non_empty(version).map(|v| v.trim_start_matches('v').to_string());
        self
    }

    #[must_use]
    pub fn pod_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.pod_cidr = non_empty(cidr);
        self
    }

    #[must_use]
    pub fn service_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.service_cidr = non_empty(cidr);
        self
    }

    #[must_use]
    pub fn cluster_name(mut self, name: impl Into<String>) -> Self {
        self.cluster_name = non_empty(name);
        self
    }

    /// Stable API endpoint (`host` or `host:port`) for HA and external access
    #[must_use]
    pub fn control_plane_address(mut self, address: impl Into<String>) -> Self {
        self.control_plane_address = non_empty(address);
        self
    }

    #[must_use]
    pub fn control_plane(mut self, is_control_plane: bool) -> Self {
        self.is_control_plane = is_control_plane;
        self
    }

    #[must_use]
    pub fn join_token(mut self, token: impl Into<String>) -> Self {
        self.join_token = non_empty(token);
        self
    }

    #[must_use]
    pub fn ca_cert_hash(mut self, hash: impl Into<String>) -> Self {
        self.ca_cert_hash = non_empty(hash);
        self
    }

    #[must_use]
    pub fn cni_plugin(mut self, plugin: CniPlugin) -> Self {
        self.cni_plugin = plugin;
        self
    }

    #[must_use]
    pub fn build(self) -> BootstrapConfig {
        BootstrapConfig {
            kubernetes_version: self
                .kubernetes_version
                .unwrap_or_else(|| DEFAULT_KUBERNETES_VERSION.to_string()),
            pod_cidr: self
                .pod_cidr
                .unwrap_or_else(|| DEFAULT_POD_CIDR.to_string()),
            service_cidr: self
                .service_cidr
                .unwrap_or_else(|| DEFAULT_SERVICE_CIDR.to_string()),
            cluster_name: self
                .cluster_name
                .unwrap_or_else(|| DEFAULT_CLUSTER_NAME.to_string()),
            control_plane_address: self.control_plane_address,
            is_control_plane: self.is_control_plane,
            join_token: self.join_token.unwrap_or_default(),
            ca_cert_hash: self.ca_cert_hash.unwrap_or_default(),
            cni_plugin: self.cni_plugin,
        }
    }
}

/// Append the API server port unless `address` already names one
#[must_use]
pub fn with_api_server_port(address: &str) -> String {
    let has_port = match address.rsplit_once(':') {
        // Bracketed IPv6 literal: only a port after the closing bracket counts
        Some((host, port)) if address.starts_with('[') => {
            host.ends_with(']') && port.parse::<u16>().is_ok()
        }
        Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    };
    if has_port {
        address.to_string()
    } else if address.contains(':') && !address.starts_with('[') {
        format!("[{address}]:{DEFAULT_API_SERVER_PORT}")
    } else {
        format!("{address}:{DEFAULT_API_SERVER_PORT}")
    }
}

/// A raw Linux host reachable over SSH
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSpec {
    pub address: String,
    pub port: u16,
    pub user: String,
    /// Per-host private key; falls back to the provider's key source
    pub key_path: Option<PathBuf>,
}

impl Default for HostSpec {
    fn default() -> Self {
        Self {
            address: String::new(),
            port: DEFAULT_SSH_PORT,
            user: "root".to_string(),
            key_path: None,
        }
    }
}

impl HostSpec {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    #[must_use]
    pub fn key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// SSH settings for this host
    #[must_use]
    pub fn ssh_config(&self, default_key: &KeySource, policy: &HostKeyPolicy) -> SshConfig {
        let key = self
            .key_path
            .clone()
            .map_or_else(|| default_key.clone(), KeySource::Path);
        SshConfig::new(self.address.clone(), self.user.clone(), key)
            .port(self.port)
            .host_key_policy(policy.clone())
    }
}

/// Self-managed (kubeadm) creation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubeadmOptions {
    /// First entry runs `kubeadm init`; the rest join as control-plane replicas
    pub control_plane: Vec<HostSpec>,
    pub workers: Vec<HostSpec>,
    pub pod_cidr: Option<String>,
    pub service_cidr: Option<String>,
    pub cni_plugin: Option<String>,
    /// Externally reachable API endpoint; defaults to the first control-plane host
    pub control_plane_address: Option<String>,
}

/// Managed (EKS) creation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EksOptions {
    pub role_arn: Option<String>,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

/// Options for [`ClusterProvider::create`](crate::provider::ClusterProvider::create)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    pub name: String,
    pub kubernetes_version: Option<String>,
    /// Required by the managed backend
    pub region: Option<String>,
    pub node_groups: Vec<NodeGroupSpec>,
    pub kubeadm: KubeadmOptions,
    pub eks: EksOptions,
    pub timeout_secs: Option<u64>,
}

impl CreateOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn kubernetes_version(mut self, version: impl Into<String>) -> Self {
        self.kubernetes_version = Some(version.into());
        self
    }

    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    #[must_use]
    pub fn node_group(mut self, group: NodeGroupSpec) -> Self {
        self.node_groups.push(group);
        self
    }

    #[must_use]
    pub fn control_plane_host(mut self, host: HostSpec) -> Self {
        self.kubeadm.control_plane.push(host);
        self
    }

    #[must_use]
    pub fn worker_host(mut self, host: HostSpec) -> Self {
        self.kubeadm.workers.push(host);
        self
    }

    #[must_use]
    pub fn cni_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.kubeadm.cni_plugin = Some(plugin.into());
        self
    }

    #[must_use]
    pub fn pod_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.kubeadm.pod_cidr = Some(cidr.into());
        self
    }

    #[must_use]
    pub fn service_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.kubeadm.service_cidr = Some(cidr.into());
        self
    }

    #[must_use]
    pub fn control_plane_address(mut self, address: impl Into<String>) -> Self {
        self.kubeadm.control_plane_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn role_arn(mut self, arn: impl Into<String>) -> Self {
        self.eks.role_arn = Some(arn.into());
        self
    }

    #[must_use]
    pub fn subnet_ids(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.eks.subnet_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    /// Configured timeout, or `default` when unset
    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_secs.map_or(default, Duration::from_secs)
    }
}

/// Options for [`ClusterProvider::scale`](crate::provider::ClusterProvider::scale)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleOptions {
    /// Node group to resize; `None` means the default worker pool
    pub node_group: Option<String>,
    pub desired_size: u32,
    pub min_size: Option<u32>,
    pub max_size: Option<u32>,
    /// Hosts available for scale-up on the self-managed backend
    pub hosts: Vec<HostSpec>,
    pub timeout_secs: Option<u64>,
}

impl ScaleOptions {
    #[must_use]
    pub fn new(desired_size: u32) -> Self {
        Self {
            desired_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn node_group(mut self, name: impl Into<String>) -> Self {
        self.node_group = Some(name.into());
        self
    }

    #[must_use]
    pub fn bounds(mut self, min_size: u32, max_size: u32) -> Self {
        self.min_size = Some(min_size);
        self.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub fn host(mut self, host: HostSpec) -> Self {
        self.hosts.push(host);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs());
        self
    }

    #[must_use]
    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout_secs.map_or(default, Duration::from_secs)
    }
}

/// A named pool of worker nodes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGroupSpec {
    pub name: String,
    pub desired_size: u32,
    pub min_size: u32,
    pub max_size: u32,
    pub instance_types: Vec<String>,
    pub node_role_arn: Option<String>,
    pub subnet_ids: Vec<String>,
    pub labels: BTreeMap<String, String>,
    /// Hosts backing the group on the self-managed backend
    pub hosts: Vec<HostSpec>,
}

impl NodeGroupSpec {
    pub fn new(name: impl Into<String>, desired_size: u32) -> Self {
        Self {
            name: name.into(),
            desired_size,
            min_size: desired_size,
            max_size: desired_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn bounds(mut self, min_size: u32, max_size: u32) -> Self {
        self.min_size = min_size;
        self.max_size = max_size;
        self
    }

    #[must_use]
    pub fn instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_types.push(instance_type.into());
        self
    }

    #[must_use]
    pub fn node_role_arn(mut self, arn: impl Into<String>) -> Self {
        self.node_role_arn = Some(arn.into());
        self
    }

    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn host(mut self, host: HostSpec) -> Self {
        self.hosts.push(host);
        self
    }
}
