//! kubeforge - Kubernetes cluster lifecycle orchestration
//!
//! kubeforge creates, scales, inspects and tears down Kubernetes clusters
//! through one [`ClusterProvider`] interface with three backends:
//!
//! - [`ExistingProvider`]: clusters already reachable through a kubeconfig
//! - [`EksProvider`]: Amazon EKS, driven through the `aws` CLI
//! - [`KubeadmProvider`]: raw Linux hosts bootstrapped with kubeadm over SSH
//!
//! The kubeadm backend is built from two reusable layers: an SSH client
//! ([`ssh`]) and a staged bootstrap orchestrator ([`bootstrap`]).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kubeforge::config::{CreateOptions, HostSpec};
//! use kubeforge::ssh::KeySource;
//! use kubeforge::{ClusterManager, ClusterProvider, ClusterType, KubeadmProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     kubeforge::telemetry::init_logging();
//!
//!     let manager = ClusterManager::new();
//!     manager.register_provider(Arc::new(KubeadmProvider::with_ssh_key(
//!         KeySource::Path("/home/ops/.ssh/id_ed25519".into()),
//!     )));
//!
//!     let provider = manager.get_provider(ClusterType::Kubeadm)?;
//!     let info = provider
//!         .create(
//!             &CreateOptions::new("lab")
//!                 .control_plane_host(HostSpec::new("10.0.0.5").user("ubuntu"))
//!                 .worker_host(HostSpec::new("10.0.0.6").user("ubuntu")),
//!         )
//!         .await?;
//!     println!("{} is {}", info.name, info.status);
//!
//!     std::fs::write("lab.kubeconfig", provider.get_kubeconfig("lab").await?)?;
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod eventually;
pub mod provider;
pub mod retry;
pub mod ssh;
pub mod telemetry;
pub mod wait;

// Re-export commonly used types
pub use bootstrap::{BootstrapError, Bootstrapper, ClusterHosts, JoinArtifacts, Stage};
pub use config::{
    BootstrapConfig, CniPlugin, CreateOptions, HostSpec, NodeGroupSpec, ScaleOptions,
};
pub use provider::{
    ClusterInfo, ClusterManager, ClusterProvider, ClusterStatus, ClusterType, EksProvider,
    ExistingProvider, HealthStatus, KubeadmProvider, NodeGroup, ProviderError,
};
pub use ssh::{RemoteExecutor, SshClient, SshConfig, SshError};
