//! Existing cluster provider
//!
//! Wraps clusters that are already reachable through a kubeconfig. Each
//! kubeconfig context is one cluster; lifecycle operations are unsupported.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use serde_yaml::{Mapping, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::nodes::{split_by_role, summarize_health};
use super::{
    require_cluster_name, require_node_group_name, validate_node_group_spec, validate_scale,
    with_deadline, ClusterInfo, ClusterProvider, ClusterStatus, ClusterType, HealthStatus,
    NodeGroup, ProviderError,
};
use crate::config::{CreateOptions, NodeGroupSpec, ScaleOptions};

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Provider for pre-existing clusters, one per kubeconfig context
pub struct ExistingProvider {
    /// `None` reads `$KUBECONFIG` or `~/.kube/config`
    kubeconfig: Option<PathBuf>,
    probe_timeout: Duration,
    cancel: CancellationToken,
}

impl ExistingProvider {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kubeconfig: None,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_kubeconfig(path: impl Into<PathBuf>) -> Self {
        Self {
            kubeconfig: Some(path.into()),
            ..Self::new()
        }
    }

    /// Upper bound for API probes made by `health` and `get_cluster`
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Cancel in-flight probes when `token` fires
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn load_kubeconfig(&self) -> Result<Kubeconfig, ProviderError> {
        let loaded = match &self.kubeconfig {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        };
        loaded.map_err(|e| ProviderError::Kubeconfig(e.to_string()))
    }

    fn require_context(kubeconfig: &Kubeconfig, name: &str) -> Result<(), ProviderError> {
        if kubeconfig.contexts.iter().any(|context| context.name == name) {
            Ok(())
        } else {
            Err(ProviderError::ClusterNotFound(name.to_string()))
        }
    }

    async fn client_for(
        &self,
        kubeconfig: Kubeconfig,
        context: &str,
    ) -> Result<Client, ProviderError> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..KubeConfigOptions::default()
        };
        let config = Config::from_custom_kubeconfig(kubeconfig, &options)
            .await
            .map_err(|e| ProviderError::Kubeconfig(e.to_string()))?;
        Ok(Client::try_from(config)?)
    }

    /// Offline view of one context: name and API endpoint
    fn context_info(kubeconfig: &Kubeconfig, context: &str) -> ClusterInfo {
        let endpoint = kubeconfig
            .contexts
            .iter()
            .find(|named| named.name == context)
            .and_then(|named| named.context.as_ref())
            .and_then(|ctx| kubeconfig.clusters.iter().find(|cluster| cluster.name == ctx.cluster))
            .and_then(|cluster| cluster.cluster.as_ref())
            .and_then(|cluster| cluster.server.clone());

        ClusterInfo {
            endpoint,
            ..ClusterInfo::new(context, ClusterType::Existing)
        }
    }

    async fn probe(&self, context: &str) -> Result<HealthStatus, ProviderError> {
        let kubeconfig = self.load_kubeconfig()?;
        Self::require_context(&kubeconfig, context)?;
        let client = self.client_for(kubeconfig, context).await?;

        let version = client.apiserver_version().await?;
        let nodes = Api::<Node>::all(client.clone())
            .list(&ListParams::default())
            .await?
            .items;
        let pods = Api::<Pod>::namespaced(client, "kube-system")
            .list(&ListParams::default().labels("tier=control-plane"))
            .await?
            .items;

        debug!(context, version = %version.git_version, nodes = nodes.len(), "Probed cluster");
        Ok(summarize_health(Some(&version.git_version), &nodes, &pods))
    }

    async fn live_info(
        &self,
        context: &str,
        cancel: CancellationToken,
    ) -> Result<ClusterInfo, ProviderError> {
        let kubeconfig = self.load_kubeconfig()?;
        Self::require_context(&kubeconfig, context)?;
        let mut info = Self::context_info(&kubeconfig, context);

        let client = self.client_for(kubeconfig, context).await?;
        let live = async {
            let version = client.apiserver_version().await?;
            let nodes = Api::<Node>::all(client.clone())
                .list(&ListParams::default())
                .await?
                .items;
            Ok::<_, kube::Error>((version, nodes))
        };

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
            result = live => result,
        };
        match result {
            Ok((version, nodes)) => {
                let (control_plane, workers) = split_by_role(&nodes);
                info.status = ClusterStatus::Active;
                info.kubernetes_version = Some(version.git_version);
                info.control_plane_nodes = control_plane;
                info.worker_nodes = workers;
            }
            Err(e) => {
                debug!(context, error = %e, "Cluster API unreachable");
            }
        }
        Ok(info)
    }
}

impl Default for ExistingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ClusterProvider for ExistingProvider {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Existing
    }

    async fn create(&self, options: &CreateOptions) -> Result<ClusterInfo, ProviderError> {
        require_cluster_name(&options.name)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "create"))
    }

    async fn delete(&self, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(name)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "delete"))
    }

    async fn scale(&self, name: &str, options: &ScaleOptions) -> Result<(), ProviderError> {
        validate_scale(name, options)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "scale"))
    }

    /// The context's slice of the kubeconfig: one context, its cluster and its user
    #[instrument(skip(self), fields(cluster_name = %name, provider = "existing"))]
    async fn get_kubeconfig(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        require_cluster_name(name)?;
        let kubeconfig = self.load_kubeconfig()?;
        Self::require_context(&kubeconfig, name)?;
        minify(&kubeconfig, name)
    }

    #[instrument(skip(self), fields(cluster_name = %name, provider = "existing"))]
    async fn health(&self, name: &str) -> HealthStatus {
        if let Err(e) = require_cluster_name(name) {
            return HealthStatus::unhealthy(e.to_string());
        }

        let outcome = with_deadline(
            self.probe_timeout,
            &self.cancel,
            "health check",
            |token| async move {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(ProviderError::Cancelled),
                    result = self.probe(name) => result,
                }
            },
        )
        .await;

        match outcome {
            Ok(status) => {
                info!(healthy = status.healthy, "Health check complete");
                status
            }
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }

    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProviderError> {
        let kubeconfig = self.load_kubeconfig()?;
        Ok(kubeconfig
            .contexts
            .iter()
            .map(|context| Self::context_info(&kubeconfig, &context.name))
            .collect())
    }

    #[instrument(skip(self), fields(cluster_name = %name, provider = "existing"))]
    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo, ProviderError> {
        require_cluster_name(name)?;
        with_deadline(self.probe_timeout, &self.cancel, "get cluster", |token| {
            self.live_info(name, token)
        })
        .await
    }

    async fn create_node_group(
        &self,
        cluster: &str,
        spec: &NodeGroupSpec,
    ) -> Result<NodeGroup, ProviderError> {
        validate_node_group_spec(cluster, spec)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "create node group"))
    }

    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<NodeGroup>, ProviderError> {
        require_cluster_name(cluster)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "list node groups"))
    }

    async fn get_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup, ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "get node group"))
    }

    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        Err(ProviderError::unsupported(ClusterType::Existing, "delete node group"))
    }
}

/// Reduce a kubeconfig to `context` plus the cluster and user it references
fn minify(kubeconfig: &Kubeconfig, context: &str) -> Result<Vec<u8>, ProviderError> {
    let doc =
        serde_yaml::to_value(kubeconfig).map_err(|e| ProviderError::Kubeconfig(e.to_string()))?;

    let named = |section: &str, name: &str| -> Option<Value> {
        doc.get(section)?
            .as_sequence()?
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
            .cloned()
    };
    let reference = |entry: &Value, key: &str| -> Option<String> {
        entry.get("context")?.get(key)?.as_str().map(str::to_string)
    };

    let context_entry = named("contexts", context)
        .ok_or_else(|| ProviderError::ClusterNotFound(context.to_string()))?;
    let clusters: Vec<Value> = reference(&context_entry, "cluster")
        .and_then(|name| named("clusters", &name))
        .into_iter()
        .collect();
    let users: Vec<Value> = reference(&context_entry, "user")
        .and_then(|name| named("users", &name))
        .into_iter()
        .collect();

    let mut minified = Mapping::new();
    minified.insert("apiVersion".into(), "v1".into());
    minified.insert("kind".into(), "Config".into());
    minified.insert("clusters".into(), Value::Sequence(clusters));
    minified.insert("contexts".into(), Value::Sequence(vec![context_entry]));
    minified.insert("users".into(), Value::Sequence(users));
    minified.insert("current-context".into(), context.into());

    serde_yaml::to_string(&Value::Mapping(minified))
        .map(String::into_bytes)
        .map_err(|e| ProviderError::Kubeconfig(e.to_string()))
}
