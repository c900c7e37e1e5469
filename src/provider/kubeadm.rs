//! Self-managed kubeadm provider
//!
//! Bootstraps clusters on raw Linux hosts over SSH and keeps an in-memory
//! inventory of the hosts behind each cluster. Node groups are sets of
//! workers carrying the [`NODE_GROUP_LABEL`] label; workers without a group
//! form the default pool that [`ScaleOptions`] without a node group resizes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use k8s_openapi::api::core::v1::Pod;
use kube::config::Kubeconfig;
#[cfg(test)]
use mockall::automock;
use parking_lot::RwLock;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::nodes::{split_by_role, summarize_health, NODE_GROUP_LABEL};
use super::{
    require_cluster_name, require_node_group_name, validate_node_group_spec, validate_scale,
    with_deadline, ClusterInfo, ClusterProvider, ClusterStatus, ClusterType, HealthStatus,
    NodeGroup, NodeStatus, ProviderError, CONTROL_PLANE_HOST_REQUIRED,
};
use crate::bootstrap::readiness::{parse_node_list, ObjectList};
use crate::bootstrap::scripts::{
    control_plane_pods_command, delete_node_command, drain_node_command, label_node_command,
    node_name_command, node_status_command, reset_script, server_version_command,
};
use crate::bootstrap::{Bootstrapper, ClusterHosts, DEFAULT_READINESS_INTERVAL};
use crate::config::{
    with_api_server_port, BootstrapConfig, CniPlugin, CreateOptions, HostSpec, NodeGroupSpec,
    ScaleOptions,
};
use crate::retry::{retry, RetryPolicy};
use crate::ssh::{
    wait_for_reachable, HostKeyPolicy, KeySource, RemoteExecutor, SshClient, SshError,
};

const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(45 * 60);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REACHABLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Opens an executor for one host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HostConnector: Send + Sync {
    async fn connect(
        &self,
        host: &HostSpec,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RemoteExecutor>, SshError>;
}

/// [`HostConnector`] backed by [`SshClient`]
///
/// Waits for the SSH port to accept TCP connections before authenticating,
/// so freshly booted machines can be handed over straight away.
#[derive(Debug, Clone)]
pub struct SshConnector {
    default_key: KeySource,
    host_key_policy: HostKeyPolicy,
    connect_timeout: Duration,
    reachable_timeout: Duration,
}

impl SshConnector {
    /// `default_key` is used for hosts without their own key path
    #[must_use]
    pub fn new(default_key: KeySource) -> Self {
        Self {
            default_key,
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reachable_timeout: DEFAULT_REACHABLE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reachable_timeout(mut self, timeout: Duration) -> Self {
        self.reachable_timeout = timeout;
        self
    }
}

#[async_trait]
impl HostConnector for SshConnector {
    async fn connect(
        &self,
        host: &HostSpec,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RemoteExecutor>, SshError> {
        wait_for_reachable(&host.address, host.port, self.reachable_timeout, cancel).await?;
        let mut client = SshClient::new(host.ssh_config(&self.default_key, &self.host_key_policy));
        client.connect(self.connect_timeout, cancel).await?;
        Ok(Box::new(client))
    }
}

#[derive(Debug, Clone)]
struct Worker {
    host: HostSpec,
    /// Registered node name; empty until the host has joined
    node_name: String,
    node_group: Option<String>,
}

#[derive(Debug, Clone)]
struct GroupRecord {
    min_size: u32,
    max_size: u32,
    instance_types: Vec<String>,
    labels: BTreeMap<String, String>,
}

impl GroupRecord {
    fn from_spec(spec: &NodeGroupSpec) -> Self {
        Self {
            min_size: spec.min_size,
            max_size: spec.max_size,
            instance_types: spec.instance_types.clone(),
            labels: spec.labels.clone(),
        }
    }

    /// Labels applied to every node in the group
    fn node_labels(&self, group: &str) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(NODE_GROUP_LABEL.to_string(), group.to_string());
        labels
    }
}

/// Inventory entry for one cluster
#[derive(Debug, Clone)]
struct ManagedCluster {
    name: String,
    config: BootstrapConfig,
    /// First entry ran `kubeadm init`
    control_plane: Vec<HostSpec>,
    workers: Vec<Worker>,
    node_groups: BTreeMap<String, GroupRecord>,
    /// `host:port` of the API server
    api_endpoint: String,
    status: ClusterStatus,
}

impl ManagedCluster {
    fn primary(&self) -> Result<&HostSpec, ProviderError> {
        self.control_plane
            .first()
            .ok_or_else(|| ProviderError::invalid(CONTROL_PLANE_HOST_REQUIRED))
    }

    fn workers_in(&self, group: Option<&str>) -> Vec<&Worker> {
        self.workers
            .iter()
            .filter(|worker| worker.node_group.as_deref() == group)
            .collect()
    }

    fn knows_host(&self, address: &str) -> bool {
        self.control_plane.iter().any(|host| host.address == address)
            || self.workers.iter().any(|worker| worker.host.address == address)
    }

    fn node_group(&self, name: &str) -> Option<NodeGroup> {
        let record = self.node_groups.get(name)?;
        Some(NodeGroup {
            name: name.to_string(),
            cluster: self.name.clone(),
            desired_size: count(self.workers_in(Some(name)).len()),
            min_size: record.min_size,
            max_size: record.max_size,
            status: "ACTIVE".to_string(),
            instance_types: record.instance_types.clone(),
            labels: record.labels.clone(),
        })
    }

    fn labels_for(&self, worker: &Worker) -> BTreeMap<String, String> {
        worker
            .node_group
            .as_deref()
            .and_then(|group| Some(self.node_groups.get(group)?.node_labels(group)))
            .unwrap_or_default()
    }

    /// Inventory-only view, used when the control plane is not queried
    fn offline_info(&self) -> ClusterInfo {
        ClusterInfo {
            status: self.status,
            kubernetes_version: Some(self.config.kubernetes_version().to_string()),
            endpoint: Some(format!("https://{}", self.api_endpoint)),
            ..ClusterInfo::new(self.name.clone(), ClusterType::Kubeadm)
        }
    }
}

fn count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

/// Validate create options and lay out the inventory entry; nothing remote happens here
fn plan_cluster(options: &CreateOptions) -> Result<ManagedCluster, ProviderError> {
    require_cluster_name(&options.name)?;
    let kubeadm = &options.kubeadm;
    let primary = kubeadm
        .control_plane
        .first()
        .ok_or_else(|| ProviderError::invalid(CONTROL_PLANE_HOST_REQUIRED))?;

    let cni = match kubeadm.cni_plugin.as_deref() {
        None => CniPlugin::default(),
        Some(name) => CniPlugin::from_name(name).ok_or_else(|| {
            ProviderError::invalid(format!(
                "unsupported CNI plugin '{name}' (supported: calico, flannel)"
            ))
        })?,
    };

    let mut workers: Vec<Worker> = kubeadm
        .workers
        .iter()
        .map(|host| Worker {
            host: host.clone(),
            node_name: String::new(),
            node_group: None,
        })
        .collect();
    let mut node_groups = BTreeMap::new();
    for spec in &options.node_groups {
        validate_node_group_spec(&options.name, spec)?;
        let desired = spec.desired_size as usize;
        if spec.hosts.len() < desired {
            return Err(ProviderError::invalid(format!(
                "node group '{}' needs {desired} hosts, {} provided",
                spec.name,
                spec.hosts.len()
            )));
        }
        if node_groups
            .insert(spec.name.clone(), GroupRecord::from_spec(spec))
            .is_some()
        {
            return Err(ProviderError::invalid(format!(
                "node group '{}' is listed more than once",
                spec.name
            )));
        }
        workers.extend(spec.hosts.iter().take(desired).map(|host| Worker {
            host: host.clone(),
            node_name: String::new(),
            node_group: Some(spec.name.clone()),
        }));
    }

    let mut seen = HashSet::new();
    let all_hosts = kubeadm.control_plane.iter().chain(workers.iter().map(|w| &w.host));
    for host in all_hosts {
        if host.address.trim().is_empty() {
            return Err(ProviderError::invalid("host address is required"));
        }
        if !seen.insert(host.address.as_str()) {
            return Err(ProviderError::invalid(format!(
                "host {} is listed more than once",
                host.address
            )));
        }
    }

    let advertised = kubeadm
        .control_plane_address
        .as_deref()
        .unwrap_or(&primary.address);
    let api_endpoint = with_api_server_port(advertised);
    let config = BootstrapConfig::builder()
        .kubernetes_version(options.kubernetes_version.clone().unwrap_or_default())
        .pod_cidr(kubeadm.pod_cidr.clone().unwrap_or_default())
        .service_cidr(kubeadm.service_cidr.clone().unwrap_or_default())
        .cluster_name(options.name.clone())
        .control_plane_address(api_endpoint.clone())
        .cni_plugin(cni)
        .build();

    Ok(ManagedCluster {
        name: options.name.clone(),
        config,
        control_plane: kubeadm.control_plane.clone(),
        workers,
        node_groups,
        api_endpoint,
        status: ClusterStatus::Creating,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubectlVersion {
    server_version: Option<ServerVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerVersion {
    git_version: String,
}

/// Point the admin kubeconfig at `endpoint` and name its cluster and context `cluster_name`
fn rewrite_kubeconfig(
    raw: &[u8],
    endpoint: &str,
    cluster_name: &str,
) -> Result<Vec<u8>, ProviderError> {
    let text = std::str::from_utf8(raw).map_err(|e| ProviderError::Kubeconfig(e.to_string()))?;
    let mut kubeconfig =
        Kubeconfig::from_yaml(text).map_err(|e| ProviderError::Kubeconfig(e.to_string()))?;
    let server = format!("https://{endpoint}");

    let single_cluster = kubeconfig.clusters.len() == 1;
    for named in &mut kubeconfig.clusters {
        if let Some(cluster) = named.cluster.as_mut() {
            cluster.server = Some(server.clone());
        }
        if single_cluster {
            named.name = cluster_name.to_string();
        }
    }
    if kubeconfig.contexts.len() == 1 {
        for named in &mut kubeconfig.contexts {
            named.name = cluster_name.to_string();
            if let (Some(context), true) = (named.context.as_mut(), single_cluster) {
                context.cluster = cluster_name.to_string();
            }
        }
        kubeconfig.current_context = Some(cluster_name.to_string());
    }

    serde_yaml::to_string(&kubeconfig)
        .map(String::into_bytes)
        .map_err(|e| ProviderError::Kubeconfig(e.to_string()))
}

async fn node_name(
    exec: &dyn RemoteExecutor,
    cancel: &CancellationToken,
) -> Result<String, ProviderError> {
    let name = exec.run(node_name_command(), cancel).await?.trim().to_string();
    if name.is_empty() {
        return Err(ProviderError::CommandFailed(format!(
            "{} reported an empty hostname",
            exec.host()
        )));
    }
    Ok(name)
}

async fn label_node(
    control_plane: &dyn RemoteExecutor,
    node: &str,
    labels: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    for (key, value) in labels {
        control_plane
            .run(&label_node_command(node, key, value), cancel)
            .await?;
    }
    Ok(())
}

/// Provider for clusters bootstrapped with kubeadm over SSH
pub struct KubeadmProvider {
    connector: Arc<dyn HostConnector>,
    retry: RetryPolicy,
    clusters: RwLock<HashMap<String, ManagedCluster>>,
    readiness_timeout: Duration,
    readiness_interval: Duration,
    operation_timeout: Duration,
    cancel: CancellationToken,
}

impl KubeadmProvider {
    pub fn new(connector: Arc<dyn HostConnector>) -> Self {
        Self {
            connector,
            retry: RetryPolicy::default(),
            clusters: RwLock::new(HashMap::new()),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Provider connecting over SSH with `default_key`
    #[must_use]
    pub fn with_ssh_key(default_key: KeySource) -> Self {
        Self::new(Arc::new(SshConnector::new(default_key)))
    }

    /// Retry policy for SSH connection attempts
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    #[must_use]
    pub fn readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = interval;
        self
    }

    /// Deadline for delete and for resizes without their own timeout
    #[must_use]
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    async fn connect(
        &self,
        host: &HostSpec,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn RemoteExecutor>, ProviderError> {
        retry(&self.retry, "ssh connect", cancel, SshError::is_retryable, || {
            self.connector.connect(host, cancel)
        })
        .await
        .map_err(ProviderError::from)
    }

    fn bootstrapper(&self, config: &BootstrapConfig) -> Bootstrapper {
        Bootstrapper::new(config.clone()).readiness_interval(self.readiness_interval)
    }

    fn record(&self, name: &str) -> Result<ManagedCluster, ProviderError> {
        self.clusters
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::ClusterNotFound(name.to_string()))
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut ManagedCluster)) {
        if let Some(cluster) = self.clusters.write().get_mut(name) {
            f(cluster);
        }
    }

    /// Bootstrap every host in `record`, returning workers with their node names
    async fn provision(
        &self,
        record: &ManagedCluster,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Worker>, ClusterInfo), ProviderError> {
        let bootstrapper = self.bootstrapper(&record.config);

        let control_plane = try_join_all(
            record
                .control_plane
                .iter()
                .map(|host| self.connect(host, cancel)),
        )
        .await?;
        let worker_connections = try_join_all(
            record
                .workers
                .iter()
                .map(|worker| self.connect(&worker.host, cancel)),
        )
        .await?;

        let (primary, replicas) = control_plane
            .split_first()
            .ok_or_else(|| ProviderError::invalid(CONTROL_PLANE_HOST_REQUIRED))?;
        let mut hosts = ClusterHosts::new(primary.as_ref());
        for replica in replicas {
            hosts = hosts.replica(replica.as_ref());
        }
        for worker in &worker_connections {
            hosts = hosts.worker(worker.as_ref());
        }

        bootstrapper.bootstrap_cluster(hosts, cancel).await?;
        bootstrapper
            .wait_for_node_ready(primary.as_ref(), self.readiness_timeout, cancel)
            .await?;

        let mut workers = record.workers.clone();
        for (worker, connection) in workers.iter_mut().zip(&worker_connections) {
            worker.node_name = node_name(connection.as_ref(), cancel).await?;
            let labels = record.labels_for(worker);
            label_node(primary.as_ref(), &worker.node_name, &labels, cancel).await?;
        }

        let info = self.describe(record, primary.as_ref(), cancel).await?;
        Ok((workers, info))
    }

    /// Live view through kubectl on the primary control plane
    async fn describe(
        &self,
        record: &ManagedCluster,
        control_plane: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<ClusterInfo, ProviderError> {
        let nodes_json = control_plane.run(node_status_command(), cancel).await?;
        let nodes = parse_node_list(&nodes_json)
            .map_err(|e| ProviderError::CommandFailed(format!("unreadable node list: {e}")))?;
        let version = self.server_version(control_plane, cancel).await;

        let (control_plane_nodes, worker_nodes) = split_by_role(&nodes);
        let all_ready = control_plane_nodes
            .iter()
            .chain(&worker_nodes)
            .all(|node| node.status == NodeStatus::Ready);

        Ok(ClusterInfo {
            status: if all_ready && !nodes.is_empty() {
                ClusterStatus::Active
            } else {
                ClusterStatus::Degraded
            },
            kubernetes_version: version
                .or_else(|| Some(record.config.kubernetes_version().to_string())),
            control_plane_nodes,
            worker_nodes,
            ..record.offline_info()
        })
    }

    async fn server_version(
        &self,
        control_plane: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let output = control_plane.run(server_version_command(), cancel).await.ok()?;
        let version: KubectlVersion = serde_json::from_str(&output).ok()?;
        version.server_version.map(|v| v.git_version)
    }

    /// Prepare and join `hosts` as workers, then label them with `labels`
    async fn add_workers(
        &self,
        record: &ManagedCluster,
        hosts: &[HostSpec],
        group: Option<&str>,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Worker>, ProviderError> {
        let bootstrapper = self.bootstrapper(&record.config);
        let control_plane = self.connect(record.primary()?, cancel).await?;
        let connections =
            try_join_all(hosts.iter().map(|host| self.connect(host, cancel))).await?;

        let artifacts = bootstrapper.get_join_token(control_plane.as_ref(), cancel).await?;
        let artifacts = &artifacts;
        let bootstrapper = &bootstrapper;
        try_join_all(connections.iter().map(|connection| async move {
            bootstrapper.bootstrap_node(connection.as_ref(), cancel).await?;
            bootstrapper
                .join_worker(connection.as_ref(), artifacts, &record.api_endpoint, cancel)
                .await
        }))
        .await?;
        bootstrapper
            .wait_for_node_ready(control_plane.as_ref(), self.readiness_timeout, cancel)
            .await?;

        let mut workers = Vec::with_capacity(hosts.len());
        for (host, connection) in hosts.iter().zip(&connections) {
            let name = node_name(connection.as_ref(), cancel).await?;
            label_node(control_plane.as_ref(), &name, labels, cancel).await?;
            info!(
                cluster = %record.name,
                node = %name,
                group = group.unwrap_or("default"),
                "Worker added"
            );
            workers.push(Worker {
                host: host.clone(),
                node_name: name,
                node_group: group.map(str::to_string),
            });
        }
        Ok(workers)
    }

    /// Drain, deregister and reset `workers`
    async fn remove_workers(
        &self,
        record: &ManagedCluster,
        workers: &[Worker],
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let control_plane = self.connect(record.primary()?, cancel).await?;
        for worker in workers {
            if !worker.node_name.is_empty() {
                if let Err(e) = control_plane
                    .run(&drain_node_command(&worker.node_name), cancel)
                    .await
                {
                    if !matches!(e, SshError::Command { .. }) {
                        return Err(e.into());
                    }
                    warn!(
                        node = %worker.node_name,
                        error = %e,
                        "Drain failed, removing node anyway"
                    );
                }
                control_plane
                    .run(&delete_node_command(&worker.node_name), cancel)
                    .await?;
            }
            self.reset_host(&worker.host, cancel).await?;
            info!(cluster = %record.name, node = %worker.node_name, "Worker removed");
        }
        Ok(())
    }

    async fn reset_host(
        &self,
        host: &HostSpec,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        let exec = self.connect(host, cancel).await?;
        exec.run_script_sudo(&reset_script(), cancel).await?;
        debug!(host = %host.address, "Host reset");
        Ok(())
    }

    async fn probe_health(
        &self,
        record: &ManagedCluster,
        cancel: &CancellationToken,
    ) -> Result<HealthStatus, ProviderError> {
        let control_plane = self.connector.connect(record.primary()?, cancel).await?;
        let version = self.server_version(control_plane.as_ref(), cancel).await;

        let nodes_json = control_plane.run(node_status_command(), cancel).await?;
        let nodes = parse_node_list(&nodes_json)
            .map_err(|e| ProviderError::CommandFailed(format!("unreadable node list: {e}")))?;
        let pods_json = control_plane
            .run(control_plane_pods_command(), cancel)
            .await?;
        let pods: ObjectList<Pod> = serde_json::from_str(&pods_json)
            .map_err(|e| ProviderError::CommandFailed(format!("unreadable pod list: {e}")))?;

        Ok(summarize_health(version.as_deref(), &nodes, &pods.items))
    }
}

#[async_trait]
impl ClusterProvider for KubeadmProvider {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Kubeadm
    }

    #[instrument(skip(self, options), fields(cluster_name = %options.name, provider = "kubeadm", operation_id = %Uuid::new_v4().simple()))]
    async fn create(&self, options: &CreateOptions) -> Result<ClusterInfo, ProviderError> {
        let record = plan_cluster(options)?;
        {
            let mut clusters = self.clusters.write();
            if clusters.contains_key(&record.name) {
                return Err(ProviderError::invalid(format!(
                    "cluster '{}' already exists",
                    record.name
                )));
            }
            clusters.insert(record.name.clone(), record.clone());
        }
        info!(
            control_plane = record.control_plane.len(),
            workers = record.workers.len(),
            "Creating kubeadm cluster"
        );

        let timeout = options.timeout_or(DEFAULT_CREATE_TIMEOUT);
        let result = with_deadline(timeout, &self.cancel, "create cluster", |token| async move {
            self.provision(&record, &token).await
        })
        .await;

        match result {
            Ok((workers, mut info)) => {
                self.update(&options.name, |cluster| {
                    cluster.workers = workers;
                    cluster.status = ClusterStatus::Active;
                });
                info.status = ClusterStatus::Active;
                info!(endpoint = ?info.endpoint, "Cluster created");
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, "Cluster creation failed, hosts kept for delete");
                self.update(&options.name, |cluster| cluster.status = ClusterStatus::Failed);
                Err(e)
            }
        }
    }

    /// Reset every host and forget the cluster
    ///
    /// Hosts are reset concurrently. The cluster leaves the inventory even
    /// when some hosts could not be reset; those are named in the error.
    #[instrument(skip(self), fields(cluster_name = %name, provider = "kubeadm"))]
    async fn delete(&self, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(name)?;
        let record = self.record(name)?;
        self.update(name, |cluster| cluster.status = ClusterStatus::Deleting);

        let timeout = self.operation_timeout;
        let failures = with_deadline(timeout, &self.cancel, "delete cluster", |token| {
            let record = &record;
            async move {
                let hosts: Vec<&HostSpec> = record
                    .workers
                    .iter()
                    .map(|worker| &worker.host)
                    .chain(record.control_plane.iter().rev())
                    .collect();
                let results =
                    join_all(hosts.iter().map(|host| self.reset_host(host, &token))).await;
                Ok(hosts
                    .iter()
                    .zip(results)
                    .filter_map(|(host, result)| {
                        result.err().map(|e| format!("{}: {e}", host.address))
                    })
                    .collect::<Vec<_>>())
            }
        })
        .await;

        let failures = match failures {
            Ok(failures) => failures,
            Err(e) => {
                self.update(name, |cluster| cluster.status = ClusterStatus::Failed);
                return Err(e);
            }
        };

        self.clusters.write().remove(name);
        if failures.is_empty() {
            info!("Cluster deleted");
            Ok(())
        } else {
            Err(ProviderError::CommandFailed(format!(
                "cluster '{name}' removed but {} host(s) were not reset: {}",
                failures.len(),
                failures.join("; ")
            )))
        }
    }

    #[instrument(skip(self, options), fields(cluster_name = %name, provider = "kubeadm"))]
    async fn scale(&self, name: &str, options: &ScaleOptions) -> Result<(), ProviderError> {
        validate_scale(name, options)?;
        let record = self.record(name)?;
        let group = options.node_group.as_deref();
        let labels = match group {
            Some(group) => record
                .node_groups
                .get(group)
                .map(|g| g.node_labels(group))
                .ok_or_else(|| ProviderError::NodeGroupNotFound {
                    cluster: name.to_string(),
                    group: group.to_string(),
                })?,
            None => BTreeMap::new(),
        };

        let current: Vec<Worker> = record.workers_in(group).into_iter().cloned().collect();
        let desired = options.desired_size as usize;
        let candidates: Vec<HostSpec> = options
            .hosts
            .iter()
            .filter(|host| !record.knows_host(&host.address))
            .cloned()
            .collect();
        if desired > current.len() && candidates.len() < desired - current.len() {
            return Err(ProviderError::invalid(format!(
                "scaling to {desired} workers needs {} new hosts, {} provided",
                desired - current.len(),
                candidates.len()
            )));
        }

        let timeout = options.timeout_or(self.operation_timeout);
        with_deadline(timeout, &self.cancel, "scale", |token| {
            let (record, current, candidates, labels) = (&record, &current, &candidates, &labels);
            async move {
                if desired > current.len() {
                    let hosts = &candidates[..desired - current.len()];
                    let added = self.add_workers(record, hosts, group, labels, &token).await?;
                    self.update(name, |cluster| cluster.workers.extend(added));
                } else if desired < current.len() {
                    let surplus = &current[desired..];
                    self.remove_workers(record, surplus, &token).await?;
                    let removed: HashSet<&str> =
                        surplus.iter().map(|w| w.host.address.as_str()).collect();
                    self.update(name, |cluster| {
                        cluster.workers.retain(|w| !removed.contains(w.host.address.as_str()));
                    });
                } else {
                    debug!(desired, "Already at desired size");
                }
                Ok(())
            }
        })
        .await?;

        if let (Some(group), Some(min), Some(max)) = (group, options.min_size, options.max_size) {
            self.update(name, |cluster| {
                if let Some(record) = cluster.node_groups.get_mut(group) {
                    record.min_size = min;
                    record.max_size = max;
                }
            });
        }
        info!(desired, "Scaled");
        Ok(())
    }

    /// Admin kubeconfig pointed at the API endpoint and named after the cluster
    #[instrument(skip(self), fields(cluster_name = %name, provider = "kubeadm"))]
    async fn get_kubeconfig(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        require_cluster_name(name)?;
        let record = self.record(name)?;

        let raw = with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "get kubeconfig", |token| {
            let record = &record;
            async move {
                let control_plane = self.connect(record.primary()?, &token).await?;
                Ok(self
                    .bootstrapper(&record.config)
                    .fetch_kubeconfig(control_plane.as_ref(), &token)
                    .await?)
            }
        })
        .await?;
        rewrite_kubeconfig(&raw, &record.api_endpoint, name)
    }

    #[instrument(skip(self), fields(cluster_name = %name, provider = "kubeadm"))]
    async fn health(&self, name: &str) -> HealthStatus {
        if let Err(e) = require_cluster_name(name) {
            return HealthStatus::unhealthy(e.to_string());
        }
        let record = match self.record(name) {
            Ok(record) => record,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };
        if record.status != ClusterStatus::Active {
            return HealthStatus::unhealthy(format!("cluster is {}", record.status));
        }

        let probe = with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "health check", |token| {
            let record = &record;
            async move { self.probe_health(record, &token).await }
        })
        .await;
        match probe {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "Health check failed");
                HealthStatus::unhealthy(e.to_string())
            }
        }
    }

    /// Every inventoried cluster; unreachable ones are reported from the inventory
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProviderError> {
        let mut records: Vec<ManagedCluster> = self.clusters.read().values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));

        let infos = join_all(records.iter().map(|record| async move {
            match self.get_cluster(&record.name).await {
                Ok(info) => info,
                Err(e) => {
                    debug!(cluster = %record.name, error = %e, "Falling back to inventory view");
                    ClusterInfo {
                        status: if record.status == ClusterStatus::Active {
                            ClusterStatus::Unknown
                        } else {
                            record.status
                        },
                        ..record.offline_info()
                    }
                }
            }
        }))
        .await;
        Ok(infos)
    }

    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo, ProviderError> {
        require_cluster_name(name)?;
        let record = self.record(name)?;
        if record.status != ClusterStatus::Active {
            return Ok(record.offline_info());
        }

        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "get cluster", |token| {
            let record = &record;
            async move {
                let control_plane = self.connect(record.primary()?, &token).await?;
                self.describe(record, control_plane.as_ref(), &token).await
            }
        })
        .await
    }

    #[instrument(skip(self, spec), fields(cluster_name = %cluster, node_group = %spec.name, provider = "kubeadm"))]
    async fn create_node_group(
        &self,
        cluster: &str,
        spec: &NodeGroupSpec,
    ) -> Result<NodeGroup, ProviderError> {
        validate_node_group_spec(cluster, spec)?;
        let record = self.record(cluster)?;
        if record.node_groups.contains_key(&spec.name) {
            return Err(ProviderError::invalid(format!(
                "node group '{}' already exists in cluster '{cluster}'",
                spec.name
            )));
        }
        let hosts: Vec<HostSpec> = spec
            .hosts
            .iter()
            .filter(|host| !record.knows_host(&host.address))
            .take(spec.desired_size as usize)
            .cloned()
            .collect();
        if hosts.len() < spec.desired_size as usize {
            return Err(ProviderError::invalid(format!(
                "node group '{}' needs {} hosts, {} provided",
                spec.name,
                spec.desired_size,
                hosts.len()
            )));
        }

        let group = GroupRecord::from_spec(spec);
        let labels = group.node_labels(&spec.name);
        let timeout = self.operation_timeout;
        let added = with_deadline(timeout, &self.cancel, "create node group", |token| {
            let (record, hosts, labels) = (&record, &hosts, &labels);
            async move {
                self.add_workers(record, hosts, Some(&spec.name), labels, &token)
                    .await
            }
        })
        .await?;

        let mut created = None;
        self.update(cluster, |record| {
            record.node_groups.insert(spec.name.clone(), group);
            record.workers.extend(added);
            created = record.node_group(&spec.name);
        });
        created.ok_or_else(|| ProviderError::ClusterNotFound(cluster.to_string()))
    }

    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<NodeGroup>, ProviderError> {
        require_cluster_name(cluster)?;
        let record = self.record(cluster)?;
        Ok(record
            .node_groups
            .keys()
            .filter_map(|name| record.node_group(name))
            .collect())
    }

    async fn get_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup, ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        self.record(cluster)?
            .node_group(name)
            .ok_or_else(|| ProviderError::NodeGroupNotFound {
                cluster: cluster.to_string(),
                group: name.to_string(),
            })
    }

    #[instrument(skip(self), fields(cluster_name = %cluster, provider = "kubeadm"))]
    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        let record = self.record(cluster)?;
        if !record.node_groups.contains_key(name) {
            return Err(ProviderError::NodeGroupNotFound {
                cluster: cluster.to_string(),
                group: name.to_string(),
            });
        }

        let members: Vec<Worker> = record.workers_in(Some(name)).into_iter().cloned().collect();
        with_deadline(self.operation_timeout, &self.cancel, "delete node group", |token| {
            let (record, members) = (&record, &members);
            async move { self.remove_workers(record, members, &token).await }
        })
        .await?;

        self.update(cluster, |record| {
            record.node_groups.remove(name);
            record.workers.retain(|w| w.node_group.as_deref() != Some(name));
        });
        info!(node_group = name, "Node group deleted");
        Ok(())
    }
}
