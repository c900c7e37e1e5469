//! Amazon EKS provider
//!
//! Drives the `aws eks` CLI and parses its JSON output. Credentials come from
//! the usual AWS CLI sources (environment, profile, instance metadata).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{
    require_cluster_name, require_node_group_name, validate_node_group_spec, validate_scale,
    with_deadline, ClusterInfo, ClusterProvider, ClusterStatus, ClusterType, HealthStatus,
    NodeGroup, ProviderError, NODE_GROUP_NAME_REQUIRED, REGION_REQUIRED,
};
use crate::config::{CreateOptions, NodeGroupSpec, ScaleOptions};

/// Control plane plus node groups routinely take 15-20 minutes
const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(40 * 60);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Failure of one `aws` invocation
#[derive(Debug)]
enum AwsError {
    /// `ResourceNotFoundException`, with the CLI's message
    NotFound(String),
    Failed(String),
    Cancelled,
}

impl AwsError {
    fn into_provider(self, not_found: impl FnOnce() -> ProviderError) -> ProviderError {
        match self {
            Self::NotFound(message) => {
                debug!(%message, "aws reported a missing resource");
                not_found()
            }
            Self::Failed(message) => ProviderError::CommandFailed(message),
            Self::Cancelled => ProviderError::Cancelled,
        }
    }
}

fn classify_aws_error(stderr: &str) -> AwsError {
    let message = stderr.trim().to_string();
    if message.contains("ResourceNotFoundException") {
        AwsError::NotFound(message)
    } else {
        AwsError::Failed(message)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeClusterResponse {
    cluster: EksCluster,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EksCluster {
    name: String,
    status: String,
    version: Option<String>,
    endpoint: Option<String>,
    resources_vpc_config: Option<VpcConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VpcConfig {
    #[serde(default)]
    subnet_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListClustersResponse {
    #[serde(default)]
    clusters: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ListNodegroupsResponse {
    #[serde(default)]
    nodegroups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeNodegroupResponse {
    nodegroup: EksNodegroup,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EksNodegroup {
    nodegroup_name: String,
    cluster_name: String,
    status: String,
    scaling_config: Option<ScalingConfig>,
    #[serde(default)]
    instance_types: Option<Vec<String>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScalingConfig {
    min_size: Option<u32>,
    max_size: Option<u32>,
    desired_size: Option<u32>,
}

fn cluster_status(status: &str) -> ClusterStatus {
    match status {
        "CREATING" | "PENDING" => ClusterStatus::Creating,
        "ACTIVE" => ClusterStatus::Active,
        "UPDATING" => ClusterStatus::Updating,
        "DELETING" => ClusterStatus::Deleting,
        "FAILED" => ClusterStatus::Failed,
        _ => ClusterStatus::Unknown,
    }
}

fn cluster_info(cluster: EksCluster) -> ClusterInfo {
    ClusterInfo {
        status: cluster_status(&cluster.status),
        kubernetes_version: cluster.version,
        endpoint: cluster.endpoint,
        ..ClusterInfo::new(cluster.name, ClusterType::Eks)
    }
}

fn node_group(nodegroup: EksNodegroup) -> NodeGroup {
    let scaling = nodegroup.scaling_config.unwrap_or_default();
    NodeGroup {
        name: nodegroup.nodegroup_name,
        cluster: nodegroup.cluster_name,
        desired_size: scaling.desired_size.unwrap_or_default(),
        min_size: scaling.min_size.unwrap_or_default(),
        max_size: scaling.max_size.unwrap_or_default(),
        status: nodegroup.status,
        instance_types: nodegroup.instance_types.unwrap_or_default(),
        labels: nodegroup.labels.unwrap_or_default(),
    }
}

fn scaling_config_arg(min: u32, max: u32, desired: u32) -> String {
    format!("minSize={min},maxSize={max},desiredSize={desired}")
}

/// `--scaling-config` values that keep `desired` inside the bounds
fn scaling_for(
    desired: u32,
    requested: (Option<u32>, Option<u32>),
    current: ScalingConfig,
) -> (u32, u32) {
    let min = requested
        .0
        .unwrap_or_else(|| current.min_size.unwrap_or(desired).min(desired));
    let max = requested
        .1
        .unwrap_or_else(|| current.max_size.unwrap_or(desired).max(desired));
    (min, max)
}

fn labels_arg(labels: &BTreeMap<String, String>) -> Option<String> {
    if labels.is_empty() {
        return None;
    }
    Some(
        labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Provider for Amazon EKS clusters
pub struct EksProvider {
    region: Option<String>,
    /// Clusters created here in a region other than `region`
    cluster_regions: RwLock<BTreeMap<String, String>>,
    aws_binary: PathBuf,
    profile: Option<String>,
    operation_timeout: Duration,
    cancel: CancellationToken,
}

impl EksProvider {
    /// Provider bound to `region`
    ///
    /// `CreateOptions::region` places one cluster elsewhere; later calls for
    /// that cluster go to the region it was created in.
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            region: (!region.trim().is_empty()).then_some(region),
            cluster_regions: RwLock::new(BTreeMap::new()),
            aws_binary: PathBuf::from("aws"),
            profile: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `AWS_REGION` or `AWS_DEFAULT_REGION` when set
    #[must_use]
    pub fn from_env() -> Self {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_default();
        Self::new(region)
    }

    #[must_use]
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    #[must_use]
    pub fn aws_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.aws_binary = path.into();
        self
    }

    /// Deadline for delete, scale and node-group changes
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

    fn region(&self) -> Result<&str, ProviderError> {
        self.region
            .as_deref()
            .ok_or_else(|| ProviderError::invalid(REGION_REQUIRED))
    }

    /// Region `cluster` was created in, else the provider's region
    fn region_for(&self, cluster: &str) -> Result<String, ProviderError> {
        if let Some(region) = self.cluster_regions.read().get(cluster) {
            return Ok(region.clone());
        }
        self.region().map(str::to_string)
    }

    /// Run `aws eks <args>` and return stdout
    async fn aws_raw(
        &self,
        region: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, AwsError> {
        let mut cmd = Command::new(&self.aws_binary);
        cmd.arg("eks")
            .args(args)
            .args(["--region", region, "--output", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(profile) = &self.profile {
            cmd.args(["--profile", profile]);
        }

        debug!(command = %args.first().map_or("", String::as_str), region, "Running aws eks");
        let output = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AwsError::Cancelled),
            output = cmd.output() => output.map_err(|e| {
                AwsError::Failed(format!("failed to run {}: {e}", self.aws_binary.display()))
            })?,
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_aws_error(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn aws<T: DeserializeOwned>(
        &self,
        region: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<T, AwsError> {
        let stdout = self.aws_raw(region, args, cancel).await?;
        serde_json::from_slice(&stdout)
            .map_err(|e| AwsError::Failed(format!("unexpected aws output: {e}")))
    }

    async fn describe_cluster(
        &self,
        region: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<EksCluster, ProviderError> {
        let response: DescribeClusterResponse = self
            .aws(region, &args(["describe-cluster", "--name", name]), cancel)
            .await
            .map_err(|e| e.into_provider(|| cluster_not_found(name)))?;
        Ok(response.cluster)
    }

    async fn nodegroup_names(
        &self,
        region: &str,
        cluster: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, ProviderError> {
        let response: ListNodegroupsResponse = self
            .aws(
                region,
                &args(["list-nodegroups", "--cluster-name", cluster]),
                cancel,
            )
            .await
            .map_err(|e| e.into_provider(|| cluster_not_found(cluster)))?;
        Ok(response.nodegroups)
    }

    async fn describe_nodegroup(
        &self,
        region: &str,
        cluster: &str,
        group: &str,
        cancel: &CancellationToken,
    ) -> Result<EksNodegroup, ProviderError> {
        let response: DescribeNodegroupResponse = self
            .aws(
                region,
                &args([
                    "describe-nodegroup",
                    "--cluster-name",
                    cluster,
                    "--nodegroup-name",
                    group,
                ]),
                cancel,
            )
            .await
            .map_err(|e| e.into_provider(|| node_group_not_found(cluster, group)))?;
        Ok(response.nodegroup)
    }

    /// Block on an `aws eks wait` waiter
    async fn wait(
        &self,
        region: &str,
        waiter: &[&str],
        cancel: &CancellationToken,
    ) -> Result<(), AwsError> {
        let mut wait_args = vec!["wait".to_string()];
        wait_args.extend(waiter.iter().map(|s| (*s).to_string()));
        self.aws_raw(region, &wait_args, cancel).await.map(|_| ())
    }

    async fn create_nodegroup_in(
        &self,
        region: &str,
        cluster: &str,
        spec: &NodeGroupSpec,
        cancel: &CancellationToken,
    ) -> Result<NodeGroup, ProviderError> {
        let role = spec.node_role_arn.as_deref().ok_or_else(|| {
            ProviderError::invalid(format!("node group '{}' needs a node role ARN", spec.name))
        })?;

        let subnets = if spec.subnet_ids.is_empty() {
            self.describe_cluster(region, cluster, cancel)
                .await?
                .resources_vpc_config
                .unwrap_or_default()
                .subnet_ids
        } else {
            spec.subnet_ids.clone()
        };
        if subnets.is_empty() {
            return Err(ProviderError::invalid(format!(
                "node group '{}' needs at least one subnet",
                spec.name
            )));
        }

        let mut create = args([
            "create-nodegroup",
            "--cluster-name",
            cluster,
            "--nodegroup-name",
            spec.name.as_str(),
            "--node-role",
            role,
            "--scaling-config",
            scaling_config_arg(spec.min_size, spec.max_size, spec.desired_size).as_str(),
            "--subnets",
        ]);
        create.extend(subnets);
        if !spec.instance_types.is_empty() {
            create.push("--instance-types".to_string());
            create.extend(spec.instance_types.iter().cloned());
        }
        if let Some(labels) = labels_arg(&spec.labels) {
            create.extend(["--labels".to_string(), labels]);
        }

        let response: DescribeNodegroupResponse = self
            .aws(region, &create, cancel)
            .await
            .map_err(|e| e.into_provider(|| cluster_not_found(cluster)))?;
        info!(cluster, node_group = %spec.name, "Node group creation started");

        self.wait(
            region,
            &[
                "nodegroup-active",
                "--cluster-name",
                cluster,
                "--nodegroup-name",
                spec.name.as_str(),
            ],
            cancel,
        )
        .await
        .map_err(|e| e.into_provider(|| node_group_not_found(cluster, &spec.name)))?;

        let active = self
            .describe_nodegroup(region, cluster, &spec.name, cancel)
            .await
            .unwrap_or(response.nodegroup);
        Ok(node_group(active))
    }

    async fn delete_nodegroup_in(
        &self,
        region: &str,
        cluster: &str,
        group: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        self.aws_raw(
            region,
            &args([
                "delete-nodegroup",
                "--cluster-name",
                cluster,
                "--nodegroup-name",
                group,
            ]),
            cancel,
        )
        .await
        .map_err(|e| e.into_provider(|| node_group_not_found(cluster, group)))?;

        self.wait(
            region,
            &[
                "nodegroup-deleted",
                "--cluster-name",
                cluster,
                "--nodegroup-name",
                group,
            ],
            cancel,
        )
        .await
        .map_err(|e| e.into_provider(|| node_group_not_found(cluster, group)))?;
        info!(cluster, node_group = group, "Node group deleted");
        Ok(())
    }
}

fn args<'a>(parts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    parts.into_iter().map(str::to_string).collect()
}

fn list_clusters_failed() -> ProviderError {
    ProviderError::CommandFailed("list-clusters".to_string())
}

fn cluster_not_found(name: &str) -> ProviderError {
    ProviderError::ClusterNotFound(name.to_string())
}

fn node_group_not_found(cluster: &str, group: &str) -> ProviderError {
    ProviderError::NodeGroupNotFound {
        cluster: cluster.to_string(),
        group: group.to_string(),
    }
}

#[async_trait]
impl ClusterProvider for EksProvider {
    fn cluster_type(&self) -> ClusterType {
        ClusterType::Eks
    }

    #[instrument(skip(self, options), fields(cluster_name = %options.name, provider = "eks"))]
    async fn create(&self, options: &CreateOptions) -> Result<ClusterInfo, ProviderError> {
        require_cluster_name(&options.name)?;
        let region = options
            .region
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .map_or_else(|| self.region(), Ok)?;
        let role = options
            .eks
            .role_arn
            .as_deref()
            .ok_or_else(|| ProviderError::invalid("cluster role ARN is required"))?;
        if options.eks.subnet_ids.is_empty() {
            return Err(ProviderError::invalid("at least one subnet is required"));
        }
        for spec in &options.node_groups {
            validate_node_group_spec(&options.name, spec)?;
        }

        let name = options.name.as_str();
        let mut vpc = format!("subnetIds={}", options.eks.subnet_ids.join(","));
        if !options.eks.security_group_ids.is_empty() {
            vpc.push_str(&format!(
                ",securityGroupIds={}",
                options.eks.security_group_ids.join(",")
            ));
        }
        let mut create = args([
            "create-cluster",
            "--name",
            name,
            "--role-arn",
            role,
            "--resources-vpc-config",
            vpc.as_str(),
        ]);
        if let Some(version) = &options.kubernetes_version {
            create.extend(["--kubernetes-version".to_string(), version.clone()]);
        }

        // Before the first aws call: a half-created cluster stays deletable
        if self.region.as_deref() != Some(region) {
            self.cluster_regions
                .write()
                .insert(name.to_string(), region.to_string());
        }

        let timeout = options.timeout_or(DEFAULT_CREATE_TIMEOUT);
        with_deadline(timeout, &self.cancel, "create cluster", |token| async move {
            info!(region, "Creating EKS cluster");
            self.aws_raw(region, &create, &token)
                .await
                .map_err(|e| e.into_provider(|| cluster_not_found(name)))?;
            self.wait(region, &["cluster-active", "--name", name], &token)
                .await
                .map_err(|e| e.into_provider(|| cluster_not_found(name)))?;
            info!("Control plane active");

            for spec in &options.node_groups {
                self.create_nodegroup_in(region, name, spec, &token).await?;
            }

            let cluster = self.describe_cluster(region, name, &token).await?;
            Ok(cluster_info(cluster))
        })
        .await
    }

    #[instrument(skip(self), fields(cluster_name = %name, provider = "eks"))]
    async fn delete(&self, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(name)?;
        let region = self.region_for(name)?;
        let region = region.as_str();

        let timeout = self.operation_timeout;
        with_deadline(timeout, &self.cancel, "delete cluster", |token| async move {
            let groups = self.nodegroup_names(region, name, &token).await?;
            try_join_all(
                groups
                    .iter()
                    .map(|group| self.delete_nodegroup_in(region, name, group, &token)),
            )
            .await?;

            self.aws_raw(region, &args(["delete-cluster", "--name", name]), &token)
                .await
                .map_err(|e| e.into_provider(|| cluster_not_found(name)))?;
            match self
                .wait(region, &["cluster-deleted", "--name", name], &token)
                .await
            {
                // The waiter can race the final describe and see the cluster already gone
                Ok(()) | Err(AwsError::NotFound(_)) => {}
                Err(e) => return Err(e.into_provider(|| cluster_not_found(name))),
            }
            self.cluster_regions.write().remove(name);
            info!("EKS cluster deleted");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self, options), fields(cluster_name = %name, provider = "eks"))]
    async fn scale(&self, name: &str, options: &ScaleOptions) -> Result<(), ProviderError> {
        validate_scale(name, options)?;
        let group = options
            .node_group
            .as_deref()
            .ok_or_else(|| ProviderError::invalid(NODE_GROUP_NAME_REQUIRED))?;
        let region = self.region_for(name)?;
        let region = region.as_str();

        let timeout = options.timeout_or(self.operation_timeout);
        with_deadline(timeout, &self.cancel, "scale node group", |token| async move {
            let current = self
                .describe_nodegroup(region, name, group, &token)
                .await?
                .scaling_config
                .unwrap_or_default();
            let requested = (options.min_size, options.max_size);
            let (min, max) = scaling_for(options.desired_size, requested, current);

            self.aws_raw(
                region,
                &args([
                    "update-nodegroup-config",
                    "--cluster-name",
                    name,
                    "--nodegroup-name",
                    group,
                    "--scaling-config",
                    scaling_config_arg(min, max, options.desired_size).as_str(),
                ]),
                &token,
            )
            .await
            .map_err(|e| e.into_provider(|| node_group_not_found(name, group)))?;

            self.wait(
                region,
                &[
                    "nodegroup-active",
                    "--cluster-name",
                    name,
                    "--nodegroup-name",
                    group,
                ],
                &token,
            )
            .await
            .map_err(|e| e.into_provider(|| node_group_not_found(name, group)))?;
            info!(node_group = group, desired = options.desired_size, "Node group scaled");
            Ok(())
        })
        .await
    }

    /// Kubeconfig written by `aws eks update-kubeconfig` into a scratch file
    #[instrument(skip(self), fields(cluster_name = %name, provider = "eks"))]
    async fn get_kubeconfig(&self, name: &str) -> Result<Vec<u8>, ProviderError> {
        require_cluster_name(name)?;
        let region = self.region_for(name)?;
        let region = region.as_str();

        let scratch = NamedTempFile::new().map_err(|e| ProviderError::Kubeconfig(e.to_string()))?;
        let path = scratch.path().display().to_string();
        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "get kubeconfig", |token| async move {
            self.aws_raw(
                region,
                &args([
                    "update-kubeconfig",
                    "--name",
                    name,
                    "--kubeconfig",
                    path.as_str(),
                    "--alias",
                    name,
                ]),
                &token,
            )
            .await
            .map_err(|e| e.into_provider(|| cluster_not_found(name)))?;
            Ok(())
        })
        .await?;

        tokio::fs::read(scratch.path())
            .await
            .map_err(|e| ProviderError::Kubeconfig(e.to_string()))
    }

    #[instrument(skip(self), fields(cluster_name = %name, provider = "eks"))]
    async fn health(&self, name: &str) -> HealthStatus {
        if let Err(e) = require_cluster_name(name) {
            return HealthStatus::unhealthy(e.to_string());
        }
        let region = match self.region_for(name) {
            Ok(region) => region,
            Err(e) => return HealthStatus::unhealthy(e.to_string()),
        };
        let region = region.as_str();

        let report = with_deadline(
            DEFAULT_QUERY_TIMEOUT,
            &self.cancel,
            "health check",
            |token| async move {
                let cluster = self.describe_cluster(region, name, &token).await?;
                let groups = self.nodegroup_names(region, name, &token).await?;
                let groups = try_join_all(
                    groups
                        .iter()
                        .map(|group| self.describe_nodegroup(region, name, group, &token)),
                )
                .await?;
                Ok((cluster, groups))
            },
        )
        .await;

        match report {
            Ok((cluster, groups)) => summarize_eks_health(&cluster, &groups),
            Err(e) => {
                warn!(error = %e, "Health check failed");
                HealthStatus::unhealthy(e.to_string())
            }
        }
    }

    /// Every cluster in the provider's region, plus clusters created elsewhere
    async fn list_clusters(&self) -> Result<Vec<ClusterInfo>, ProviderError> {
        let home = self.region.as_deref();
        let elsewhere: Vec<(String, String)> = self
            .cluster_regions
            .read()
            .iter()
            .map(|(name, region)| (name.clone(), region.clone()))
            .collect();
        if home.is_none() && elsewhere.is_empty() {
            return Err(ProviderError::invalid(REGION_REQUIRED));
        }

        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "list clusters", |token| async move {
            let mut clusters = Vec::new();
            if let Some(region) = home {
                let response: ListClustersResponse = self
                    .aws(region, &args(["list-clusters"]), &token)
                    .await
                    .map_err(|e| e.into_provider(list_clusters_failed))?;
                clusters = try_join_all(
                    response
                        .clusters
                        .iter()
                        .map(|name| self.describe_cluster(region, name, &token)),
                )
                .await?;
            }
            for (name, region) in &elsewhere {
                match self.describe_cluster(region, name, &token).await {
                    Ok(cluster) => clusters.push(cluster),
                    Err(ProviderError::ClusterNotFound(_)) => {
                        debug!(cluster = %name, region = %region, "Cluster is gone");
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(clusters.into_iter().map(cluster_info).collect())
        })
        .await
    }

    async fn get_cluster(&self, name: &str) -> Result<ClusterInfo, ProviderError> {
        require_cluster_name(name)?;
        let region = self.region_for(name)?;
        let region = region.as_str();
        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "get cluster", |token| async move {
            Ok(cluster_info(self.describe_cluster(region, name, &token).await?))
        })
        .await
    }

    #[instrument(skip(self, spec), fields(cluster_name = %cluster, node_group = %spec.name, provider = "eks"))]
    async fn create_node_group(
        &self,
        cluster: &str,
        spec: &NodeGroupSpec,
    ) -> Result<NodeGroup, ProviderError> {
        validate_node_group_spec(cluster, spec)?;
        let region = self.region_for(cluster)?;
        let region = region.as_str();
        let timeout = self.operation_timeout;
        with_deadline(timeout, &self.cancel, "create node group", |token| async move {
            self.create_nodegroup_in(region, cluster, spec, &token).await
        })
        .await
    }

    async fn list_node_groups(&self, cluster: &str) -> Result<Vec<NodeGroup>, ProviderError> {
        require_cluster_name(cluster)?;
        let region = self.region_for(cluster)?;
        let region = region.as_str();
        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "list node groups", |token| async move {
            let names = self.nodegroup_names(region, cluster, &token).await?;
            let groups = try_join_all(
                names
                    .iter()
                    .map(|group| self.describe_nodegroup(region, cluster, group, &token)),
            )
            .await?;
            Ok(groups.into_iter().map(node_group).collect())
        })
        .await
    }

    async fn get_node_group(&self, cluster: &str, name: &str) -> Result<NodeGroup, ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        let region = self.region_for(cluster)?;
        let region = region.as_str();
        with_deadline(DEFAULT_QUERY_TIMEOUT, &self.cancel, "get node group", |token| async move {
            Ok(node_group(self.describe_nodegroup(region, cluster, name, &token).await?))
        })
        .await
    }

    #[instrument(skip(self), fields(cluster_name = %cluster, provider = "eks"))]
    async fn delete_node_group(&self, cluster: &str, name: &str) -> Result<(), ProviderError> {
        require_cluster_name(cluster)?;
        require_node_group_name(name)?;
        let region = self.region_for(cluster)?;
        let region = region.as_str();
        let timeout = self.operation_timeout;
        with_deadline(timeout, &self.cancel, "delete node group", |token| async move {
            self.delete_nodegroup_in(region, cluster, name, &token).await
        })
        .await
    }
}

fn summarize_eks_health(cluster: &EksCluster, groups: &[EksNodegroup]) -> HealthStatus {
    let mut component_statuses = BTreeMap::new();
    component_statuses.insert("control-plane".to_string(), cluster.status.clone());

    let mut problems = Vec::new();
    if cluster.status != "ACTIVE" {
        problems.push(format!("cluster status is {}", cluster.status));
    }
    for group in groups {
        component_statuses.insert(
            format!("nodegroup/{}", group.nodegroup_name),
            group.status.clone(),
        );
        if group.status != "ACTIVE" {
            problems.push(format!("node group {} is {}", group.nodegroup_name, group.status));
        }
    }

    let healthy = problems.is_empty();
    let message = if healthy {
        format!(
            "cluster active with {} active node group{}",
            groups.len(),
            if groups.len() == 1 { "" } else { "s" }
        )
    } else {
        problems.join("; ")
    };

    HealthStatus {
        healthy,
        message,
        component_statuses,
        ..HealthStatus::healthy("")
    }
}
