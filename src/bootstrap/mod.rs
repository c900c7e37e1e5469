//! Bootstrap orchestration
//!
//! [`Bootstrapper`] takes raw Linux hosts to a running kubeadm cluster by
//! running the [`scripts`] stages over a [`RemoteExecutor`]:
//!
//! 1. kernel modules and sysctls (every host)
//! 2. container runtime (every host)
//! 3. kubelet, kubeadm and kubectl (every host)
//! 4. `kubeadm init` (first control-plane host)
//! 5. kubectl setup (control plane)
//! 6. CNI install (control plane)
//! 7. `kubeadm join` (every other host)
//!
//! Stages run strictly in order on a host. Different hosts interleave, but
//! no join starts before the control plane has produced [`JoinArtifacts`].
//!
//! # Example
//!
//! ```ignore
//! use kubeforge::bootstrap::{Bootstrapper, ClusterHosts};
//! use kubeforge::config::BootstrapConfig;
//!
//! let bootstrapper = Bootstrapper::new(BootstrapConfig::default());
//! let outcome = bootstrapper
//!     .bootstrap_cluster(
//!         ClusterHosts::new(&control_plane).worker(&worker_1).worker(&worker_2),
//!         &cancel,
//!     )
//!     .await?;
//! std::fs::write("kubeconfig", &outcome.kubeconfig)?;
//! ```

pub mod join;
pub mod readiness;
pub mod scripts;

use std::fmt;
use std::time::Duration;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::{with_api_server_port, BootstrapConfig, CniPlugin};
use crate::ssh::{RemoteExecutor, SshError};
use crate::wait::WaitError;

pub use join::{parse_init_output, parse_join_command, JoinArtifacts};
pub use readiness::NodeReadiness;

/// Default pause between readiness polls
pub const DEFAULT_READINESS_INTERVAL: Duration = Duration::from_secs(10);

/// Remote path (relative to the SSH user's home) of the admin kubeconfig
const USER_KUBECONFIG: &str = ".kube/config";

/// One step of the bootstrap sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    KernelModules,
    ContainerRuntime,
    KubernetesTools,
    ControlPlaneInit,
    KubectlSetup,
    CniInstall,
    WorkerJoin,
    /// Stage 7 for additional control-plane replicas
    ControlPlaneJoin,
}

impl Stage {
    /// Stages every host runs before it can init or join
    pub const NODE_PREPARATION: [Stage; 3] = [
        Stage::KernelModules,
        Stage::ContainerRuntime,
        Stage::KubernetesTools,
    ];

    /// 1-based position in the documented sequence
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::KernelModules => 1,
            Self::ContainerRuntime => 2,
            Self::KubernetesTools => 3,
            Self::ControlPlaneInit => 4,
            Self::KubectlSetup => 5,
            Self::CniInstall => 6,
            Self::WorkerJoin | Self::ControlPlaneJoin => 7,
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::KernelModules => "kernel modules",
            Self::ContainerRuntime => "container runtime",
            Self::KubernetesTools => "kubernetes tools",
            Self::ControlPlaneInit => "control-plane init",
            Self::KubectlSetup => "kubectl setup",
            Self::CniInstall => "CNI install",
            Self::WorkerJoin => "worker join",
            Self::ControlPlaneJoin => "control-plane join",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage {} ({})", self.number(), self.name())
    }
}

/// Error type for bootstrap operations
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("{stage} failed on {host}: {source}")]
    Stage {
        stage: Stage,
        host: String,
        #[source]
        source: SshError,
    },

    #[error("unsupported CNI plugin '{0}' (supported: calico, flannel)")]
    UnsupportedCni(String),

    #[error("timed out: {0}")]
    Timeout(WaitError),

    #[error("remote operation on {host} failed: {source}")]
    Remote {
        host: String,
        #[source]
        source: SshError,
    },

    #[error("join artifacts are incomplete: {0}")]
    IncompleteJoinArtifacts(String),
}

impl BootstrapError {
    /// Stage that failed, if the failure happened inside one
    #[must_use]
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Stage {
                source: SshError::Cancelled,
                ..
            } | Self::Remote {
                source: SshError::Cancelled,
                ..
            }
        )
    }
}

/// Hosts taking part in a full bootstrap
///
/// Each executor must be a distinct connection; hosts are driven concurrently.
pub struct ClusterHosts<'a> {
    /// Runs `kubeadm init`
    pub control_plane: &'a dyn RemoteExecutor,
    /// Join as additional control-plane members, one at a time
    pub control_plane_replicas: Vec<&'a dyn RemoteExecutor>,
    pub workers: Vec<&'a dyn RemoteExecutor>,
}

impl<'a> ClusterHosts<'a> {
    pub fn new(control_plane: &'a dyn RemoteExecutor) -> Self {
        Self {
            control_plane,
            control_plane_replicas: Vec::new(),
            workers: Vec::new(),
        }
    }

    #[must_use]
    pub fn replica(mut self, exec: &'a dyn RemoteExecutor) -> Self {
        self.control_plane_replicas.push(exec);
        self
    }

    #[must_use]
    pub fn worker(mut self, exec: &'a dyn RemoteExecutor) -> Self {
        self.workers.push(exec);
        self
    }

    fn all(&self) -> impl Iterator<Item = &'a dyn RemoteExecutor> + '_ {
        std::iter::once(self.control_plane)
            .chain(self.control_plane_replicas.iter().copied())
            .chain(self.workers.iter().copied())
    }
}

/// Result of [`Bootstrapper::bootstrap_cluster`]
#[derive(Debug, Clone)]
pub struct BootstrapOutcome {
    /// Artifacts used for the joins; reusable until the token expires
    pub artifacts: JoinArtifacts,
    /// Admin kubeconfig as written on the control plane
    pub kubeconfig: Vec<u8>,
    /// Address workers joined against
    pub control_plane_address: String,
}

/// Drives bootstrap stages against remote hosts
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    config: BootstrapConfig,
    readiness_interval: Duration,
}

impl Bootstrapper {
    #[must_use]
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            readiness_interval: DEFAULT_READINESS_INTERVAL,
        }
    }

    /// Override the readiness poll interval
    #[must_use]
    pub fn readiness_interval(mut self, interval: Duration) -> Self {
        self.readiness_interval = interval;
        self
    }

    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Run a single stage with this bootstrapper's config, returning its stdout
    pub async fn run_stage(
        &self,
        exec: &dyn RemoteExecutor,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<String, BootstrapError> {
        match stage {
            Stage::KernelModules => {
                self.execute(exec, stage, &scripts::kernel_modules_script(), true, cancel)
                    .await
            }
            Stage::ContainerRuntime => {
                self.execute(exec, stage, &scripts::container_runtime_script(), true, cancel)
                    .await
            }
            Stage::KubernetesTools => {
                let script = scripts::kubernetes_tools_script(&self.config);
                self.execute(exec, stage, &script, true, cancel).await
            }
            Stage::ControlPlaneInit => {
                let script = scripts::control_plane_init_script(&self.config);
                self.execute(exec, stage, &script, true, cancel).await
            }
            Stage::KubectlSetup => {
                self.execute(exec, stage, &scripts::kubectl_setup_script(), false, cancel)
                    .await
            }
            Stage::CniInstall => {
                let script = scripts::cni_script(self.config.cni_plugin());
                self.execute(exec, stage, &script, false, cancel).await
            }
            Stage::WorkerJoin => {
                let script = scripts::worker_join_script(&self.config);
                self.execute(exec, stage, &script, true, cancel).await
            }
            Stage::ControlPlaneJoin => Err(BootstrapError::IncompleteJoinArtifacts(
                "control-plane join needs a certificate key, use join_control_plane".to_string(),
            )),
        }
    }

    #[instrument(skip_all, fields(host = %exec.host(), stage = %stage))]
    async fn execute(
        &self,
        exec: &dyn RemoteExecutor,
        stage: Stage,
        script: &str,
        privileged: bool,
        cancel: &CancellationToken,
    ) -> Result<String, BootstrapError> {
        info!("Running bootstrap stage");
        let result = if privileged {
            exec.run_script_sudo(script, cancel).await
        } else {
            exec.run_script(script, cancel).await
        };

        match result {
            Ok(output) => {
                debug!(output_bytes = output.len(), "Bootstrap stage complete");
                Ok(output)
            }
            Err(source) => {
                warn!(error = %source, "Bootstrap stage failed");
                Err(BootstrapError::Stage {
                    stage,
                    host: exec.host(),
                    source,
                })
            }
        }
    }

    /// Stages 1-3; the first failure aborts
    pub async fn bootstrap_node(
        &self,
        exec: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        self.bootstrap_node_from(exec, Stage::KernelModules, cancel)
            .await
    }

    /// Node preparation stages starting at `from`
    ///
    /// Resumes a partially prepared host after the failure reported by
    /// [`BootstrapError::stage`].
    pub async fn bootstrap_node_from(
        &self,
        exec: &dyn RemoteExecutor,
        from: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        for stage in Stage::NODE_PREPARATION.into_iter().filter(|s| *s >= from) {
            self.run_stage(exec, stage, cancel).await?;
        }
        info!(host = %exec.host(), "Node prepared");
        Ok(())
    }

    /// Stage 4, artifact parsing, then stage 5
    ///
    /// The returned artifacts may be incomplete; see [`JoinArtifacts::is_complete`].
    pub async fn initialize_control_plane(
        &self,
        exec: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<JoinArtifacts, BootstrapError> {
        let output = self
            .run_stage(exec, Stage::ControlPlaneInit, cancel)
            .await?;
        let artifacts = parse_init_output(&output);
        if artifacts.is_complete() {
            info!(host = %exec.host(), "Control plane initialized");
        } else {
            warn!(
                host = %exec.host(),
                "Control plane initialized but join artifacts were not found in its output"
            );
        }

        self.run_stage(exec, Stage::KubectlSetup, cancel).await?;
        Ok(artifacts)
    }

    /// Stage 6 for the named plugin (case-insensitive)
    ///
    /// Unknown names fail before anything runs remotely.
    pub async fn install_cni(
        &self,
        exec: &dyn RemoteExecutor,
        plugin_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        let plugin = CniPlugin::from_name(plugin_name)
            .ok_or_else(|| BootstrapError::UnsupportedCni(plugin_name.to_string()))?;
        self.execute(exec, Stage::CniInstall, &scripts::cni_script(plugin), false, cancel)
            .await?;
        info!(host = %exec.host(), plugin = %plugin, "CNI installed");
        Ok(())
    }

    /// Stage 7 against `control_plane_address` (port 6443 added when missing)
    pub async fn join_worker(
        &self,
        exec: &dyn RemoteExecutor,
        artifacts: &JoinArtifacts,
        control_plane_address: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        if !artifacts.is_complete() {
            return Err(BootstrapError::IncompleteJoinArtifacts(
                "token and CA certificate hash are required".to_string(),
            ));
        }

        let address = with_api_server_port(control_plane_address);
        let config = self.config.for_join(artifacts, &address, false);
        self.execute(
            exec,
            Stage::WorkerJoin,
            &scripts::worker_join_script(&config),
            true,
            cancel,
        )
        .await?;
        info!(host = %exec.host(), control_plane = %address, "Worker joined");
        Ok(())
    }

    /// Join an additional control-plane member, then set up kubectl on it
    pub async fn join_control_plane(
        &self,
        exec: &dyn RemoteExecutor,
        artifacts: &JoinArtifacts,
        control_plane_address: &str,
        cancel: &CancellationToken,
    ) -> Result<(), BootstrapError> {
        let certificate_key = match (&artifacts.certificate_key, artifacts.is_complete()) {
            (Some(key), true) => key,
            _ => {
                return Err(BootstrapError::IncompleteJoinArtifacts(
                    "token, CA certificate hash and certificate key are required".to_string(),
                ))
            }
        };

        let address = with_api_server_port(control_plane_address);
        let config = self.config.for_join(artifacts, &address, true);
        self.execute(
            exec,
            Stage::ControlPlaneJoin,
            &scripts::control_plane_join_script(&config, certificate_key),
            true,
            cancel,
        )
        .await?;
        self.run_stage(exec, Stage::KubectlSetup, cancel).await?;
        info!(host = %exec.host(), control_plane = %address, "Control-plane replica joined");
        Ok(())
    }

    /// Issue a fresh join token on a live control plane
    pub async fn get_join_token(
        &self,
        exec: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<JoinArtifacts, BootstrapError> {
        self.request_artifacts(exec, false, cancel).await
    }

    /// Like [`get_join_token`](Self::get_join_token), plus a fresh certificate key
    pub async fn get_control_plane_join(
        &self,
        exec: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<JoinArtifacts, BootstrapError> {
        self.request_artifacts(exec, true, cancel).await
    }

    async fn request_artifacts(
        &self,
        exec: &dyn RemoteExecutor,
        certificate_key: bool,
        cancel: &CancellationToken,
    ) -> Result<JoinArtifacts, BootstrapError> {
        let output = exec
            .run_script_sudo(&scripts::join_token_script(certificate_key), cancel)
            .await
            .map_err(|source| BootstrapError::Remote {
                host: exec.host(),
                source,
            })?;
        let artifacts = parse_init_output(&output);
        debug!(host = %exec.host(), complete = artifacts.is_complete(), "Requested join artifacts");
        Ok(artifacts)
    }

    /// Poll until every registered node reports Ready
    pub async fn wait_for_node_ready(
        &self,
        exec: &dyn RemoteExecutor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<NodeReadiness>, BootstrapError> {
        readiness::wait_for_nodes_ready(exec, timeout, self.readiness_interval, cancel).await
    }

    /// Download the SSH user's admin kubeconfig written by stage 5
    pub async fn fetch_kubeconfig(
        &self,
        exec: &dyn RemoteExecutor,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, BootstrapError> {
        exec.download(USER_KUBECONFIG, cancel)
            .await
            .map_err(|source| BootstrapError::Remote {
                host: exec.host(),
                source,
            })
    }

    /// Full sequence for a fleet of fresh hosts
    ///
    /// Stages 1-3 run on every host concurrently, 4-6 on the control plane,
    /// then replicas join one at a time and workers join concurrently.
    #[instrument(skip_all, fields(cluster = %self.config.cluster_name(), control_plane = %hosts.control_plane.host()))]
    pub async fn bootstrap_cluster(
        &self,
        hosts: ClusterHosts<'_>,
        cancel: &CancellationToken,
    ) -> Result<BootstrapOutcome, BootstrapError> {
        info!(
            replicas = hosts.control_plane_replicas.len(),
            workers = hosts.workers.len(),
            "Bootstrapping cluster"
        );

        try_join_all(hosts.all().map(|exec| self.bootstrap_node(exec, cancel))).await?;

        let control_plane = hosts.control_plane;
        let mut artifacts = self.initialize_control_plane(control_plane, cancel).await?;
        self.install_cni(control_plane, self.config.cni_plugin().name(), cancel)
            .await?;

        let needs_certificate_key = !hosts.control_plane_replicas.is_empty();
        if !artifacts.is_complete()
            || (needs_certificate_key && artifacts.certificate_key.is_none())
        {
            warn!("Re-requesting join artifacts from the control plane");
            artifacts = self
                .request_artifacts(control_plane, needs_certificate_key, cancel)
                .await?;
        }
        if !artifacts.is_complete() {
            return Err(BootstrapError::IncompleteJoinArtifacts(format!(
                "control plane {} did not produce a usable join command",
                control_plane.host()
            )));
        }

        let address = with_api_server_port(
            self.config
                .control_plane_address()
                .unwrap_or(&control_plane.host()),
        );

        for replica in &hosts.control_plane_replicas {
            self.join_control_plane(*replica, &artifacts, &address, cancel)
                .await?;
        }

        try_join_all(
            hosts
                .workers
                .iter()
                .map(|exec| self.join_worker(*exec, &artifacts, &address, cancel)),
        )
        .await?;

        let kubeconfig = self.fetch_kubeconfig(control_plane, cancel).await?;
        info!(control_plane = %address, "Cluster bootstrapped");

        Ok(BootstrapOutcome {
            artifacts,
            kubeconfig,
            control_plane_address: address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{ExitInfo, MockRemoteExecutor};
    use mockall::predicate::{always, eq, function};
    use mockall::Sequence;

    const JOIN_OUTPUT: &str = "KUBEFORGE_JOIN_COMMAND\nkubeadm join 10.0.0.5:6443 --token abcdef.0123456789abcdef --discovery-token-ca-cert-hash sha256:0a1b2c\n";

    fn executor(host: &'static str) -> MockRemoteExecutor {
        let mut exec = MockRemoteExecutor::new();
        exec.expect_host().returning(move || host.to_string());
        exec
    }

    fn command_failure(stderr: &str) -> SshError {
        SshError::Command {
            exit: ExitInfo::Code(1),
            stderr: stderr.to_string(),
        }
    }

    #[test]
    fn test_stage_order_and_display() {
        assert!(Stage::KernelModules < Stage::ContainerRuntime);
        assert!(Stage::KubernetesTools < Stage::ControlPlaneInit);
        assert!(Stage::CniInstall < Stage::WorkerJoin);
        assert_eq!(Stage::CniInstall.to_string(), "stage 6 (CNI install)");
        assert_eq!(Stage::ControlPlaneJoin.number(), 7);
    }

    #[tokio::test]
    async fn test_bootstrap_node_runs_stages_in_order() {
        let mut exec = executor("10.0.0.5");
        let mut seq = Sequence::new();
        for marker in ["modprobe overlay", "SystemdCgroup", "pkgs.k8s.io"] {
            exec.expect_run_script_sudo()
                .with(function(move |script: &str| script.contains(marker)), always())
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(String::new()));
        }

        Bootstrapper::new(BootstrapConfig::default())
            .bootstrap_node(&exec, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_node_aborts_on_first_failure() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script_sudo()
            .with(function(|script: &str| script.contains("modprobe")), always())
            .times(1)
            .returning(|_, _| Ok(String::new()));
        exec.expect_run_script_sudo()
            .with(function(|script: &str| script.contains("containerd")), always())
            .times(1)
            .returning(|_, _| Err(command_failure("E: Unable to locate package containerd")));

        let err = Bootstrapper::new(BootstrapConfig::default())
            .bootstrap_node(&exec, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(Stage::ContainerRuntime));
        let message = err.to_string();
        assert!(message.contains("10.0.0.5"));
        assert!(message.contains("Unable to locate package containerd"));
    }

    #[tokio::test]
    async fn test_bootstrap_node_from_skips_completed_stages() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script_sudo()
            .with(function(|script: &str| script.contains("pkgs.k8s.io")), always())
            .times(1)
            .returning(|_, _| Ok(String::new()));

        Bootstrapper::new(BootstrapConfig::default())
            .bootstrap_node_from(&exec, Stage::KubernetesTools, &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_install_cni_rejects_unknown_plugin_without_remote_calls() {
        // No expectations: any remote call panics
        let exec = MockRemoteExecutor::new();

        let err = Bootstrapper::new(BootstrapConfig::default())
            .install_cni(&exec, "cilium", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::UnsupportedCni(name) if name == "cilium"));
    }

    #[tokio::test]
    async fn test_install_cni_is_case_insensitive() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script()
            .with(function(|script: &str| script.contains("kube-flannel.yml")), always())
            .times(1)
            .returning(|_, _| Ok(String::new()));

        Bootstrapper::new(BootstrapConfig::default())
            .install_cni(&exec, "Flannel", &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_initialize_control_plane_parses_artifacts() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script_sudo()
            .with(function(|script: &str| script.contains("kubeadm init")), always())
            .times(1)
            .returning(|_, _| Ok(format!("[init] lots of output\n{JOIN_OUTPUT}")));
        exec.expect_run_script()
            .with(function(|script: &str| script.contains(".kube/config")), always())
            .times(1)
            .returning(|_, _| Ok(String::new()));

        let artifacts = Bootstrapper::new(BootstrapConfig::default())
            .initialize_control_plane(&exec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(artifacts.token, "abcdef.0123456789abcdef");
        assert_eq!(artifacts.ca_cert_hash, "sha256:0a1b2c");
    }

    #[tokio::test]
    async fn test_join_worker_appends_api_port() {
        let mut exec = executor("10.0.0.6");
        exec.expect_run_script_sudo()
            .with(
                function(|script: &str| {
                    script.contains("kubeadm join '10.0.0.5:6443' --token 'abcdef.0123456789abcdef'")
                }),
                always(),
            )
            .times(1)
            .returning(|_, _| Ok(String::new()));

        let artifacts = parse_init_output(JOIN_OUTPUT);
        Bootstrapper::new(BootstrapConfig::default())
            .join_worker(&exec, &artifacts, "10.0.0.5", &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_join_worker_rejects_incomplete_artifacts() {
        let exec = MockRemoteExecutor::new();
        let err = Bootstrapper::new(BootstrapConfig::default())
            .join_worker(&exec, &JoinArtifacts::default(), "10.0.0.5", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::IncompleteJoinArtifacts(_)));
    }

    #[tokio::test]
    async fn test_join_control_plane_requires_certificate_key() {
        let exec = MockRemoteExecutor::new();
        let err = Bootstrapper::new(BootstrapConfig::default())
            .join_control_plane(
                &exec,
                &parse_init_output(JOIN_OUTPUT),
                "10.0.0.5",
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::IncompleteJoinArtifacts(_)));
    }

    #[tokio::test]
    async fn test_get_join_token_maps_transport_errors() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script_sudo()
            .returning(|_, _| Err(SshError::connection("10.0.0.5", "Connection reset")));

        let err = Bootstrapper::new(BootstrapConfig::default())
            .get_join_token(&exec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::Remote { ref host, .. } if host == "10.0.0.5"));
    }

    #[tokio::test]
    async fn test_fetch_kubeconfig_downloads_user_copy() {
        let mut exec = executor("10.0.0.5");
        exec.expect_download()
            .with(eq(".kube/config"), always())
            .times(1)
            .returning(|_, _| Ok(b"apiVersion: v1\n".to_vec()));

        let kubeconfig = Bootstrapper::new(BootstrapConfig::default())
            .fetch_kubeconfig(&exec, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(kubeconfig, b"apiVersion: v1\n");
    }

    #[tokio::test]
    async fn test_cancelled_stage_is_reported_as_cancelled() {
        let mut exec = executor("10.0.0.5");
        exec.expect_run_script_sudo()
            .returning(|_, _| Err(SshError::Cancelled));

        let err = Bootstrapper::new(BootstrapConfig::default())
            .bootstrap_node(&exec, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(err.stage(), Some(Stage::KernelModules));
    }
}
