//! Scripted hosts for integration tests
//!
//! A [`Fleet`] simulates a set of Linux hosts: every command is logged, and
//! kubeadm/kubectl invocations update a shared node registry so readiness
//! polling and scale-down see consistent state.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kubeforge::bootstrap::join::{CERT_KEY_MARKER, JOIN_MARKER};
use kubeforge::config::HostSpec;
use kubeforge::provider::HostConnector;
use kubeforge::ssh::{RemoteExecutor, SshError};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const TOKEN: &str = "k8sfrg.q1w2e3r4t5y6u7i8";
pub const CA_HASH: &str = "sha256:d9f0c1b2a3e4d5c6b7a8f9e0d1c2b3a4f5e6d7c8b9a0f1e2d3c4b5a6f7e8d9c0";
pub const CERT_KEY: &str = "f00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeedf00dfeed";

pub const ADMIN_KUBECONFIG: &str = r"apiVersion: v1
kind: Config
clusters:
- name: kubernetes
  cluster:
    certificate-authority-data: Q0FEQVRB
    server: https://10.0.0.5:6443
contexts:
- name: kubernetes-admin@kubernetes
  context:
    cluster: kubernetes
    user: kubernetes-admin
current-context: kubernetes-admin@kubernetes
users:
- name: kubernetes-admin
  user:
    client-certificate-data: Q0VSVA==
    client-key-data: S0VZ
";

#[derive(Default)]
struct FleetState {
    /// node name -> control plane
    nodes: BTreeMap<String, bool>,
    log: Vec<(String, String)>,
}

#[derive(Clone, Default)]
pub struct Fleet {
    state: Arc<Mutex<FleetState>>,
}

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(&self, address: &str) -> ScriptedHost {
        ScriptedHost {
            address: address.to_string(),
            fleet: self.clone(),
        }
    }

    /// Commands run on `address`, in order
    pub fn commands(&self, address: &str) -> Vec<String> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|(host, _)| host == address)
            .map(|(_, command)| command.clone())
            .collect()
    }

    pub fn ran(&self, address: &str, needle: &str) -> bool {
        self.commands(address).iter().any(|c| c.contains(needle))
    }

    pub fn node_names(&self) -> Vec<String> {
        self.state.lock().nodes.keys().cloned().collect()
    }

    fn node_list(&self) -> String {
        let items: Vec<_> = self
            .state
            .lock()
            .nodes
            .iter()
            .map(|(name, control_plane)| {
                let labels = if *control_plane {
                    json!({"node-role.kubernetes.io/control-plane": ""})
                } else {
                    json!({})
                };
                json!({
                    "apiVersion": "v1",
                    "kind": "Node",
                    "metadata": {"name": name, "labels": labels},
                    "status": {"conditions": [{"type": "Ready", "status": "True"}]}
                })
            })
            .collect();
        json!({"apiVersion": "v1", "kind": "List", "items": items}).to_string()
    }
}

fn join_output() -> String {
    format!(
        "{JOIN_MARKER}\nkubeadm join 10.0.0.5:6443 --token {TOKEN} --discovery-token-ca-cert-hash {CA_HASH} \n{CERT_KEY_MARKER} {CERT_KEY}\n"
    )
}

pub struct ScriptedHost {
    address: String,
    fleet: Fleet,
}

impl ScriptedHost {
    fn node_name(&self) -> String {
        format!("node-{}", self.address.replace('.', "-"))
    }

    fn respond(&self, command: &str) -> Result<String, SshError> {
        {
            let mut state = self.fleet.state.lock();
            state.log.push((self.address.clone(), command.to_string()));

            if command.contains("--pod-network-cidr") {
                state.nodes.insert(self.node_name(), true);
                return Ok(format!(
                    "[init] Using Kubernetes version: v1.31.2\n\
                     Your Kubernetes control-plane has initialized successfully!\n{}",
                    join_output()
                ));
            }
            if command.contains("kubeadm token create") {
                return Ok(join_output());
            }
            if command.contains("kubeadm join") {
                state
                    .nodes
                    .insert(self.node_name(), command.contains("--control-plane"));
                return Ok(String::new());
            }
            if command.contains("kubeadm reset") {
                state.nodes.remove(&self.node_name());
                return Ok(String::new());
            }
            if command.starts_with("kubectl delete node") {
                state
                    .nodes
                    .retain(|name, _| !command.contains(&format!("'{name}'")));
                return Ok(String::new());
            }
        }

        Ok(match command {
            "kubectl get nodes -o json" => self.fleet.node_list(),
            "kubectl version -o json" => {
                json!({"serverVersion": {"gitVersion": "v1.31.2"}}).to_string()
            }
            "kubectl get pods -n kube-system -l tier=control-plane -o json" => {
                json!({"apiVersion": "v1", "kind": "List", "items": []}).to_string()
            }
            c if c.starts_with("hostname") => format!("{}\n", self.node_name()),
            _ => String::new(),
        })
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedHost {
    fn host(&self) -> String {
        self.address.clone()
    }

    async fn run(&self, command: &str, _cancel: &CancellationToken) -> Result<String, SshError> {
        self.respond(command)
    }

    async fn run_sudo(
        &self,
        command: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, SshError> {
        self.respond(command)
    }

    async fn run_script(
        &self,
        script: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, SshError> {
        self.respond(script)
    }

    async fn run_script_sudo(
        &self,
        script: &str,
        _cancel: &CancellationToken,
    ) -> Result<String, SshError> {
        self.respond(script)
    }

    async fn upload(
        &self,
        _content: &[u8],
        _remote_path: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), SshError> {
        Ok(())
    }

    async fn download(
        &self,
        remote_path: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>, SshError> {
        self.fleet
            .state
            .lock()
            .log
            .push((self.address.clone(), format!("download {remote_path}")));
        Ok(ADMIN_KUBECONFIG.as_bytes().to_vec())
    }
}

#[async_trait]
impl HostConnector for Fleet {
    async fn connect(
        &self,
        host: &HostSpec,
        _cancel: &CancellationToken,
    ) -> Result<Box<dyn RemoteExecutor>, SshError> {
        Ok(Box::new(self.host(&host.address)))
    }
}
