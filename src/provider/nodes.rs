//! Node and control-plane summaries shared by the providers

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Node, Pod};

use super::{HealthStatus, NodeInfo, NodeRole, NodeStatus};
use crate::bootstrap::readiness::node_is_ready;

pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const LEGACY_MASTER_ROLE_LABEL: &str = "node-role.kubernetes.io/master";

/// Label marking which node group a self-managed worker belongs to
pub const NODE_GROUP_LABEL: &str = "kubeforge.io/node-group";

#[must_use]
pub fn node_role(node: &Node) -> NodeRole {
    let is_control_plane = node.metadata.labels.as_ref().is_some_and(|labels| {
        labels.contains_key(CONTROL_PLANE_ROLE_LABEL)
            || labels.contains_key(LEGACY_MASTER_ROLE_LABEL)
    });
    if is_control_plane {
        NodeRole::ControlPlane
    } else {
        NodeRole::Worker
    }
}

fn node_address(node: &Node, kind: &str) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|address| address.type_ == kind)
        .map(|address| address.address.clone())
}

#[must_use]
pub fn node_info(node: &Node) -> NodeInfo {
    NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        role: node_role(node),
        status: if node_is_ready(node) {
            NodeStatus::Ready
        } else {
            NodeStatus::NotReady
        },
        internal_address: node_address(node, "InternalIP"),
        external_address: node_address(node, "ExternalIP"),
        labels: node.metadata.labels.clone().unwrap_or_default(),
    }
}

/// Control-plane nodes first, workers second
#[must_use]
pub fn split_by_role(nodes: &[Node]) -> (Vec<NodeInfo>, Vec<NodeInfo>) {
    nodes
        .iter()
        .map(node_info)
        .partition(|info| info.role == NodeRole::ControlPlane)
}

/// Component name for a static control-plane pod (`component` label, else pod name)
fn component_name(pod: &Pod) -> String {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("component"))
        .cloned()
        .or_else(|| pod.metadata.name.clone())
        .unwrap_or_default()
}

fn pod_status(pod: &Pod) -> (bool, String) {
    let Some(status) = pod.status.as_ref() else {
        return (false, "Unknown".to_string());
    };
    let phase = status.phase.clone().unwrap_or_else(|| "Unknown".to_string());
    let ready = status
        .conditions
        .as_ref()
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        });

    if phase == "Running" && ready {
        (true, "Healthy".to_string())
    } else if phase == "Running" {
        (false, "Running (not ready)".to_string())
    } else {
        (false, phase)
    }
}

/// Fold API server version, nodes and control-plane pods into one report
///
/// Healthy means at least one node is registered, every node is Ready and
/// every control-plane pod is Running and Ready.
#[must_use]
pub fn summarize_health(
    server_version: Option<&str>,
    nodes: &[Node],
    control_plane_pods: &[Pod],
) -> HealthStatus {
    let node_statuses: BTreeMap<String, NodeStatus> = nodes
        .iter()
        .map(node_info)
        .map(|info| (info.name, info.status))
        .collect();

    let mut component_statuses = BTreeMap::new();
    let mut unhealthy_components = Vec::new();
    for pod in control_plane_pods {
        let name = component_name(pod);
        let (healthy, status) = pod_status(pod);
        if !healthy {
            unhealthy_components.push(name.clone());
        }
        component_statuses.insert(name, status);
    }

    let not_ready: Vec<&str> = node_statuses
        .iter()
        .filter(|(_, status)| **status == NodeStatus::NotReady)
        .map(|(name, _)| name.as_str())
        .collect();

    let mut problems = Vec::new();
    if node_statuses.is_empty() {
        problems.push("no nodes registered".to_string());
    }
    if !not_ready.is_empty() {
        problems.push(format!(
            "{}/{} nodes not ready: {}",
            not_ready.len(),
            node_statuses.len(),
            not_ready.join(", ")
        ));
    }
    if !unhealthy_components.is_empty() {
        problems.push(format!("unhealthy components: {}", unhealthy_components.join(", ")));
    }

    let healthy = problems.is_empty();
    let summary = if healthy {
        format!(
            "all {} nodes ready, {} control-plane components healthy",
            node_statuses.len(),
            component_statuses.len()
        )
    } else {
        problems.join("; ")
    };
    let message = match server_version {
        Some(version) => format!("API server {version}: {summary}"),
        None => summary,
    };

    HealthStatus {
        healthy,
        message,
        component_statuses,
        node_statuses,
        ..HealthStatus::healthy("")
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn node(name: &str, control_plane: bool, ready: bool) -> Node {
        let mut labels = serde_json::Map::new();
        labels.insert("kubernetes.io/hostname".to_string(), json!(name));
        if control_plane {
            labels.insert(CONTROL_PLANE_ROLE_LABEL.to_string(), json!(""));
        }
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": name, "labels": labels},
            "status": {
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}],
                "addresses": [
                    {"type": "InternalIP", "address": "10.0.0.5"},
                    {"type": "Hostname", "address": name}
                ]
            }
        }))
        .unwrap()
    }

    pub(crate) fn control_plane_pod(component: &str, phase: &str, ready: bool) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": format!("{component}-cp-1"),
                "namespace": "kube-system",
                "labels": {"component": component, "tier": "control-plane"}
            },
            "status": {
                "phase": phase,
                "conditions": [{"type": "Ready", "status": if ready { "True" } else { "False" }}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_node_info_reads_role_and_addresses() {
        let info = node_info(&node("cp-1", true, true));
        assert_eq!(info.role, NodeRole::ControlPlane);
        assert_eq!(info.status, NodeStatus::Ready);
        assert_eq!(info.internal_address.as_deref(), Some("10.0.0.5"));
        assert!(info.external_address.is_none());
    }

    #[test]
    fn test_legacy_master_label_counts_as_control_plane() {
        let mut n = node("old", false, true);
        n.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(LEGACY_MASTER_ROLE_LABEL.to_string(), String::new());
        assert_eq!(node_role(&n), NodeRole::ControlPlane);
    }

    #[test]
    fn test_split_by_role() {
        let nodes = [node("cp-1", true, true), node("w-1", false, true), node("w-2", false, false)];
        let (control_plane, workers) = split_by_role(&nodes);
        assert_eq!(control_plane.len(), 1);
        assert_eq!(workers.iter().map(|w| w.name.as_str()).collect::<Vec<_>>(), ["w-1", "w-2"]);
    }

    #[test]
    fn test_summarize_healthy_cluster() {
        let status = summarize_health(
            Some("v1.31.2"),
            &[node("cp-1", true, true), node("w-1", false, true)],
            &[
                control_plane_pod("kube-apiserver", "Running", true),
                control_plane_pod("etcd", "Running", true),
            ],
        );
        assert!(status.healthy);
        assert_eq!(
            status.message,
            "API server v1.31.2: all 2 nodes ready, 2 control-plane components healthy"
        );
        assert_eq!(status.component_statuses["etcd"], "Healthy");
    }

    #[test]
    fn test_summarize_reports_not_ready_nodes_and_components() {
        let status = summarize_health(
            None,
            &[node("cp-1", true, true), node("w-1", false, false)],
            &[control_plane_pod("kube-scheduler", "Pending", false)],
        );
        assert!(!status.healthy);
        assert!(status.message.contains("1/2 nodes not ready: w-1"));
        assert!(status.message.contains("unhealthy components: kube-scheduler"));
        assert_eq!(status.node_statuses["w-1"], NodeStatus::NotReady);
    }

    #[test]
    fn test_summarize_without_nodes_is_unhealthy() {
        let status = summarize_health(Some("v1.31.2"), &[], &[]);
        assert!(!status.healthy);
        assert!(status.message.contains("no nodes registered"));
    }
}
