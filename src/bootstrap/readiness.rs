//! Node readiness polling through kubectl on the control plane

use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::scripts::node_status_command;
use super::BootstrapError;
use crate::eventually::{eventually, Check, ConditionError};
use crate::ssh::{RemoteExecutor, SshError};
use crate::wait::WaitError;

/// `kubectl get <kind> -o json` envelope
#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Ready condition of one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReadiness {
    pub name: String,
    pub ready: bool,
}

/// True when the node reports condition `Ready=True`
#[must_use]
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Parse `kubectl get nodes -o json` output
pub fn parse_node_list(json: &str) -> Result<Vec<Node>, serde_json::Error> {
    serde_json::from_str::<ObjectList<Node>>(json).map(|list| list.items)
}

#[must_use]
pub fn node_readiness(nodes: &[Node]) -> Vec<NodeReadiness> {
    nodes
        .iter()
        .map(|node| NodeReadiness {
            name: node.metadata.name.clone().unwrap_or_default(),
            ready: node_is_ready(node),
        })
        .collect()
}

fn describe(readiness: &[NodeReadiness]) -> String {
    if readiness.is_empty() {
        return "no nodes registered".to_string();
    }
    let ready = readiness.iter().filter(|n| n.ready).count();
    format!("{ready}/{} nodes ready", readiness.len())
}

/// Poll until every registered node is Ready
///
/// A failing kubectl (API server still starting) counts as "not yet"; a
/// broken SSH transport aborts the wait.
pub(crate) async fn wait_for_nodes_ready(
    exec: &dyn RemoteExecutor,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<Vec<NodeReadiness>, BootstrapError> {
    let host = exec.host();
    let last_seen: Mutex<Vec<NodeReadiness>> = Mutex::new(Vec::new());
    let seen = &last_seen;
    let started = std::time::Instant::now();

    let result = eventually(move || async move {
        let output = match exec.run(node_status_command(), cancel).await {
            Ok(output) => output,
            Err(SshError::Command { stderr, .. }) => {
                return Ok(Check::Pending(format!("kubectl failed: {stderr}")));
            }
            Err(e) => return Err(e),
        };

        let nodes = match parse_node_list(&output) {
            Ok(nodes) => nodes,
            Err(e) => return Ok(Check::Pending(format!("unreadable node list: {e}"))),
        };
        let readiness = node_readiness(&nodes);
        let state = describe(&readiness);
        debug!(state = %state, "Polled node readiness");

        if !readiness.is_empty() && readiness.iter().all(|n| n.ready) {
            return Ok(Check::Met(readiness));
        }
        *seen.lock() = readiness;
        Ok(Check::Pending(state))
    })
    .timeout(timeout)
    .interval(interval)
    .cancel_on(cancel.clone())
    .await_condition()
    .await;

    match result {
        Ok(readiness) => {
            info!(host = %host, nodes = readiness.len(), "All nodes ready");
            Ok(readiness)
        }
        Err(ConditionError::Timeout {
            attempts,
            last_state,
            ..
        }) => {
            let details = last_seen
                .lock()
                .iter()
                .filter(|n| !n.ready)
                .map(|n| format!("{}: NotReady", n.name))
                .collect();
            Err(BootstrapError::Timeout(
                WaitError::new(format!("nodes via {host}"), timeout, started.elapsed())
                    .with_state(last_state)
                    .with_attempts(attempts)
                    .with_details(details),
            ))
        }
        Err(ConditionError::Cancelled) => Err(BootstrapError::Remote {
            host,
            source: SshError::Cancelled,
        }),
        Err(ConditionError::Aborted(source)) => Err(BootstrapError::Remote { host, source }),
    }
}
