//! End-to-end bootstrap flows against scripted hosts

mod common;

use std::time::Duration;

use common::{Fleet, CA_HASH, TOKEN};
use kubeforge::bootstrap::{Bootstrapper, ClusterHosts, Stage};
use kubeforge::config::{BootstrapConfig, CniPlugin};
use tokio_util::sync::CancellationToken;

fn bootstrapper() -> Bootstrapper {
    Bootstrapper::new(
        BootstrapConfig::builder()
            .kubernetes_version("1.31.2")
            .cluster_name("lab")
            .build(),
    )
    .readiness_interval(Duration::from_millis(10))
}

fn is_alnum(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

#[tokio::test]
async fn single_node_cluster_bootstraps_without_joins() {
    let fleet = Fleet::new();
    let control_plane = fleet.host("10.0.0.5");
    let cancel = CancellationToken::new();
    let bootstrapper = bootstrapper();

    let outcome = bootstrapper
        .bootstrap_cluster(ClusterHosts::new(&control_plane), &cancel)
        .await
        .unwrap();

    let (id, secret) = outcome.artifacts.token.split_once('.').unwrap();
    assert!(is_alnum(id) && is_alnum(secret));
    assert!(outcome.artifacts.ca_cert_hash.starts_with("sha256:"));
    assert_eq!(outcome.control_plane_address, "10.0.0.5:6443");
    assert!(!outcome.kubeconfig.is_empty());

    let commands = fleet.commands("10.0.0.5");
    assert!(commands.iter().any(|c| c.contains(CniPlugin::Calico.manifest_url())));
    assert!(
        !commands.iter().any(|c| c.contains("kubeadm join")),
        "a single-node cluster runs no join stage"
    );
    assert!(commands.iter().any(|c| c.contains("--kubernetes-version 'v1.31.2'")));

    let readiness = bootstrapper
        .wait_for_node_ready(&control_plane, Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    assert_eq!(readiness.len(), 1);
    assert!(readiness[0].ready);
}

#[tokio::test]
async fn stages_run_in_documented_order() {
    let fleet = Fleet::new();
    let control_plane = fleet.host("10.0.0.5");

    bootstrapper()
        .bootstrap_cluster(ClusterHosts::new(&control_plane), &CancellationToken::new())
        .await
        .unwrap();

    let commands = fleet.commands("10.0.0.5");
    let position = |needle: &str| {
        commands
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("{needle} never ran"))
    };
    let order = [
        position("modprobe overlay"),
        position("SystemdCgroup"),
        position("pkgs.k8s.io"),
        position("--pod-network-cidr"),
        position(".kube/config"),
        position("kubectl apply"),
    ];
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{order:?}");
    assert_eq!(Stage::CniInstall.number(), 6);
}

#[tokio::test]
async fn worker_added_to_running_cluster_uses_fresh_token() {
    let fleet = Fleet::new();
    let control_plane = fleet.host("10.0.0.5");
    let worker = fleet.host("10.0.0.6");
    let cancel = CancellationToken::new();
    let bootstrapper = bootstrapper();

    bootstrapper
        .bootstrap_cluster(ClusterHosts::new(&control_plane), &cancel)
        .await
        .unwrap();

    let artifacts = bootstrapper.get_join_token(&control_plane, &cancel).await.unwrap();
    assert_eq!(artifacts.token, TOKEN);
    assert_eq!(artifacts.ca_cert_hash, CA_HASH);

    bootstrapper.bootstrap_node(&worker, &cancel).await.unwrap();
    bootstrapper
        .join_worker(&worker, &artifacts, "10.0.0.5", &cancel)
        .await
        .unwrap();

    let expected = format!(
        "kubeadm join '10.0.0.5:6443' --token '{TOKEN}' --discovery-token-ca-cert-hash '{CA_HASH}'"
    );
    assert!(fleet.ran("10.0.0.6", &expected), "{:?}", fleet.commands("10.0.0.6"));
    assert!(!fleet.ran("10.0.0.6", "--control-plane"));

    let readiness = bootstrapper
        .wait_for_node_ready(&control_plane, Duration::from_secs(5), &cancel)
        .await
        .unwrap();
    assert_eq!(readiness.len(), 2);
}

#[tokio::test]
async fn replicas_join_as_control_plane_with_certificate_key() {
    let fleet = Fleet::new();
    let control_plane = fleet.host("10.0.0.5");
    let replica = fleet.host("10.0.0.15");
    let worker = fleet.host("10.0.0.6");

    let outcome = bootstrapper()
        .bootstrap_cluster(
            ClusterHosts::new(&control_plane).replica(&replica).worker(&worker),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(outcome.artifacts.certificate_key.is_some());
    assert!(fleet.ran("10.0.0.15", "--control-plane --certificate-key"));
    assert!(fleet.ran("10.0.0.6", "kubeadm join"));
    assert!(!fleet.ran("10.0.0.6", "--control-plane"));
    assert_eq!(fleet.node_names().len(), 3);
}

#[tokio::test]
async fn cancelled_bootstrap_reports_cancellation() {
    let fleet = Fleet::new();
    let control_plane = fleet.host("10.0.0.5");
    let cancel = CancellationToken::new();
    cancel.cancel();

    // Scripted hosts ignore the token; readiness polling does not
    let err = bootstrapper()
        .wait_for_node_ready(&control_plane, Duration::from_secs(5), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}
