//! Provider registry and kubeadm lifecycle through the public API

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::Fleet;
use kubeforge::config::{CreateOptions, HostSpec, NodeGroupSpec, ScaleOptions};
use kubeforge::provider::{MAX_BELOW_MIN, NODE_GROUP_NAME_REQUIRED, REGION_REQUIRED};
use kubeforge::retry::RetryPolicy;
use kubeforge::{
    ClusterManager, ClusterProvider, ClusterStatus, ClusterType, EksProvider, ExistingProvider,
    KubeadmProvider, ProviderError,
};

fn kubeadm(fleet: &Fleet) -> KubeadmProvider {
    KubeadmProvider::new(Arc::new(fleet.clone()))
        .retry_policy(RetryPolicy::none())
        .readiness_interval(Duration::from_millis(10))
        .readiness_timeout(Duration::from_secs(5))
}

fn lab() -> CreateOptions {
    CreateOptions::new("lab")
        .kubernetes_version("1.31")
        .control_plane_host(HostSpec::new("10.0.0.5").user("ubuntu"))
        .worker_host(HostSpec::new("10.0.0.6").user("ubuntu"))
}

#[tokio::test]
async fn registry_routes_by_cluster_type() {
    let fleet = Fleet::new();
    let manager = ClusterManager::new();
    manager.register_provider(Arc::new(kubeadm(&fleet)));
    manager.register_provider(Arc::new(ExistingProvider::new()));

    assert_eq!(manager.registered_types(), vec![ClusterType::Existing, ClusterType::Kubeadm]);
    assert!(matches!(
        manager.get_provider(ClusterType::Eks).err(),
        Some(ProviderError::NotRegistered(ClusterType::Eks))
    ));

    let provider = manager.get_provider(ClusterType::Kubeadm).unwrap();
    provider.create(&lab()).await.unwrap();

    let health = manager.health(ClusterType::Kubeadm, "lab").await.unwrap();
    assert!(health.healthy, "{}", health.message);
}

#[tokio::test]
async fn kubeadm_cluster_full_lifecycle() {
    let fleet = Fleet::new();
    let provider = kubeadm(&fleet);

    let info = provider.create(&lab()).await.unwrap();
    assert_eq!(info.cluster_type, ClusterType::Kubeadm);
    assert_eq!(info.status, ClusterStatus::Active);
    assert_eq!(info.worker_nodes.len(), 1);

    let listed = provider.list_clusters().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "lab");

    provider
        .create_node_group(
            "lab",
            &NodeGroupSpec::new("batch", 1)
                .label("workload", "batch")
                .host(HostSpec::new("10.0.0.20")),
        )
        .await
        .unwrap();
    assert!(fleet.ran("10.0.0.5", "'kubeforge.io/node-group=batch'"));

    provider
        .scale(
            "lab",
            &ScaleOptions::new(2)
                .node_group("batch")
                .bounds(1, 3)
                .host(HostSpec::new("10.0.0.21")),
        )
        .await
        .unwrap();
    let group = provider.get_node_group("lab", "batch").await.unwrap();
    assert_eq!((group.min_size, group.desired_size, group.max_size), (1, 2, 3));

    let kubeconfig = String::from_utf8(provider.get_kubeconfig("lab").await.unwrap()).unwrap();
    assert!(kubeconfig.contains("current-context: lab"));

    provider.delete("lab").await.unwrap();
    assert!(provider.list_clusters().await.unwrap().is_empty());
    assert!(fleet.node_names().is_empty());
    assert!(fleet.ran("10.0.0.21", "kubeadm reset"));
}

#[tokio::test]
async fn validation_happens_before_remote_work() {
    let fleet = Fleet::new();
    let provider = kubeadm(&fleet);

    let err = provider
        .scale("lab", &ScaleOptions::new(2).bounds(4, 2))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidConfiguration(ref m) if m == MAX_BELOW_MIN));

    let err = provider.delete_node_group("lab", "").await.unwrap_err();
    assert!(matches!(
        err,
        ProviderError::InvalidConfiguration(ref m) if m == NODE_GROUP_NAME_REQUIRED
    ));

    let err = EksProvider::new("").get_cluster("prod").await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidConfiguration(ref m) if m == REGION_REQUIRED));

    assert!(fleet.node_names().is_empty());
    assert!(fleet.commands("10.0.0.5").is_empty());
}

#[tokio::test]
async fn unknown_cluster_is_not_found_but_health_never_errors() {
    let provider = kubeadm(&Fleet::new());

    assert!(matches!(
        provider.get_kubeconfig("ghost").await,
        Err(ProviderError::ClusterNotFound(name)) if name == "ghost"
    ));
    let health = provider.health("ghost").await;
    assert!(!health.healthy);
}
