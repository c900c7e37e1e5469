use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{ClusterProvider, ClusterType, HealthStatus, ProviderError};

/// Registry of providers keyed by [`ClusterType`]
///
/// Registering a second provider for a type replaces the first. There is
/// no default provider: looking up an unregistered type is an error.
#[derive(Default)]
pub struct ClusterManager {
    providers: RwLock<HashMap<ClusterType, Arc<dyn ClusterProvider>>>,
}

impl ClusterManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own [`ClusterProvider::cluster_type`]
    pub fn register_provider(&self, provider: Arc<dyn ClusterProvider>) {
        let cluster_type = provider.cluster_type();
        let replaced = self.providers.write().insert(cluster_type, provider).is_some();
        info!(cluster_type = %cluster_type, replaced, "Registered cluster provider");
    }

    pub fn get_provider(
        &self,
        cluster_type: ClusterType,
    ) -> Result<Arc<dyn ClusterProvider>, ProviderError> {
        self.providers
            .read()
            .get(&cluster_type)
            .cloned()
            .ok_or(ProviderError::NotRegistered(cluster_type))
    }

    /// Registered types in a stable order
    #[must_use]
    pub fn registered_types(&self) -> Vec<ClusterType> {
        let mut types: Vec<_> = self.providers.read().keys().copied().collect();
        types.sort();
        types
    }

    /// Health of `name` through the provider for `cluster_type`
    pub async fn health(
        &self,
        cluster_type: ClusterType,
        name: &str,
    ) -> Result<HealthStatus, ProviderError> {
        let provider = self.get_provider(cluster_type)?;
        debug!(cluster_type = %cluster_type, cluster = name, "Checking cluster health");
        Ok(provider.health(name).await)
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("providers", &self.registered_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockClusterProvider;

    fn provider(cluster_type: ClusterType, message: &'static str) -> Arc<dyn ClusterProvider> {
        let mut mock = MockClusterProvider::new();
        mock.expect_cluster_type().return_const(cluster_type);
        mock.expect_health()
            .returning(move |_| HealthStatus::healthy(message));
        Arc::new(mock)
    }

    #[test]
    fn test_unregistered_type_is_not_found() {
        let manager = ClusterManager::new();
        let err = manager.get_provider(ClusterType::Eks).err().unwrap();
        assert!(matches!(err, ProviderError::NotRegistered(ClusterType::Eks)));
        assert!(manager.registered_types().is_empty());
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let manager = ClusterManager::new();
        manager.register_provider(provider(ClusterType::Kubeadm, "first"));
        manager.register_provider(provider(ClusterType::Kubeadm, "second"));

        let status = manager.health(ClusterType::Kubeadm, "lab").await.unwrap();
        assert_eq!(status.message, "second");
        assert_eq!(manager.registered_types(), vec![ClusterType::Kubeadm]);
    }

    #[tokio::test]
    async fn test_health_through_unregistered_type_fails() {
        let manager = ClusterManager::new();
        manager.register_provider(provider(ClusterType::Existing, "ok"));

        assert!(manager.health(ClusterType::Existing, "prod").await.unwrap().healthy);
        assert!(matches!(
            manager.health(ClusterType::Eks, "prod").await,
            Err(ProviderError::NotRegistered(ClusterType::Eks))
        ));
        assert_eq!(manager.registered_types(), vec![ClusterType::Existing]);
    }
}
