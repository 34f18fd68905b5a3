//! Live client cache keyed by instance id.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{ConfigRecord, DownloaderClient, Registry};
use crate::error::{DownloaderError, Result};
use crate::store::DownloaderStore;
use crate::types::{DownloaderRecord, InstanceId, Protocol};

/// Owns the connectivity-tested clients of every enabled downloader
///
/// Reads take the read lock and never block each other. Anything that changes the
/// cache takes the write lock.
pub struct Manager {
    registry: Registry,
    store: Arc<dyn DownloaderStore>,
    clients: RwLock<HashMap<InstanceId, Arc<dyn DownloaderClient>>>,
}

impl Manager {
    /// Create an empty manager; call [`initialize`](Self::initialize) to populate it
    pub fn new(registry: Registry, store: Arc<dyn DownloaderStore>) -> Self {
        Self {
            registry,
            store,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Build and test every enabled downloader, caching those that pass
    ///
    /// A downloader that fails to build or test is logged and skipped; the others
    /// still initialize. Only the store lookup itself can fail this call.
    pub async fn initialize(&self) -> Result<()> {
        let downloaders = self
            .store
            .list_downloaders()
            .await
            .map_err(|e| e.context("list downloaders"))?;

        let mut clients = self.clients.write().await;

        for dl in downloaders.iter().filter(|d| d.enabled) {
            let client = match self.build_record(dl) {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        downloader_id = %dl.id,
                        downloader_name = %dl.name,
                        downloader_type = %dl.kind,
                        "failed to build downloader client"
                    );
                    continue;
                }
            };

            let result = match client.test().await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        downloader_id = %dl.id,
                        downloader_name = %dl.name,
                        downloader_type = %dl.kind,
                        "failed to test downloader connection"
                    );
                    continue;
                }
            };

            if !result.success {
                tracing::warn!(
                    downloader_id = %dl.id,
                    downloader_name = %dl.name,
                    downloader_type = %dl.kind,
                    error = result.error.as_deref().unwrap_or_default(),
                    "downloader connection test failed - not adding to active clients"
                );
                continue;
            }

            tracing::info!(
                downloader_id = %dl.id,
                downloader_name = %dl.name,
                downloader_type = %dl.kind,
                version = result.version.as_deref().unwrap_or_default(),
                "initialized downloader"
            );
            clients.insert(dl.id.clone(), client);
        }

        Ok(())
    }

    /// Active client for an instance
    pub async fn get_client(&self, id: &InstanceId) -> Result<Arc<dyn DownloaderClient>> {
        self.clients
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DownloaderError::ClientNotFound(id.to_string()).into())
    }

    /// Active client for an instance given as a UUID string
    pub async fn get_client_by_id(&self, id: &str) -> Result<Arc<dyn DownloaderClient>> {
        let id = InstanceId::parse(id)?;
        self.get_client(&id).await
    }

    /// Active client of the default downloader for a protocol
    pub async fn get_default_client(
        &self,
        protocol: Protocol,
    ) -> Result<Arc<dyn DownloaderClient>> {
        let dl = self
            .store
            .get_default_downloader(protocol)
            .await
            .map_err(|e| e.context("get default downloader"))?;
        self.get_client(&dl.id).await
    }

    /// Every active client
    pub async fn list_clients(&self) -> Vec<Arc<dyn DownloaderClient>> {
        self.clients.read().await.values().cloned().collect()
    }

    /// Re-sync one instance after its config was created or updated
    ///
    /// The cached client is dropped first. A disabled downloader stays out of the
    /// cache. Unlike [`initialize`](Self::initialize), build and test failures are
    /// returned to the caller.
    pub async fn initialize_downloader(&self, id: &str) -> Result<()> {
        let id = InstanceId::parse(id)?;
        let mut clients = self.clients.write().await;

        let dl = self
            .store
            .get_downloader(&id)
            .await
            .map_err(|e| e.context("get downloader"))?;

        clients.remove(&dl.id);

        if !dl.enabled {
            tracing::info!(
                downloader_id = %dl.id,
                downloader_name = %dl.name,
                "downloader disabled - removed from active clients"
            );
            return Ok(());
        }

        let client = self
            .build_record(&dl)
            .map_err(|e| e.context("build client"))?;

        let result = client
            .test()
            .await
            .map_err(|e| e.context("test connection"))?;

        if !result.success {
            return Err(DownloaderError::TestFailed(result.error.unwrap_or_default()).into());
        }

        tracing::info!(
            downloader_id = %dl.id,
            downloader_name = %dl.name,
            downloader_type = %dl.kind,
            version = result.version.as_deref().unwrap_or_default(),
            "initialized downloader"
        );
        clients.insert(dl.id.clone(), client);
        Ok(())
    }

    /// Evict an instance after it was deleted or disabled
    pub async fn remove_client(&self, id: &str) {
        let Ok(id) = InstanceId::parse(id) else {
            return;
        };
        self.clients.write().await.remove(&id);
        tracing::info!(downloader_id = %id, "removed downloader from active clients");
    }

    /// Fresh, uncached client for a stored downloader
    pub async fn build_test_client(&self, id: &str) -> Result<Arc<dyn DownloaderClient>> {
        let id = InstanceId::parse(id)?;
        let dl = self
            .store
            .get_downloader(&id)
            .await
            .map_err(|e| e.context("get downloader"))?;
        self.build_record(&dl)
    }

    /// Fresh, uncached client for a config that has not been saved yet
    pub fn build_client_from_config(
        &self,
        record: &ConfigRecord,
    ) -> Result<Arc<dyn DownloaderClient>> {
        self.registry.build(record)
    }

    /// Drop every cached client
    pub async fn close(&self) {
        self.clients.write().await.clear();
    }

    fn build_record(&self, dl: &DownloaderRecord) -> Result<Arc<dyn DownloaderClient>> {
        let record = dl.to_config_record()?;
        self.registry.build(&record)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::downloader::test_helpers::{FakeClient, MemoryDownloaderStore, downloader_record};
    use crate::downloader::TestResult;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("fake", |rec: &ConfigRecord| {
            let healthy = rec.url.contains("healthy");
            let client = FakeClient::new(rec.id.clone()).with_test_result(if healthy {
                TestResult {
                    success: true,
                    version: Some("v4.6.0".into()),
                    ..Default::default()
                }
            } else {
                TestResult::failed("Authentication failed - check username and password")
            });
            Ok(Arc::new(client) as Arc<dyn DownloaderClient>)
        });
        registry
    }

    #[tokio::test]
    async fn initialize_caches_only_healthy_enabled_clients() {
        let healthy = downloader_record("fake", "http://healthy", true);
        let unhealthy = downloader_record("fake", "http://broken", true);
        let disabled = downloader_record("fake", "http://healthy", false);
        let unknown = downloader_record("deluge", "http://healthy", true);
        let store = MemoryDownloaderStore::new(vec![
            healthy.clone(),
            unhealthy.clone(),
            disabled.clone(),
            unknown.clone(),
        ]);

        let manager = Manager::new(registry(), Arc::new(store));
        manager.initialize().await.unwrap();

        assert!(manager.get_client(&healthy.id).await.is_ok());
        assert!(manager.get_client(&unhealthy.id).await.is_err());
        assert!(manager.get_client(&disabled.id).await.is_err());
        assert!(manager.get_client(&unknown.id).await.is_err());
        assert_eq!(manager.list_clients().await.len(), 1);
    }

    #[tokio::test]
    async fn get_client_by_id_validates_uuid() {
        let manager = Manager::new(registry(), Arc::new(MemoryDownloaderStore::new(vec![])));
        let err = manager.get_client_by_id("nope").await.err().unwrap();
        assert!(matches!(
            err,
            Error::Downloader(DownloaderError::InvalidInstanceId(_))
        ));

        let missing = InstanceId::new_v4();
        let err = manager
            .get_client_by_id(missing.as_str())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            Error::Downloader(DownloaderError::ClientNotFound(_))
        ));
    }

    #[tokio::test]
    async fn initialize_downloader_surfaces_test_failure() {
        let broken = downloader_record("fake", "http://broken", true);
        let store = MemoryDownloaderStore::new(vec![broken.clone()]);
        let manager = Manager::new(registry(), Arc::new(store));

        let err = manager
            .initialize_downloader(broken.id.as_str())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Authentication failed"));
        assert!(manager.get_client(&broken.id).await.is_err());
    }

    #[tokio::test]
    async fn initialize_downloader_replaces_and_disables() {
        let mut dl = downloader_record("fake", "http://healthy", true);
        let store = Arc::new(MemoryDownloaderStore::new(vec![dl.clone()]));
        let manager = Manager::new(registry(), store.clone());

        manager.initialize_downloader(dl.id.as_str()).await.unwrap();
        assert!(manager.get_client(&dl.id).await.is_ok());

        dl.enabled = false;
        store.put(dl.clone());
        manager.initialize_downloader(dl.id.as_str()).await.unwrap();
        assert!(manager.get_client(&dl.id).await.is_err());
    }

    #[tokio::test]
    async fn default_client_resolves_through_store() {
        let mut dl = downloader_record("fake", "http://healthy", true);
        dl.is_default = true;
        let store = MemoryDownloaderStore::new(vec![dl.clone()]);
        let manager = Manager::new(registry(), Arc::new(store));
        manager.initialize().await.unwrap();

        let client = manager.get_default_client(Protocol::Torrent).await.unwrap();
        assert_eq!(client.instance_id(), &dl.id);
        assert!(manager.get_default_client(Protocol::Usenet).await.is_err());
    }

    #[tokio::test]
    async fn remove_and_close_evict() {
        let a = downloader_record("fake", "http://healthy/a", true);
        let b = downloader_record("fake", "http://healthy/b", true);
        let store = MemoryDownloaderStore::new(vec![a.clone(), b.clone()]);
        let manager = Manager::new(registry(), Arc::new(store));
        manager.initialize().await.unwrap();

        manager.remove_client(a.id.as_str()).await;
        manager.remove_client("garbage").await;
        assert!(manager.get_client(&a.id).await.is_err());
        assert!(manager.get_client(&b.id).await.is_ok());

        manager.close().await;
        assert!(manager.list_clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_clients_bypass_the_cache() {
        let dl = downloader_record("fake", "http://broken", true);
        let store = MemoryDownloaderStore::new(vec![dl.clone()]);
        let manager = Manager::new(registry(), Arc::new(store));

        let client = manager.build_test_client(dl.id.as_str()).await.unwrap();
        let result = client.test().await.unwrap();
        assert!(!result.success);
        assert!(manager.list_clients().await.is_empty());

        let rec = dl.to_config_record().unwrap();
        assert!(manager.build_client_from_config(&rec).is_ok());
        assert!(manager.list_clients().await.is_empty());
    }
}
