//! 基于配置的静态目录
//!
//! 数据源和目标存储在启动时构建一次，运行期间只读。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use syncer_core::config::{CollectionConfig, DestinationConfig, DestinationKind, SourceConfig};
use syncer_core::{
    CollectionDriver, DestinationCatalog, SourceCatalog, SourceUnit, Storage, SyncResult,
};
use tracing::{info, warn};

use crate::storage::FileStorage;

/// 数据源目录
#[derive(Debug, Default)]
pub struct StaticSourceCatalog {
    sources: RwLock<HashMap<String, Arc<SourceUnit>>>,
}

impl StaticSourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从配置构建，每个集合的连接器由 `driver_factory` 创建
    pub fn from_config<F>(sources: &[SourceConfig], driver_factory: F) -> SyncResult<Self>
    where
        F: Fn(&SourceConfig, &CollectionConfig) -> SyncResult<CollectionDriver>,
    {
        let catalog = Self::new();
        for source in sources {
            let mut unit = SourceUnit::new(&source.id);
            if let Some(prefix) = &source.table_name_prefix {
                unit.table_name_prefix = prefix.clone();
            }
            for destination_id in &source.destinations {
                unit = unit.with_destination(destination_id);
            }
            for destination_id in &source.post_handle_destinations {
                unit = unit.with_post_handle_destination(destination_id);
            }
            for collection in &source.collections {
                unit = unit.with_driver(&collection.name, driver_factory(source, collection)?);
            }
            info!(
                "数据源已加载: {} ({} 个集合)",
                source.id,
                source.collections.len()
            );
            catalog.insert(unit);
        }
        Ok(catalog)
    }

    pub fn insert(&self, unit: SourceUnit) {
        match self.sources.write() {
            Ok(mut sources) => {
                sources.insert(unit.id.clone(), Arc::new(unit));
            }
            Err(e) => warn!("数据源目录锁已损坏: {}", e),
        }
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources
            .read()
            .map(|sources| sources.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl SourceCatalog for StaticSourceCatalog {
    fn get_source(&self, id: &str) -> Option<Arc<SourceUnit>> {
        self.sources.read().ok()?.get(id).cloned()
    }
}

/// 目标存储目录
#[derive(Default)]
pub struct StaticDestinationCatalog {
    storages: RwLock<HashMap<String, (Arc<dyn Storage>, bool)>>,
}

impl StaticDestinationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(destinations: &[DestinationConfig]) -> Self {
        let catalog = Self::new();
        for destination in destinations {
            let storage: Arc<dyn Storage> = match destination.kind {
                DestinationKind::File => {
                    Arc::new(FileStorage::new(&destination.id, &destination.path))
                }
            };
            catalog.insert(storage, true);
            info!("目标存储已加载: {}", destination.id);
        }
        catalog
    }

    /// 注册存储，`ready` 为 false 表示尚未完成初始化
    pub fn insert(&self, storage: Arc<dyn Storage>, ready: bool) {
        match self.storages.write() {
            Ok(mut storages) => {
                storages.insert(storage.id().to_string(), (storage, ready));
            }
            Err(e) => warn!("目标存储目录锁已损坏: {}", e),
        }
    }

    pub fn set_ready(&self, id: &str, ready: bool) {
        if let Ok(mut storages) = self.storages.write() {
            if let Some(entry) = storages.get_mut(id) {
                entry.1 = ready;
            }
        }
    }
}

impl DestinationCatalog for StaticDestinationCatalog {
    fn get_ready_storage(&self, id: &str) -> Option<(Arc<dyn Storage>, bool)> {
        self.storages.read().ok()?.get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use syncer_core::{ExternalDriver, ExternalOutput, TaskLogger};
    use tokio_util::sync::CancellationToken;

    struct NoopDriver;

    #[async_trait]
    impl ExternalDriver for NoopDriver {
        fn kind(&self) -> &str {
            "noop"
        }

        async fn load(
            &self,
            _state: Option<&str>,
            _logger: &TaskLogger,
            _cancel: CancellationToken,
        ) -> SyncResult<ExternalOutput> {
            Ok(ExternalOutput::default())
        }
    }

    #[test]
    fn test_source_catalog_from_config() {
        let sources = vec![SourceConfig {
            id: "acme".to_string(),
            destinations: vec!["files".to_string()],
            post_handle_destinations: vec![],
            table_name_prefix: None,
            collections: vec![CollectionConfig {
                name: "users".to_string(),
                schedule: Some("0 * * * *".to_string()),
                command: "tap-acme".to_string(),
                args: vec![],
            }],
        }];

        let catalog = StaticSourceCatalog::from_config(&sources, |_, _| {
            Ok(CollectionDriver::External(Arc::new(NoopDriver)))
        })
        .unwrap();

        let unit = catalog.get_source("acme").unwrap();
        assert_eq!(unit.table_name_prefix, "acme_");
        assert_eq!(unit.destination_ids, vec!["files".to_string()]);
        assert_eq!(unit.driver("users").unwrap().kind(), "noop");
        assert!(unit.driver("orders").is_none());
        assert!(catalog.get_source("other").is_none());
    }

    #[test]
    fn test_destination_readiness() {
        let catalog = StaticDestinationCatalog::from_config(&[DestinationConfig {
            id: "files".to_string(),
            kind: DestinationKind::File,
            path: "/tmp/syncer".to_string(),
        }]);

        let (_, ready) = catalog.get_ready_storage("files").unwrap();
        assert!(ready);
        catalog.set_ready("files", false);
        let (_, ready) = catalog.get_ready_storage("files").unwrap();
        assert!(!ready);
        assert!(catalog.get_ready_storage("missing").is_none());
    }
}
