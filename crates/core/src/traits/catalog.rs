use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::models::{BatchHeader, Record};
use crate::traits::driver::CollectionDriver;
use crate::SyncResult;

/// 已初始化的数据源
///
/// 每个集合的连接器在构建时确定是外部进程还是原生增量类型，执行时不再判断。
#[derive(Clone)]
pub struct SourceUnit {
    pub id: String,
    pub destination_ids: Vec<String>,
    pub post_handle_destinations: Vec<String>,
    pub table_name_prefix: String,
    pub drivers: HashMap<String, CollectionDriver>,
}

impl SourceUnit {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            destination_ids: Vec::new(),
            post_handle_destinations: Vec::new(),
            table_name_prefix: format!("{id}_"),
            drivers: HashMap::new(),
        }
    }

    pub fn with_destination(mut self, destination_id: &str) -> Self {
        self.destination_ids.push(destination_id.to_string());
        self
    }

    pub fn with_post_handle_destination(mut self, destination_id: &str) -> Self {
        self.post_handle_destinations.push(destination_id.to_string());
        self
    }

    pub fn with_driver(mut self, collection: &str, driver: CollectionDriver) -> Self {
        self.drivers.insert(collection.to_string(), driver);
        self
    }

    pub fn driver(&self, collection: &str) -> Option<&CollectionDriver> {
        self.drivers.get(collection)
    }
}

impl std::fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceUnit")
            .field("id", &self.id)
            .field("destination_ids", &self.destination_ids)
            .field("collections", &self.drivers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 数据源目录，由外部服务维护
pub trait SourceCatalog: Send + Sync {
    fn get_source(&self, id: &str) -> Option<Arc<SourceUnit>>;
}

/// 目标存储目录
pub trait DestinationCatalog: Send + Sync {
    /// 返回存储及其是否已完成初始化
    fn get_ready_storage(&self, id: &str) -> Option<(Arc<dyn Storage>, bool)>;
}

/// 目标存储
#[async_trait]
pub trait Storage: Send + Sync {
    fn id(&self) -> &str;

    async fn write(
        &self,
        header: &BatchHeader,
        records: &[Record],
        interval_tag: Option<&str>,
    ) -> SyncResult<()>;
}
