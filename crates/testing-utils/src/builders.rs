//! Test data builders and a pre-wired fixture
//!
//! `SyncFixture` assembles the in-memory store, lock backend, coordination
//! service and catalogs the dispatcher and worker need.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use syncer_core::config::CoordinationConfig;
use syncer_core::{
    CollectionDriver, ExternalDriver, LockBackend, NativeDriver, Priority, Record, SourceUnit,
    Storage, SyncStateStore, Task, TaskStatus, TaskStore,
};
use syncer_infrastructure::{
    CoordinationService, InMemoryLockBackend, InMemoryStore, StaticDestinationCatalog,
    StaticSourceCatalog,
};

/// Builder for Task records
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(source: &str, collection: &str) -> Self {
        Self {
            task: Task::new(source, collection, Priority::Low, Utc::now()),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.task.priority = priority.score(self.task.created_at);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.task.started_at = Some(started_at);
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Converts a JSON object literal into a record
pub fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        other => panic!("record must be a JSON object, got {other}"),
    }
}

pub fn native_source(
    id: &str,
    collection: &str,
    driver: Arc<dyn NativeDriver>,
    destinations: &[&str],
) -> SourceUnit {
    destinations.iter().fold(
        SourceUnit::new(id).with_driver(collection, CollectionDriver::Native(driver)),
        |unit, destination| unit.with_destination(destination),
    )
}

pub fn external_source(
    id: &str,
    collection: &str,
    driver: Arc<dyn ExternalDriver>,
    destinations: &[&str],
) -> SourceUnit {
    destinations.iter().fold(
        SourceUnit::new(id).with_driver(collection, CollectionDriver::External(driver)),
        |unit, destination| unit.with_destination(destination),
    )
}

/// Everything a scheduler node needs, backed by in-memory implementations
#[derive(Clone)]
pub struct SyncFixture {
    pub task_store: Arc<dyn TaskStore>,
    pub state_store: Arc<dyn SyncStateStore>,
    pub lock_backend: Arc<dyn LockBackend>,
    pub coordination: CoordinationService,
    pub sources: Arc<StaticSourceCatalog>,
    pub destinations: Arc<StaticDestinationCatalog>,
}

impl SyncFixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: TaskStore + SyncStateStore + 'static,
    {
        Self::with_store_and_locks(store, Arc::new(InMemoryLockBackend::new()))
    }

    pub fn with_store_and_locks<S>(store: Arc<S>, lock_backend: Arc<dyn LockBackend>) -> Self
    where
        S: TaskStore + SyncStateStore + 'static,
    {
        let coordination = CoordinationService::new(
            lock_backend.clone(),
            CoordinationConfig {
                unlock_retry_delay_ms: 1,
                ..CoordinationConfig::default()
            },
        );
        Self {
            task_store: store.clone(),
            state_store: store,
            lock_backend,
            coordination,
            sources: Arc::new(StaticSourceCatalog::new()),
            destinations: Arc::new(StaticDestinationCatalog::new()),
        }
    }

    pub fn add_source(&self, unit: SourceUnit) -> &Self {
        self.sources.insert(unit);
        self
    }

    pub fn add_storage(&self, storage: Arc<dyn Storage>, ready: bool) -> &Self {
        self.destinations.insert(storage, ready);
        self
    }

    /// A second node sharing this fixture's store and lock backend
    pub fn another_node(&self) -> CoordinationService {
        CoordinationService::new(self.lock_backend.clone(), CoordinationConfig::default())
    }
}

impl Default for SyncFixture {
    fn default() -> Self {
        Self::new()
    }
}
