use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use syncer_core::{
    config::StoreBackend, AppConfig, CollectionDriver, LockBackend, SyncStateStore, TaskStore,
};
use syncer_dispatcher::{StallDetector, SyncScheduler, TaskService};
use syncer_infrastructure::{
    CoordinationService, InMemoryLockBackend, InMemoryStore, RedisConnectionManager,
    RedisLockBackend, RedisStore, StaticDestinationCatalog, StaticSourceCatalog,
};
use syncer_worker::{LogNotifier, SingerDriver, TaskExecutor};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 执行器关闭时等待执行中任务的最长时间
const EXECUTOR_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// 主应用程序
pub struct Application {
    config: AppConfig,
    task_store: Arc<dyn TaskStore>,
    state_store: Arc<dyn SyncStateStore>,
    sources: Arc<StaticSourceCatalog>,
    destinations: Arc<StaticDestinationCatalog>,
    coordination: CoordinationService,
    service: Arc<TaskService>,
}

impl Application {
    /// 根据配置连接存储并装配各组件
    pub async fn new(config: AppConfig) -> Result<Self> {
        let (task_store, state_store, lock_backend) = create_backends(&config).await?;

        let sources = Arc::new(
            StaticSourceCatalog::from_config(&config.sources, |_, collection| {
                Ok(CollectionDriver::External(Arc::new(SingerDriver::new(
                    &collection.command,
                    &collection.args,
                ))))
            })
            .context("加载数据源配置失败")?,
        );
        let destinations = Arc::new(StaticDestinationCatalog::from_config(&config.destinations));
        let coordination = CoordinationService::new(lock_backend, config.coordination.clone());

        let service = Arc::new(TaskService::new(
            sources.clone(),
            destinations.clone(),
            task_store.clone(),
            coordination.clone(),
        ));

        Ok(Self {
            config,
            task_store,
            state_store,
            sources,
            destinations,
            coordination,
            service,
        })
    }

    pub fn service(&self) -> Arc<TaskService> {
        self.service.clone()
    }

    pub fn stall_detector(&self) -> StallDetector {
        StallDetector::new(self.task_store.clone())
    }

    /// 运行已启用的组件直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        let scheduler = if self.config.scheduler.enabled {
            let scheduler = SyncScheduler::new(self.service.clone(), self.config.scheduler.clone());
            scheduler.start().context("启动同步调度器失败")?;
            let scheduled = scheduler
                .schedule_sources(&self.config.sources)
                .await
                .context("注册同步计划失败")?;
            info!("同步调度器已启动，{} 个集合有定时计划", scheduled);
            Some(scheduler)
        } else {
            None
        };

        let executor = if self.config.executor.enabled {
            let executor = TaskExecutor::new(
                self.task_store.clone(),
                self.state_store.clone(),
                self.sources.clone(),
                self.destinations.clone(),
                self.coordination.clone(),
                Arc::new(LogNotifier::new()),
                self.config.executor.clone(),
            );
            handles.extend(executor.start());
            info!("任务执行器已启动，并发上限 {}", self.config.executor.pool_size);
            Some(executor)
        } else {
            None
        };

        if self.config.stall.enabled {
            handles.push(
                self.stall_detector()
                    .start_scanner(&self.config.stall, cancel.clone()),
            );
            info!("停滞任务扫描已启动");
        }

        let _ = shutdown_rx.recv().await;
        info!("开始关闭节点组件");

        if let Some(scheduler) = scheduler {
            scheduler.close().await;
        }
        if let Some(executor) = executor {
            executor.close(EXECUTOR_GRACE_PERIOD).await;
        }
        cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务退出异常: {}", e);
            }
        }
        self.coordination.close().await;

        info!("节点组件已全部关闭");
        Ok(())
    }
}

async fn create_backends(
    config: &AppConfig,
) -> Result<(Arc<dyn TaskStore>, Arc<dyn SyncStateStore>, Arc<dyn LockBackend>)> {
    match config.store.backend {
        StoreBackend::Redis => {
            let connection = RedisConnectionManager::new(&config.store.redis)
                .await
                .context("连接Redis失败")?;
            let store = Arc::new(RedisStore::new(connection.clone()));
            let locks: Arc<dyn LockBackend> = Arc::new(RedisLockBackend::new(connection));
            info!(
                "使用Redis存储: {}:{}",
                config.store.redis.host, config.store.redis.port
            );
            let task_store: Arc<dyn TaskStore> = store.clone();
            let state_store: Arc<dyn SyncStateStore> = store;
            Ok((task_store, state_store, locks))
        }
        StoreBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            let locks: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::new());
            info!("使用内存存储，数据不会跨进程保留");
            let task_store: Arc<dyn TaskStore> = store.clone();
            let state_store: Arc<dyn SyncStateStore> = store;
            Ok((task_store, state_store, locks))
        }
    }
}
