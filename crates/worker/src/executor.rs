//! 同步任务执行器
//!
//! 观察循环按固定间隔从优先级队列取出任务并提交到有界执行池，
//! 监控循环定期报告执行池占用。每个任务在执行锁保护下运行连接器，
//! 把富化后的记录写入所有可用的目标存储，最终以终态结束。

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use syncer_core::config::ExecutorConfig;
use syncer_core::{
    BatchHeader, CollectionDriver, DestinationCatalog, ExternalDriver, Granularity, NativeDriver,
    Record, SourceCatalog, SourceUnit, Storage, SyncError, SyncNotifier, SyncResult,
    SyncStateStore, Task, TaskLogger, TaskStatus, TaskStore,
};
use syncer_infrastructure::{
    supervise, CoordinationService, RestartPolicy, StructuredLogger, SyncMetrics,
};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::closer::{duration_seconds, TaskCloser};
use crate::enrichment::{enrich_external, enrich_native, table_name};
use crate::heartbeat::TaskHeartbeat;

/// 区间与已保存签名比较后的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalState {
    New,
    Refresh,
    UpToDate,
}

impl IntervalState {
    pub fn classify(stored: Option<&str>, fresh: &str) -> Self {
        match stored {
            None => IntervalState::New,
            Some(signature) if signature == fresh => IntervalState::UpToDate,
            Some(_) => IntervalState::Refresh,
        }
    }
}

impl fmt::Display for IntervalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntervalState::New => "NEW",
            IntervalState::Refresh => "REFRESH",
            IntervalState::UpToDate => "UP-TO-DATE",
        };
        f.write_str(s)
    }
}

struct ExecutorInner {
    task_store: Arc<dyn TaskStore>,
    state_store: Arc<dyn SyncStateStore>,
    sources: Arc<dyn SourceCatalog>,
    destinations: Arc<dyn DestinationCatalog>,
    coordination: CoordinationService,
    notifier: Arc<dyn SyncNotifier>,
    closer: TaskCloser,
    metrics: SyncMetrics,
    config: ExecutorConfig,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
}

/// 任务执行器
#[derive(Clone)]
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl TaskExecutor {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        state_store: Arc<dyn SyncStateStore>,
        sources: Arc<dyn SourceCatalog>,
        destinations: Arc<dyn DestinationCatalog>,
        coordination: CoordinationService,
        notifier: Arc<dyn SyncNotifier>,
        config: ExecutorConfig,
    ) -> Self {
        let metrics = SyncMetrics::new();
        Self {
            inner: Arc::new(ExecutorInner {
                closer: TaskCloser::new(task_store.clone(), metrics.clone()),
                task_store,
                state_store,
                sources,
                destinations,
                coordination,
                notifier,
                metrics,
                pool: Arc::new(Semaphore::new(config.pool_size)),
                config,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 执行中的任务数
    pub fn running(&self) -> usize {
        self.inner.config.pool_size - self.inner.pool.available_permits()
    }

    /// 执行池剩余容量
    pub fn free_capacity(&self) -> usize {
        self.inner.pool.available_permits()
    }

    /// 启动观察循环和监控循环
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        info!(
            pool_size = self.inner.config.pool_size,
            poll_interval_ms = self.inner.config.poll_interval_ms,
            "启动任务执行器"
        );
        vec![self.start_observer(), self.start_monitor()]
    }

    fn start_observer(&self) -> JoinHandle<()> {
        let executor = self.clone();
        let tick = Duration::from_millis(self.inner.config.poll_interval_ms);
        supervise(
            "task_observer",
            self.inner.cancel.clone(),
            RestartPolicy::default(),
            move |token| {
                let executor = executor.clone();
                async move {
                    let mut ticker = tokio::time::interval(tick);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = ticker.tick() => {}
                        }
                        if let Err(e) = executor.poll_once().await {
                            StructuredLogger::log_system_error("task_observer", "poll", &e);
                        }
                    }
                }
            },
        )
    }

    fn start_monitor(&self) -> JoinHandle<()> {
        let executor = self.clone();
        let tick = Duration::from_secs(self.inner.config.monitor_interval_seconds);
        supervise(
            "pool_monitor",
            self.inner.cancel.clone(),
            RestartPolicy::default(),
            move |token| {
                let executor = executor.clone();
                async move {
                    let mut ticker = tokio::time::interval(tick);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = ticker.tick() => {}
                        }
                        executor.report_pool().await;
                    }
                }
            },
        )
    }

    async fn report_pool(&self) {
        let running = self.running();
        let free = self.free_capacity();
        self.inner.metrics.update_pool(running, free);
        match self.inner.task_store.queue_len().await {
            Ok(depth) => {
                self.inner.metrics.update_queue_depth(depth);
                info!(running, free, queue_depth = depth, "执行池状态");
            }
            Err(e) => {
                info!(running, free, "执行池状态");
                StructuredLogger::log_system_error("pool_monitor", "queue_len", &e);
            }
        }
    }

    /// 执行池有空闲时从队列取出一个任务并提交，否则什么也不做
    pub async fn poll_once(&self) -> SyncResult<Option<JoinHandle<()>>> {
        let permit = match self.inner.pool.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!("执行池已满，跳过本次轮询");
                return Ok(None);
            }
        };
        let Some(task) = self.inner.task_store.poll_task().await? else {
            return Ok(None);
        };

        debug!(task.id = %task.id, "从队列取出任务");
        let executor = self.clone();
        Ok(Some(tokio::spawn(async move {
            executor.execute(task).await;
            drop(permit);
        })))
    }

    /// 执行单个任务直到结束
    ///
    /// 执行过程中的 panic 不会越过执行池边界，任务以 FAILED 结束。
    pub async fn execute(&self, task: Task) {
        let task_id = task.id.clone();
        let fallback = task.clone();
        let executor = self.clone();

        let result = tokio::spawn(async move { executor.run_task(task).await }).await;
        let Err(e) = result else {
            return;
        };
        if !e.is_panic() {
            warn!(task.id = %task_id, "任务执行被中止: {}", e);
            return;
        }

        error!(task.id = %task_id, "任务执行发生panic");
        let store = &self.inner.task_store;
        let logger = TaskLogger::new(&task_id, store.clone());
        let mut task = match store.get_task(&task_id).await {
            Ok(Some(persisted)) => persisted,
            _ => fallback,
        };
        self.fail(&mut task, "任务执行发生panic", &logger).await;
        if let Err(e) = store.clear_heartbeat(&task_id).await {
            warn!(task.id = %task_id, "清除任务心跳失败: {}", e);
        }
    }

    async fn run_task(&self, mut task: Task) {
        let inner = &self.inner;
        if task.status != TaskStatus::Scheduled {
            debug!(task.id = %task.id, task.status = %task.status, "任务不处于待调度状态，跳过");
            return;
        }

        let logger = TaskLogger::new(&task.id, inner.task_store.clone());
        if let Err(e) = task.transition(TaskStatus::Running, Utc::now()) {
            warn!(task.id = %task.id, "无法开始任务: {}", e);
            return;
        }
        match inner.task_store.transition_task(&task).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task.id = %task.id, "任务状态已被其他操作改变，跳过");
                return;
            }
            Err(e) => {
                StructuredLogger::log_system_error("task_executor", "persist_running", &e);
                self.fail(&mut task, &format!("保存任务运行状态失败: {e}"), &logger)
                    .await;
                return;
            }
        }
        StructuredLogger::log_task_started(&task.id, &task.source, &task.collection);
        logger
            .info(format!("开始同步 {}.{}", task.source, task.collection))
            .await;

        let cancel = CancellationToken::new();
        let heartbeat = TaskHeartbeat::start(
            inner.task_store.clone(),
            &task.id,
            Duration::from_secs(inner.config.heartbeat_interval_seconds),
            cancel.clone(),
        );

        let mut lock = inner
            .coordination
            .create_lock(&task.lock_name())
            .cancel_on_loss(cancel.clone());
        let lock_timeout = Duration::from_secs(inner.config.lock_timeout_seconds);
        let result = match lock.try_acquire(lock_timeout).await {
            Ok(true) => {
                let result = match self.sync(&task, &logger, &cancel).await {
                    Err(SyncError::Canceled { .. }) if lock.is_lost() => Err(SyncError::lock(
                        format!("执行锁 {} 已被其他节点持有", lock.name()),
                    )),
                    result => result,
                };
                lock.release().await;
                result
            }
            Ok(false) => Err(SyncError::lock(format!(
                "获取执行锁 {} 超时",
                lock.name()
            ))),
            Err(e) => Err(e),
        };
        heartbeat.stop().await;

        self.finish(task, result, &logger).await;
    }

    async fn finish(&self, mut task: Task, result: SyncResult<()>, logger: &TaskLogger) {
        let inner = &self.inner;
        match result {
            Ok(()) => {
                let mut finished = task.clone();
                if let Err(e) = finished.transition(TaskStatus::Success, Utc::now()) {
                    self.fail(&mut task, &e.to_string(), logger).await;
                    return;
                }
                match inner.task_store.transition_task(&finished).await {
                    Ok(true) => {}
                    Ok(false) => {
                        logger.warn("任务在完成前已被取消").await;
                        return;
                    }
                    Err(e) => {
                        StructuredLogger::log_system_error("task_executor", "persist_result", &e);
                        self.fail(&mut task, &format!("保存任务结果失败: {e}"), logger)
                            .await;
                        return;
                    }
                }
                logger.info("同步成功").await;
                StructuredLogger::log_task_finished(
                    &finished.id,
                    finished.status.as_str(),
                    finished.started_at,
                    None,
                );
                inner.metrics.record_task_finished(
                    &finished.source,
                    finished.status.as_str(),
                    duration_seconds(&finished),
                );
                self.notify_post_handle(&finished, logger).await;
            }
            Err(SyncError::Canceled { .. }) => {
                logger.warn("任务已被取消，停止同步").await;
                info!(task.id = %task.id, event = "task_canceled", "同步任务已取消");
            }
            Err(e) => {
                if e.is_system() {
                    StructuredLogger::log_system_error("task_executor", "execute", &e);
                }
                self.fail(&mut task, &e.to_string(), logger).await;
            }
        }
    }

    async fn fail(&self, task: &mut Task, message: &str, logger: &TaskLogger) {
        if let Err(e) = self
            .inner
            .closer
            .close(task, TaskStatus::Failed, Some(message), logger)
            .await
        {
            StructuredLogger::log_system_error("task_closer", "close", &e);
        }
    }

    async fn notify_post_handle(&self, task: &Task, logger: &TaskLogger) {
        let Some(source) = self.inner.sources.get_source(&task.source) else {
            return;
        };
        if source.post_handle_destinations.is_empty() {
            return;
        }
        if let Err(e) = self
            .inner
            .notifier
            .notify(task, TaskStatus::Success, &source.post_handle_destinations)
            .await
        {
            logger.warn(format!("发送同步结果通知失败: {e}")).await;
        }
    }

    async fn sync(
        &self,
        task: &Task,
        logger: &TaskLogger,
        cancel: &CancellationToken,
    ) -> SyncResult<()> {
        let inner = &self.inner;
        let source = inner
            .sources
            .get_source(&task.source)
            .ok_or_else(|| SyncError::SourceNotFound {
                id: task.source.clone(),
            })?;
        let driver = source.driver(&task.collection).cloned().ok_or_else(|| {
            SyncError::CollectionNotFound {
                source_id: task.source.clone(),
                collection: task.collection.clone(),
            }
        })?;

        let storages = self.ready_storages(&source, logger).await;
        if storages.is_empty() {
            return Err(SyncError::execution("任务已跳过: 没有可用的目标存储"));
        }

        let run = SyncRun {
            inner,
            task,
            source: &source,
            storages,
            logger,
            cancel,
        };
        match driver {
            CollectionDriver::External(driver) => run.external(driver.as_ref()).await,
            CollectionDriver::Native(driver) => run.native(driver.as_ref()).await,
        }
    }

    async fn ready_storages(
        &self,
        source: &SourceUnit,
        logger: &TaskLogger,
    ) -> Vec<Arc<dyn Storage>> {
        let mut ready = Vec::new();
        for id in &source.destination_ids {
            match self.inner.destinations.get_ready_storage(id) {
                Some((storage, true)) => ready.push(storage),
                Some((_, false)) => {
                    logger.warn(format!("目标存储 {id} 尚未初始化，已跳过")).await;
                    self.inner.metrics.record_skip(&source.id, id);
                }
                None => {
                    logger.warn(format!("目标存储 {id} 未注册，已跳过")).await;
                    self.inner.metrics.record_skip(&source.id, id);
                }
            }
        }
        ready
    }

    /// 停止观察和监控循环，并在宽限期内等待执行中的任务结束
    pub async fn close(&self, grace: Duration) {
        self.inner.cancel.cancel();
        let pool_size = self.inner.config.pool_size as u32;
        match tokio::time::timeout(grace, self.inner.pool.acquire_many(pool_size)).await {
            Ok(_) => info!("任务执行器已停止"),
            Err(_) => warn!(running = self.running(), "等待执行中的任务超时"),
        }
    }
}

/// 单次同步的执行上下文
struct SyncRun<'a> {
    inner: &'a ExecutorInner,
    task: &'a Task,
    source: &'a SourceUnit,
    storages: Vec<Arc<dyn Storage>>,
    logger: &'a TaskLogger,
    cancel: &'a CancellationToken,
}

impl SyncRun<'_> {
    async fn external(&self, driver: &dyn ExternalDriver) -> SyncResult<()> {
        let state_key = Granularity::All.as_str();
        let state = self
            .inner
            .state_store
            .get_signature(&self.source.id, &self.task.collection, state_key)
            .await?;

        self.logger
            .info(format!("启动连接器 {}", driver.kind()))
            .await;
        let output = driver
            .load(state.as_deref(), self.logger, self.cancel.clone())
            .await?;

        let now = Utc::now();
        let mut total = 0;
        for stream in output.streams {
            self.ensure_active().await?;
            let table = table_name(
                &self.source.table_name_prefix,
                &stream.name,
                stream.table_name.as_deref(),
            );
            let records: Vec<Record> = stream
                .records
                .into_iter()
                .map(|record| enrich_external(record, &stream.key_fields, now))
                .collect();
            total += records.len();
            self.write(&table, &records, None).await?;
        }

        if let Some(state) = output.state {
            self.inner
                .state_store
                .save_signature(&self.source.id, &self.task.collection, state_key, &state)
                .await?;
        }
        if let Some(config) = output.config_snapshot {
            self.inner
                .state_store
                .save_config_snapshot(&self.source.id, &config)
                .await?;
        }

        self.logger
            .info(format!("同步完成，共写入 {total} 条记录"))
            .await;
        Ok(())
    }

    async fn native(&self, driver: &dyn NativeDriver) -> SyncResult<()> {
        let intervals = driver.available_intervals().await?;
        let refresh_window = driver.refresh_window();
        let table = format!("{}{}", self.source.table_name_prefix, self.task.collection);

        let mut synced = 0;
        let mut up_to_date = 0;
        let mut total = 0;
        for interval in intervals {
            self.ensure_active().await?;
            let key = interval.key();
            let now = Utc::now();
            let stored = self
                .inner
                .state_store
                .get_signature(&self.source.id, &self.task.collection, &key)
                .await?;
            let signature = interval.calculate_signature_from(now, refresh_window);

            let state = IntervalState::classify(stored.as_deref(), &signature);
            if state == IntervalState::UpToDate {
                debug!(task.id = %self.task.id, interval = %key, "区间已是最新");
                up_to_date += 1;
                continue;
            }

            self.logger
                .info(format!("区间 {key} 状态 {state}，开始拉取"))
                .await;
            let records: Vec<Record> = driver
                .objects_for(&interval)
                .await?
                .into_iter()
                .map(|record| enrich_native(record, &self.task.collection, &interval, now))
                .collect();
            total += records.len();
            self.write(&table, &records, Some(&key)).await?;
            self.inner
                .state_store
                .save_signature(&self.source.id, &self.task.collection, &key, &signature)
                .await?;
            synced += 1;
        }

        self.logger
            .info(format!(
                "同步完成: {synced} 个区间已拉取，{up_to_date} 个区间已是最新，共写入 {total} 条记录"
            ))
            .await;
        Ok(())
    }

    async fn write(&self, table: &str, records: &[Record], interval_tag: Option<&str>) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let header = BatchHeader {
            table_name: table.to_string(),
            source_id: self.source.id.clone(),
            collection: self.task.collection.clone(),
        };

        for storage in &self.storages {
            self.ensure_active().await?;
            match storage.write(&header, records, interval_tag).await {
                Ok(()) => {
                    self.inner
                        .metrics
                        .record_success(&self.source.id, storage.id(), records.len());
                    self.logger
                        .info(format!(
                            "已写入 {} 条记录到 {}.{}",
                            records.len(),
                            storage.id(),
                            table
                        ))
                        .await;
                }
                Err(e) => {
                    self.inner.metrics.record_error(&self.source.id, storage.id());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// 任务被外部取消时触发取消令牌并返回 `Canceled`
    async fn ensure_active(&self) -> SyncResult<()> {
        let canceled = self.cancel.is_cancelled()
            || matches!(
                self.inner.task_store.get_task(&self.task.id).await?,
                Some(task) if task.status == TaskStatus::Canceled
            );
        if canceled {
            self.cancel.cancel();
            return Err(SyncError::Canceled {
                task_id: self.task.id.clone(),
            });
        }
        Ok(())
    }
}
