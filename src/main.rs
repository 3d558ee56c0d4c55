use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use syncer::app::Application;
use syncer::shutdown::{wait_for_signal, ShutdownManager};
use syncer_core::{AppConfig, Priority, TaskFilter, TaskStatus};
use syncer_infrastructure::{init_logging, install_metrics_exporter};
use tracing::{error, info, warn};

/// 节点关闭的最长等待时间，需大于执行器的宽限期
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Parser, Debug)]
#[command(name = "syncer")]
#[command(version = "1.0.0")]
#[command(about = "分布式数据源同步调度器")]
struct Cli {
    /// 配置文件路径，缺省时按默认路径查找
    #[arg(short, long)]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: Option<String>,

    /// 日志格式，覆盖配置文件
    #[arg(long, value_parser = ["json", "pretty"])]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 运行节点（调度器、执行器、停滞扫描按配置启用）
    Run,
    /// 为集合创建一次同步任务
    Sync {
        source: String,
        collection: String,
        /// LOW、HIGH 或 NOW
        #[arg(short, long, default_value = "HIGH")]
        priority: Priority,
    },
    /// 取消任务
    Cancel { task_id: String },
    /// 查询任务
    Tasks {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        collection: Option<String>,
        /// SCHEDULED、RUNNING、SUCCESS、FAILED 或 CANCELED
        #[arg(long)]
        status: Option<TaskStatus>,
        /// RFC3339 时间，按创建时间过滤
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// 查看任务日志
    Logs {
        task_id: String,
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        #[arg(long)]
        end: Option<DateTime<Utc>>,
    },
    /// 列出停滞的任务
    Stalled {
        #[arg(long, default_value_t = 600)]
        threshold_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format)?;

    let metrics_address = config.observability.metrics_listen_address.clone();
    let app = Application::new(config).await?;

    run_command(app, cli.command, metrics_address).await
}

async fn run_node(app: Application, metrics_address: Option<String>) -> Result<()> {
    info!("启动分布式数据源同步调度器");

    if let Some(address) = &metrics_address {
        install_metrics_exporter(address)?;
    }

    let app = Arc::new(app);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式数据源同步调度器已退出");
    Ok(())
}

async fn run_command(
    app: Application,
    command: Commands,
    metrics_address: Option<String>,
) -> Result<()> {
    let service = app.service();

    match command {
        Commands::Run => run_node(app, metrics_address).await,
        Commands::Sync {
            source,
            collection,
            priority,
        } => {
            let task_id = service.sync(&source, &collection, priority).await?;
            print_json(&serde_json::json!({ "task_id": task_id }))
        }
        Commands::Cancel { task_id } => print_json(&service.cancel(&task_id).await?),
        Commands::Tasks {
            source,
            collection,
            status,
            start,
            end,
            limit,
        } => {
            let filter = TaskFilter {
                source,
                collection,
                status,
                start,
                end,
                limit,
            };
            print_json(&service.list_tasks(&filter).await?)
        }
        Commands::Logs {
            task_id,
            start,
            end,
        } => print_json(&service.task_logs(&task_id, start, end).await?),
        Commands::Stalled { threshold_seconds } => {
            let stalled = app
                .stall_detector()
                .find_stalled(
                    TaskStatus::Running,
                    TaskStatus::Scheduled,
                    chrono::Duration::seconds(threshold_seconds),
                )
                .await?;
            print_json(&stalled)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
