use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use super::{
    catalog::{DestinationConfig, SourceConfig},
    observability::ObservabilityConfig,
    scheduling::{CoordinationConfig, ExecutorConfig, SchedulerConfig, StallConfig},
    store::StoreConfig,
};

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub coordination: CoordinationConfig,
    pub executor: ExecutorConfig,
    pub scheduler: SchedulerConfig,
    pub stall: StallConfig,
    pub observability: ObservabilityConfig,
    pub destinations: Vec<DestinationConfig>,
    pub sources: Vec<SourceConfig>,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认配置
    /// 2. 配置文件（TOML格式），未指定时依次尝试默认路径
    /// 3. 环境变量覆盖（例如 `SYNCER__EXECUTOR__POOL_SIZE=4`）
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else {
            let default_paths = ["config/syncer.toml", "syncer.toml", "/etc/syncer/config.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("SYNCER")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("解析配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// 从TOML字符串加载配置
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.redis.validate()?;
        self.coordination.validate()?;
        self.executor.validate()?;
        self.stall.validate()?;
        self.observability.validate()?;

        let mut destination_ids = HashSet::new();
        for destination in &self.destinations {
            if !destination_ids.insert(destination.id.as_str()) {
                return Err(anyhow::anyhow!("重复的目标存储ID: {}", destination.id));
            }
        }

        let mut source_ids = HashSet::new();
        for source in &self.sources {
            source.validate()?;
            if !source_ids.insert(source.id.as_str()) {
                return Err(anyhow::anyhow!("重复的数据源ID: {}", source.id));
            }
            for destination_id in &source.destinations {
                if !destination_ids.contains(destination_id.as_str()) {
                    return Err(anyhow::anyhow!(
                        "数据源 {} 引用了未配置的目标存储: {}",
                        source.id,
                        destination_id
                    ));
                }
            }
        }

        Ok(())
    }
}
