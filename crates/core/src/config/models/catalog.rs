use serde::{Deserialize, Serialize};

/// 数据源配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub post_handle_destinations: Vec<String>,
    /// 目标表名前缀，默认 `<id>_`
    #[serde(default)]
    pub table_name_prefix: Option<String>,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

/// 集合配置，连接器以外部进程（Singer 协议）运行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// cron 表达式或预设（如 `@hourly`），为空表示只能手动触发
    #[serde(default)]
    pub schedule: Option<String>,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    File,
}

/// 目标存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    pub path: String,
}

impl SourceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.id.is_empty() {
            return Err(anyhow::anyhow!("数据源ID不能为空"));
        }
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err(anyhow::anyhow!("数据源 {} 存在空的集合名称", self.id));
            }
            if collection.command.is_empty() {
                return Err(anyhow::anyhow!(
                    "数据源 {} 的集合 {} 未配置连接器命令",
                    self.id,
                    collection.name
                ));
            }
        }
        Ok(())
    }
}
