use serde::{Deserialize, Serialize};

/// 连接器产出的一条记录
pub type Record = serde_json::Map<String, serde_json::Value>;

/// 写入目标存储时附带的批次信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHeader {
    pub table_name: String,
    pub source_id: String,
    pub collection: String,
}

/// 外部进程连接器一次运行中输出的一个数据流
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamBatch {
    pub name: String,
    /// 连接器声明的目标表名，为空时由数据源前缀和流名推导
    pub table_name: Option<String>,
    /// 用于计算记录唯一ID的主键字段
    pub key_fields: Vec<String>,
    pub records: Vec<Record>,
}

/// 外部进程连接器的运行结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExternalOutput {
    pub streams: Vec<StreamBatch>,
    /// 可恢复的状态，下次运行时原样传回
    pub state: Option<String>,
    /// 连接器更新过的自身配置
    pub config_snapshot: Option<serde_json::Value>,
}
