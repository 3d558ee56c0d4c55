//! 记录富化
//!
//! 写入目标存储前为每条记录补充唯一ID、来源标记和时间戳；
//! 原生增量连接器的记录还会带上集合名和所属区间的边界。

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use syncer_core::{Record, TimeInterval};

pub const EVENT_ID_FIELD: &str = "eventn_ctx_event_id";
pub const SOURCE_MARKER_FIELD: &str = "src";
pub const SOURCE_MARKER: &str = "source";
pub const TIMESTAMP_FIELD: &str = "_timestamp";
pub const COLLECTION_FIELD: &str = "_collection_id";
pub const INTERVAL_FIELD: &str = "_interval";
pub const LOWER_BOUND_FIELD: &str = "_lower_bound";
pub const UPPER_BOUND_FIELD: &str = "_upper_bound";

/// 计算记录的唯一ID
///
/// 声明了主键字段时只对这些字段的值取哈希，否则对整条记录（按字段名排序）取哈希。
pub fn record_id(record: &Record, key_fields: &[String]) -> String {
    let mut hasher = Sha256::new();
    if key_fields.is_empty() {
        let mut entries: Vec<(&String, &Value)> = record.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (key, value) in entries {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b";");
        }
    } else {
        for field in key_fields {
            let value = record.get(field).unwrap_or(&Value::Null);
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"_");
        }
    }
    hex::encode(hasher.finalize())
}

fn timestamp(now: DateTime<Utc>) -> Value {
    Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// 外部进程连接器产出的记录
pub fn enrich_external(mut record: Record, key_fields: &[String], now: DateTime<Utc>) -> Record {
    let id = record_id(&record, key_fields);
    record.insert(EVENT_ID_FIELD.to_string(), Value::String(id));
    record.insert(
        SOURCE_MARKER_FIELD.to_string(),
        Value::String(SOURCE_MARKER.to_string()),
    );
    record.insert(TIMESTAMP_FIELD.to_string(), timestamp(now));
    record
}

/// 原生增量连接器产出的记录
pub fn enrich_native(
    record: Record,
    collection: &str,
    interval: &TimeInterval,
    now: DateTime<Utc>,
) -> Record {
    let mut record = enrich_external(record, &[], now);
    record.insert(
        COLLECTION_FIELD.to_string(),
        Value::String(collection.to_string()),
    );
    record.insert(INTERVAL_FIELD.to_string(), Value::String(interval.key()));
    record.insert(
        LOWER_BOUND_FIELD.to_string(),
        Value::String(interval.lower_bound_string()),
    );
    record.insert(
        UPPER_BOUND_FIELD.to_string(),
        Value::String(interval.upper_bound_string()),
    );
    record
}

/// 数据流的目标表名：连接器声明的优先，否则为数据源前缀加流名
pub fn table_name(prefix: &str, stream_name: &str, declared: Option<&str>) -> String {
    match declared {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => format!("{prefix}{stream_name}"),
    }
}
