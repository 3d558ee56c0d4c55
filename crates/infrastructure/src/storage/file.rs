use std::path::{Path, PathBuf};

use async_trait::async_trait;
use syncer_core::{BatchHeader, Record, Storage, SyncError, SyncResult};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// 本地文件目标存储
///
/// 每张表对应 `<dir>/<table>.ndjson`，每条记录一行 JSON，追加写入。
/// 带区间标签的批次会在记录中附加 `_interval_tag` 字段。
#[derive(Debug)]
pub struct FileStorage {
    id: String,
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(id: &str, dir: impl Into<PathBuf>) -> Self {
        Self {
            id: id.to_string(),
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn table_path(&self, table_name: &str) -> PathBuf {
        let file_name: String = table_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.ndjson"))
    }

    fn destination_error(&self, message: impl std::fmt::Display) -> SyncError {
        SyncError::Destination {
            id: self.id.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write(
        &self,
        header: &BatchHeader,
        records: &[Record],
        interval_tag: Option<&str>,
    ) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buffer = String::new();
        for record in records {
            let line = match interval_tag {
                Some(tag) => {
                    let mut tagged = record.clone();
                    tagged.insert("_interval_tag".to_string(), tag.into());
                    serde_json::to_string(&tagged)?
                }
                None => serde_json::to_string(record)?,
            };
            buffer.push_str(&line);
            buffer.push('\n');
        }

        let path = self.table_path(&header.table_name);
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.destination_error(e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| self.destination_error(e))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| self.destination_error(e))?;
        file.flush().await.map_err(|e| self.destination_error(e))?;

        debug!(
            destination = %self.id,
            table = %header.table_name,
            "写入 {} 条记录",
            records.len()
        );
        Ok(())
    }
}
