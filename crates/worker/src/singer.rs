//! Singer 协议的外部进程连接器
//!
//! 连接器以子进程运行，上一次的状态通过临时文件 `--state <file>` 传入。
//! stdout 的每一行是一条 JSON 消息（SCHEMA、RECORD、STATE），
//! stderr 作为连接器日志写入任务日志。

use std::collections::HashMap;
use std::io::Write;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use syncer_core::{
    ExternalDriver, ExternalOutput, LogLevel, Record, StreamBatch, SyncError, SyncResult,
    TaskLogger,
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
enum SingerMessage {
    Schema {
        stream: String,
        #[serde(default)]
        key_properties: Vec<String>,
    },
    Record {
        stream: String,
        record: Record,
    },
    State {
        value: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

/// 按出现顺序累积连接器输出的数据流
#[derive(Debug, Default)]
pub struct SingerOutput {
    streams: Vec<StreamBatch>,
    positions: HashMap<String, usize>,
    state: Option<String>,
}

impl SingerOutput {
    fn stream_mut(&mut self, name: &str) -> &mut StreamBatch {
        let position = match self.positions.get(name) {
            Some(position) => *position,
            None => {
                self.streams.push(StreamBatch {
                    name: name.to_string(),
                    ..StreamBatch::default()
                });
                self.positions.insert(name.to_string(), self.streams.len() - 1);
                self.streams.len() - 1
            }
        };
        &mut self.streams[position]
    }

    /// 解析一行输出，空行忽略
    pub fn consume_line(&mut self, line: &str) -> SyncResult<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }
        let message: SingerMessage = serde_json::from_str(line)
            .map_err(|e| SyncError::execution(format!("无法解析连接器输出: {e}: {line}")))?;
        match message {
            SingerMessage::Schema {
                stream,
                key_properties,
            } => self.stream_mut(&stream).key_fields = key_properties,
            SingerMessage::Record { stream, record } => self.stream_mut(&stream).records.push(record),
            SingerMessage::State { value } => self.state = Some(value.to_string()),
            SingerMessage::Other => {}
        }
        Ok(())
    }

    pub fn finish(self) -> ExternalOutput {
        ExternalOutput {
            streams: self.streams,
            state: self.state,
            config_snapshot: None,
        }
    }
}

/// 运行 Singer tap 的连接器
#[derive(Debug, Clone)]
pub struct SingerDriver {
    command: String,
    args: Vec<String>,
}

impl SingerDriver {
    pub fn new(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
        }
    }

    fn write_state(state: &str) -> SyncResult<NamedTempFile> {
        let mut file = NamedTempFile::new()
            .map_err(|e| SyncError::execution(format!("创建状态文件失败: {e}")))?;
        file.write_all(state.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| SyncError::execution(format!("写入状态文件失败: {e}")))?;
        Ok(file)
    }

    fn spawn(&self, state_file: Option<&NamedTempFile>) -> SyncResult<Child> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(file) = state_file {
            cmd.arg("--state").arg(file.path());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.spawn()
            .map_err(|e| SyncError::execution(format!("启动连接器 {} 失败: {e}", self.command)))
    }
}

#[async_trait]
impl ExternalDriver for SingerDriver {
    fn kind(&self) -> &str {
        "singer"
    }

    async fn load(
        &self,
        state: Option<&str>,
        logger: &TaskLogger,
        cancel: CancellationToken,
    ) -> SyncResult<ExternalOutput> {
        let state_file = state.map(Self::write_state).transpose()?;
        let mut child = self.spawn(state_file.as_ref())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SyncError::execution("无法获取连接器stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SyncError::execution("无法获取连接器stderr"))?;

        let stderr_logger = logger.clone();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_logger.connector(LogLevel::Info, line).await;
            }
        });

        let canceled = || SyncError::Canceled {
            task_id: logger.task_id().to_string(),
        };

        let mut output = SingerOutput::default();
        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    stderr_task.abort();
                    return Err(canceled());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Err(e) = output.consume_line(&line) {
                            let _ = child.kill().await;
                            stderr_task.abort();
                            return Err(e);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = child.kill().await;
                        stderr_task.abort();
                        return Err(SyncError::execution(format!("读取连接器输出失败: {e}")));
                    }
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                stderr_task.abort();
                return Err(canceled());
            }
            status = child.wait() => status
                .map_err(|e| SyncError::execution(format!("等待连接器退出失败: {e}")))?,
        };
        let _ = stderr_task.await;

        if !status.success() {
            return Err(SyncError::execution(format!(
                "连接器 {} 异常退出: {}",
                self.command, status
            )));
        }
        debug!(command = %self.command, "连接器运行结束");
        Ok(output.finish())
    }
}
