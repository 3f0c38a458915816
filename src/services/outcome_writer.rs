//! 结果写入服务 - 业务能力层
//!
//! 只负责"把链路终态追加到结果文件"能力，不关心流程

use anyhow::Result;
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::debug;

use crate::models::SessionSnapshot;

/// 结果写入服务
///
/// 职责：
/// - 每条结束的链路追加一行
/// - 只处理单个会话
pub struct OutcomeWriter {
    file_path: String,
}

impl OutcomeWriter {
    /// 使用默认文件 outcomes.txt
    pub fn new() -> Self {
        Self {
            file_path: "outcomes.txt".to_string(),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            file_path: path.into(),
        }
    }

    /// 格式化一行记录
    pub fn format_line(snapshot: &SessionSnapshot) -> String {
        format!(
            "{} | 会话 {} | {} | 步数 {} | 耗时 {}ms | {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            snapshot.id,
            snapshot.status,
            snapshot.steps.len(),
            snapshot.elapsed_ms,
            snapshot.start_url
        )
    }

    /// 追加写入一条链路结果
    pub async fn write(&self, snapshot: &SessionSnapshot) -> Result<()> {
        debug!("写入链路结果: 会话 {} -> {}", snapshot.id, self.file_path);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        file.write_all(Self::format_line(snapshot).as_bytes())?;

        Ok(())
    }
}

impl Default for OutcomeWriter {
    fn default() -> Self {
        Self::new()
    }
}
