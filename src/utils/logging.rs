/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::{ChainStatus, SessionSnapshot};

/// 初始化 tracing 日志
///
/// 优先使用 `RUST_LOG`，否则按 `verbose` 选择 debug / info
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 链式答题服务");
    info!("🌐 监听地址: {}:{}", config.host, config.port);
    info!("⏱️ 单链预算: {} 秒, 最多 {} 题", config.chain_budget_secs, config.max_steps);
    info!("📊 最大并发链路数: {}", config.max_concurrent_sessions);
    info!("{}", "=".repeat(60));
}

/// 记录链路开始信息
pub fn log_chain_start(tag: &str, start_url: &str, budget_secs: u64) {
    info!("\n{} {}", tag, "─".repeat(30));
    info!("{} 🔗 开始求解链路: {}", tag, start_url);
    info!("{} ⏱️ 时间预算: {} 秒", tag, budget_secs);
}

/// 记录链路结束信息
pub fn log_chain_complete(tag: &str, snapshot: &SessionSnapshot) {
    let elapsed = snapshot.elapsed_ms as f64 / 1000.0;
    match &snapshot.status {
        ChainStatus::Succeeded => {
            info!("{} ✅ 链路完成: {} 题, 用时 {:.1} 秒", tag, snapshot.steps.len(), elapsed)
        }
        ChainStatus::TimedOut => {
            warn!("{} ⏰ 链路超时: 已完成 {} 题, 用时 {:.1} 秒", tag, snapshot.steps.len(), elapsed)
        }
        other => warn!("{} ❌ 链路结束: {} (已记录 {} 题, 用时 {:.1} 秒)", tag, other, snapshot.steps.len(), elapsed),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_respects_char_boundaries() {
        assert_eq!(truncate_text("你好世界", 2), "你好...");
        assert_eq!(truncate_text("short", 10), "short");
    }
}
