//! 单步处理上下文
//!
//! 封装"我正在处理哪条链路的第几题、还剩多少时间"这一信息

use std::fmt::Display;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

/// 单步处理上下文
#[derive(Debug, Clone)]
pub struct StepCtx {
    /// 会话 ID
    pub session_id: Uuid,

    /// 步骤序号（从 1 开始）
    pub step_index: usize,

    /// 当前题目地址
    pub url: String,

    /// 整条链路的截止时间
    pub deadline: Instant,
}

impl StepCtx {
    pub fn new(session_id: Uuid, step_index: usize, url: impl Into<String>, deadline: Instant) -> Self {
        Self {
            session_id,
            step_index,
            url: url.into(),
            deadline,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// 单个阶段可用的时长：min(阶段上限, 剩余预算)
    pub fn stage_timeout(&self, cap: Duration) -> Duration {
        cap.min(self.remaining())
    }
}

impl Display for StepCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id = self.session_id.simple().to_string();
        write!(f, "[链路 {} 第{}题]", &id[..8], self.step_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stage_timeout_is_capped_by_remaining_budget() {
        let ctx = StepCtx::new(Uuid::new_v4(), 1, "https://quiz.test", Instant::now() + Duration::from_secs(5));
        assert_eq!(ctx.stage_timeout(Duration::from_secs(30)), Duration::from_secs(5));
        assert_eq!(ctx.stage_timeout(Duration::from_secs(2)), Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.stage_timeout(Duration::from_secs(2)), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_display_tag() {
        let ctx = StepCtx::new(Uuid::nil(), 3, "https://quiz.test", Instant::now());
        assert_eq!(ctx.to_string(), "[链路 00000000 第3题]");
    }
}
