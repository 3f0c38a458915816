//! 链路会话模型
//!
//! `ChainSession` 只归 ChainDriver 所有；历史记录只追加、不改写。

use std::fmt::{self, Display};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::Instant;
use uuid::Uuid;

use super::answer::Provenance;
use super::question::DataReference;

/// 链路中的处理阶段（失败时记录在终态中）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Render,
    Extract,
    Acquire,
    Derive,
    Submit,
    /// 步数达到上限
    StepLimit,
    /// 后台任务异常退出
    Internal,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Render => "render",
            Stage::Extract => "extract",
            Stage::Acquire => "acquire",
            Stage::Derive => "derive",
            Stage::Submit => "submit",
            Stage::StepLimit => "step_limit",
            Stage::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// 会话状态，终态不可再变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainStatus {
    Idle,
    Running,
    Succeeded,
    Failed { stage: Stage, reason: String },
    TimedOut,
}

impl ChainStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ChainStatus::Succeeded | ChainStatus::Failed { .. } | ChainStatus::TimedOut
        )
    }

    pub fn failed(stage: Stage, reason: impl Into<String>) -> Self {
        ChainStatus::Failed {
            stage,
            reason: reason.into(),
        }
    }
}

impl Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStatus::Idle => write!(f, "idle"),
            ChainStatus::Running => write!(f, "running"),
            ChainStatus::Succeeded => write!(f, "succeeded"),
            ChainStatus::Failed { stage, reason } => write!(f, "failed[{}]: {}", stage, reason),
            ChainStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// 提交结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum StepOutcome {
    /// 答案被接受，进入下一题
    Advance(DataReference),
    /// 整条链完成
    Complete,
    /// 答案被拒绝
    Rejected(String),
}

impl StepOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, StepOutcome::Rejected(_))
    }
}

/// 每一步的记录
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    /// 步骤序号（从 1 开始）
    pub index: usize,
    pub page_url: String,
    pub question: String,
    pub answer: String,
    pub provenance: Provenance,
    pub outcome: StepOutcome,
    /// 记录时距会话开始的毫秒数
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Local>,
}

/// 一次链路求解的会话
#[derive(Debug)]
pub struct ChainSession {
    id: Uuid,
    start_url: String,
    current: String,
    started: Instant,
    deadline: Instant,
    started_at: DateTime<Local>,
    finished_at: Option<DateTime<Local>>,
    history: Vec<StepRecord>,
    status: ChainStatus,
}

impl ChainSession {
    pub fn new(id: Uuid, start_url: impl Into<String>, budget: Duration) -> Self {
        Self::starting_at(id, start_url, Instant::now(), budget)
    }

    /// 预算从请求受理的时刻开始计算，排队等待的时间也计入
    pub fn starting_at(
        id: Uuid,
        start_url: impl Into<String>,
        started: Instant,
        budget: Duration,
    ) -> Self {
        let start_url = start_url.into();
        Self {
            id,
            current: start_url.clone(),
            start_url,
            started,
            deadline: started + budget,
            started_at: Local::now(),
            finished_at: None,
            history: Vec::new(),
            status: ChainStatus::Idle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn start_url(&self) -> &str {
        &self.start_url
    }

    /// 当前引用（任意时刻只有一个）
    pub fn current_url(&self) -> &str {
        &self.current
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn budget(&self) -> Duration {
        self.deadline - self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn history(&self) -> &[StepRecord] {
        &self.history
    }

    pub fn status(&self) -> &ChainStatus {
        &self.status
    }

    /// Idle → Running
    pub fn begin(&mut self) {
        if self.status == ChainStatus::Idle {
            self.status = ChainStatus::Running;
        }
    }

    pub fn advance_to(&mut self, next: impl Into<String>) {
        self.current = next.into();
    }

    /// 追加一条步骤记录，序号与耗时由会话填写
    pub fn record(
        &mut self,
        question: String,
        answer: String,
        provenance: Provenance,
        outcome: StepOutcome,
    ) -> &StepRecord {
        let record = StepRecord {
            index: self.history.len() + 1,
            page_url: self.current.clone(),
            question,
            answer,
            provenance,
            outcome,
            elapsed_ms: self.elapsed().as_millis() as u64,
            recorded_at: Local::now(),
        };
        self.history.push(record);
        &self.history[self.history.len() - 1]
    }

    /// 进入终态；已经是终态时忽略
    pub fn finish(&mut self, status: ChainStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Local::now());
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            start_url: self.start_url.clone(),
            current_url: self.current.clone(),
            status: self.status.clone(),
            steps: self.history.clone(),
            budget_ms: self.budget().as_millis() as u64,
            elapsed_ms: self.elapsed().as_millis() as u64,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// 会话结束后对外可见的快照
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub start_url: String,
    pub current_url: String,
    pub status: ChainStatus,
    pub steps: Vec<StepRecord>,
    pub budget_ms: u64,
    pub elapsed_ms: u64,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

impl SessionSnapshot {
    /// 尚未运行结束的会话
    pub fn pending(id: Uuid, start_url: impl Into<String>) -> Self {
        let start_url = start_url.into();
        Self {
            id,
            current_url: start_url.clone(),
            start_url,
            status: ChainStatus::Running,
            steps: Vec::new(),
            budget_ms: 0,
            elapsed_ms: 0,
            started_at: Local::now(),
            finished_at: None,
        }
    }
}
