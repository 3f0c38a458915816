//! 单步处理流程 - 流程层
//!
//! 核心职责：定义"一道题"的完整处理流程
//!
//! 流程顺序：
//! 1. 提取题目
//! 2. 逐个获取数据引用（失败只记为占位载荷，不中断）
//! 3. 推导答案
//! 4. 提交答案

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ChainSettings;
use crate::infrastructure::RenderedPage;
use crate::models::{Answer, ChainStatus, Payload, Question, Stage, StepOutcome};
use crate::services::{AnswerDeriver, ContentExtractor, DataSource, Submitter};
use crate::workflow::step_ctx::StepCtx;

/// 一步成功走完（拿到提交结果）时的报告
#[derive(Debug, Clone)]
pub struct StepReport {
    pub question: Question,
    pub payloads: Vec<Payload>,
    pub answer: Answer,
    pub outcome: StepOutcome,
}

/// 某个阶段失败，链路应当结束
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
    /// 失败是否由链路截止时间导致
    pub deadline_exceeded: bool,
}

impl StageFailure {
    pub fn new(stage: Stage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            deadline_exceeded: false,
        }
    }

    /// 阶段超时：截止时间已过则视为链路超时，否则是该阶段失败
    pub fn timed_out(stage: Stage, ctx: &StepCtx, limit: Duration) -> Self {
        Self {
            stage,
            reason: format!("{} 阶段超时 ({}ms)", stage, limit.as_millis()),
            deadline_exceeded: ctx.is_expired(),
        }
    }

    /// 阶段返回错误；如果此时截止时间已过，同样视为链路超时
    pub fn during(stage: Stage, ctx: &StepCtx, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
            deadline_exceeded: ctx.is_expired(),
        }
    }

    /// 转换为会话终态
    pub fn into_status(self) -> ChainStatus {
        if self.deadline_exceeded {
            ChainStatus::TimedOut
        } else {
            ChainStatus::failed(self.stage, self.reason)
        }
    }
}

impl Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.stage, self.reason)
    }
}

/// 单步处理流程
///
/// - 编排一道题的提取 → 获取 → 推导 → 提交
/// - 不持有任何资源（标签页由调用方管理）
/// - 只依赖业务能力（services）
pub struct StepFlow {
    extractor: ContentExtractor,
    source: Arc<dyn DataSource>,
    deriver: AnswerDeriver,
    submitter: Arc<dyn Submitter>,
    settings: ChainSettings,
}

impl StepFlow {
    pub fn new(
        source: Arc<dyn DataSource>,
        deriver: AnswerDeriver,
        submitter: Arc<dyn Submitter>,
        settings: ChainSettings,
    ) -> Self {
        Self {
            extractor: ContentExtractor::new(),
            source,
            deriver,
            submitter,
            settings,
        }
    }

    pub fn settings(&self) -> &ChainSettings {
        &self.settings
    }

    pub async fn run(&self, ctx: &StepCtx, page: &RenderedPage) -> Result<StepReport, StageFailure> {
        // ========== 1. 提取 ==========
        let question = self
            .extractor
            .extract(page)
            .map_err(|e| StageFailure::new(Stage::Extract, e.to_string()))?;

        info!(
            "{} 📄 题目: {} (形态: {}, 数据: {} 项)",
            ctx,
            question.summary(),
            question.shape.label(),
            question.references.len()
        );

        // ========== 2. 获取数据 ==========
        let payloads = self.acquire_all(ctx, &question).await;

        // ========== 3. 推导 ==========
        let limit = ctx.stage_timeout(self.settings.derive_timeout);
        let answer = match timeout(limit, self.deriver.derive(&question, &payloads, limit)).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(StageFailure::during(Stage::Derive, ctx, e.to_string())),
            Err(_) => return Err(StageFailure::timed_out(Stage::Derive, ctx, limit)),
        };
        info!("{} 💡 答案: {} ({:?})", ctx, answer.summary(), answer.provenance);

        // ========== 4. 提交 ==========
        let outcome = self.submit(ctx, &question, &answer).await?;

        Ok(StepReport {
            question,
            payloads,
            answer,
            outcome,
        })
    }

    /// 答案被拒后带着原因重新推导并重新提交同一题
    pub async fn retry_rejected(
        &self,
        ctx: &StepCtx,
        report: &StepReport,
        reason: &str,
    ) -> Result<(Answer, StepOutcome), StageFailure> {
        info!("{} 🔁 答案被拒，带反馈重新推导: {}", ctx, reason);

        let limit = ctx.stage_timeout(self.settings.derive_timeout);
        let derive = self
            .deriver
            .derive_with_feedback(&report.question, &report.payloads, &report.answer, reason, limit);
        let answer = match timeout(limit, derive).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => return Err(StageFailure::during(Stage::Derive, ctx, e.to_string())),
            Err(_) => return Err(StageFailure::timed_out(Stage::Derive, ctx, limit)),
        };
        info!("{} 💡 新答案: {}", ctx, answer.summary());

        let outcome = self.submit(ctx, &report.question, &answer).await?;
        Ok((answer, outcome))
    }

    async fn submit(
        &self,
        ctx: &StepCtx,
        question: &Question,
        answer: &Answer,
    ) -> Result<StepOutcome, StageFailure> {
        info!("{} 📤 提交到 {}", ctx, question.submission_target.url);

        let limit = ctx.stage_timeout(self.settings.submit_timeout);
        match timeout(limit, self.submitter.submit(question, answer)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(StageFailure::during(Stage::Submit, ctx, e.to_string())),
            Err(_) => Err(StageFailure::timed_out(Stage::Submit, ctx, limit)),
        }
    }

    /// 各个引用独立获取，失败的以占位载荷代替
    async fn acquire_all(&self, ctx: &StepCtx, question: &Question) -> Vec<Payload> {
        let limit = ctx.stage_timeout(self.settings.acquire_timeout);
        let tasks = question.references.iter().map(|reference| async move {
            match timeout(limit, self.source.acquire(reference)).await {
                Ok(Ok(payload)) => {
                    debug!("{} ✓ 已获取 {}", ctx, reference.describe());
                    payload
                }
                Ok(Err(e)) => {
                    warn!("{} ⚠️ 获取数据失败，继续处理: {}", ctx, e);
                    Payload::placeholder(reference.clone(), e)
                }
                Err(_) => {
                    warn!("{} ⚠️ 获取数据超时: {}", ctx, reference.describe());
                    Payload::placeholder(reference.clone(), format!("超时 ({}ms)", limit.as_millis()))
                }
            }
        });
        join_all(tasks).await
    }
}
