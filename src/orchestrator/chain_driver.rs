//! 链路驱动器 - 编排层
//!
//! ## 职责
//!
//! 驱动一条题目链从第一题走到终态，是唯一跨步骤持有状态的组件。
//!
//! ## 状态机
//!
//! ```text
//! Idle → Running → { Succeeded | Failed{stage, reason} | TimedOut }
//! ```
//!
//! 每一步开始前：
//! 1. 剩余时间不足 `step_reserve` → TimedOut
//! 2. 记录数已达 `max_steps` → Failed(step_limit)
//!
//! 然后渲染（失败重试一次）→ 交给 `StepFlow` → 按提交结果跳转 / 完成 / 失败。
//!
//! 标签页在所有退出路径上都会关闭，包括某个阶段 panic。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::ChainSettings;
use crate::infrastructure::{RenderSession, RenderedPage, Renderer};
use crate::models::{ChainSession, ChainStatus, SessionSnapshot, Stage, StepOutcome};
use crate::utils::logging::{log_chain_complete, log_chain_start};
use crate::workflow::{StageFailure, StepCtx, StepFlow, StepReport};

/// 渲染尝试次数（首次 + 重试一次）
const RENDER_ATTEMPTS: usize = 2;

/// 链路驱动器
///
/// - 持有渲染器（每条链路打开自己的标签页）
/// - 持有单步流程（能力均通过 trait 注入）
/// - 只有链路的预算与终止逻辑，不做具体业务判断
pub struct ChainDriver {
    renderer: Arc<dyn Renderer>,
    flow: StepFlow,
}

impl ChainDriver {
    pub fn new(renderer: Arc<dyn Renderer>, flow: StepFlow) -> Self {
        Self { renderer, flow }
    }

    pub fn settings(&self) -> &ChainSettings {
        self.flow.settings()
    }

    /// 运行一条链路直到终态，预算从现在开始计算
    pub async fn run(&self, id: Uuid, start_url: &str) -> SessionSnapshot {
        self.run_since(id, start_url, Instant::now()).await
    }

    /// 运行一条链路直到终态，预算从 `accepted`（请求受理时刻）开始计算
    pub async fn run_since(&self, id: Uuid, start_url: &str, accepted: Instant) -> SessionSnapshot {
        let settings = self.settings().clone();
        let mut session = ChainSession::starting_at(id, start_url, accepted, settings.budget);
        let tag = session_tag(id);

        session.begin();
        log_chain_start(&tag, start_url, settings.budget.as_secs());

        if session.remaining() < settings.step_reserve {
            info!("{} ⏰ 排队期间预算已耗尽，不再打开页面", tag);
            session.finish(ChainStatus::TimedOut);
        } else {
            let open_limit = settings.render_timeout.min(session.remaining());
            match timeout(open_limit, self.renderer.open()).await {
                Ok(Ok(mut tab)) => {
                    let driven = AssertUnwindSafe(self.drive(&mut session, &mut tab, &settings))
                        .catch_unwind()
                        .await;
                    let status = match driven {
                        Ok(status) => status,
                        Err(panic) => {
                            let reason = panic_message(panic.as_ref());
                            error!("{} 💥 链路处理 panic: {}", tag, reason);
                            ChainStatus::failed(Stage::Internal, reason)
                        }
                    };
                    session.finish(status);
                    tab.close().await;
                }
                Ok(Err(e)) => {
                    session.finish(ChainStatus::failed(Stage::Render, e.to_string()));
                }
                Err(_) => {
                    let status = if session.is_expired() {
                        ChainStatus::TimedOut
                    } else {
                        ChainStatus::failed(Stage::Render, "打开页面会话超时")
                    };
                    session.finish(status);
                }
            }
        }

        let snapshot = session.snapshot();
        log_chain_complete(&tag, &snapshot);
        snapshot
    }

    async fn drive(
        &self,
        session: &mut ChainSession,
        tab: &mut Box<dyn RenderSession>,
        settings: &ChainSettings,
    ) -> ChainStatus {
        loop {
            if session.remaining() < settings.step_reserve {
                info!(
                    "{} ⏰ 剩余 {}ms，不足以开始新的一题",
                    session_tag(session.id()),
                    session.remaining().as_millis()
                );
                return ChainStatus::TimedOut;
            }
            if session.history().len() >= settings.max_steps {
                return ChainStatus::failed(
                    Stage::StepLimit,
                    format!("已达到最大题数 {}", settings.max_steps),
                );
            }

            let ctx = StepCtx::new(
                session.id(),
                session.history().len() + 1,
                session.current_url(),
                session.deadline(),
            );
            info!("{} 🌐 打开题目: {}", ctx, ctx.url);

            let page = match self.render(&ctx, tab, settings).await {
                Ok(page) => page,
                Err(failure) => return failure.into_status(),
            };

            let report = match self.flow.run(&ctx, &page).await {
                Ok(report) => report,
                Err(failure) => {
                    warn!("{} ❌ {}", ctx, failure);
                    return failure.into_status();
                }
            };

            if let Some(status) = self.settle(session, &ctx, report, settings).await {
                return status;
            }
        }
    }

    /// 渲染当前题目，失败重试一次
    async fn render(
        &self,
        ctx: &StepCtx,
        tab: &mut Box<dyn RenderSession>,
        settings: &ChainSettings,
    ) -> Result<RenderedPage, StageFailure> {
        let mut last_failure = StageFailure::new(Stage::Render, "未尝试渲染");

        for attempt in 1..=RENDER_ATTEMPTS {
            let limit = ctx.stage_timeout(settings.render_timeout);
            last_failure = match timeout(limit, tab.render(&ctx.url, limit)).await {
                Ok(Ok(page)) => return Ok(page),
                Ok(Err(e)) => StageFailure::new(Stage::Render, e.to_string()),
                Err(_) => StageFailure::timed_out(Stage::Render, ctx, limit),
            };
            warn!("{} ⚠️ 第 {} 次渲染失败: {}", ctx, attempt, last_failure.reason);

            if ctx.is_expired() {
                last_failure.deadline_exceeded = true;
                break;
            }
        }

        Err(last_failure)
    }

    /// 记录本步结果并决定下一步；返回 Some 表示链路进入终态
    async fn settle(
        &self,
        session: &mut ChainSession,
        ctx: &StepCtx,
        mut report: StepReport,
        settings: &ChainSettings,
    ) -> Option<ChainStatus> {
        let mut retries = 0;

        loop {
            session.record(
                report.question.summary(),
                report.answer.summary(),
                report.answer.provenance,
                report.outcome.clone(),
            );

            let reason = match &report.outcome {
                StepOutcome::Advance(next) => {
                    info!("{} ✓ 回答正确，进入下一题: {}", ctx, next.locator);
                    session.advance_to(next.locator.clone());
                    return None;
                }
                StepOutcome::Complete => {
                    info!("{} 🏁 链路已完成", ctx);
                    return Some(ChainStatus::Succeeded);
                }
                StepOutcome::Rejected(reason) => reason.clone(),
            };
            warn!("{} ✗ 答案被拒绝: {}", ctx, reason);

            if !settings.allow_answer_retry || retries >= settings.max_answer_retries {
                return Some(ChainStatus::failed(Stage::Submit, format!("答案被拒绝: {}", reason)));
            }
            if session.remaining() < settings.step_reserve {
                return Some(ChainStatus::TimedOut);
            }
            if session.history().len() >= settings.max_steps {
                return Some(ChainStatus::failed(
                    Stage::StepLimit,
                    format!("已达到最大题数 {}", settings.max_steps),
                ));
            }

            retries += 1;
            match self.flow.retry_rejected(ctx, &report, &reason).await {
                Ok((answer, outcome)) => {
                    report.answer = answer;
                    report.outcome = outcome;
                }
                Err(failure) => return Some(failure.into_status()),
            }
        }
    }
}

fn session_tag(id: Uuid) -> String {
    let id = id.simple().to_string();
    format!("[链路 {}]", &id[..8])
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic".to_string()
    }
}
