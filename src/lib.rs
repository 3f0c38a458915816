//! # Quiz Chain Solver
//!
//! 自动求解链式网页数据分析题目的服务：打开题目页面、提取题目与数据、
//! 推导答案、提交，并沿着返回结果进入下一题，直到链路结束或时间预算耗尽。
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（浏览器标签页），只暴露能力
//! - `Renderer` / `RenderSession` - 渲染能力抽象
//! - `JsExecutor` - 唯一的 page owner，提供 eval() 能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单道题
//! - `ContentExtractor` - 页面 → Question
//! - `DataAcquirer` - DataReference → Payload
//! - `AnswerDeriver` - Question + Payload → Answer（确定性计算 / LLM）
//! - `HttpSubmitter` - Answer → StepOutcome
//! - `OutcomeWriter` - 写结果文件能力
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一道题"的完整处理流程
//! - `StepCtx` - 上下文封装（会话 + 步骤序号 + 截止时间）
//! - `StepFlow` - 流程编排（extract → acquire → derive → submit）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/chain_driver` - 链路状态机，管理预算与终止
//! - `orchestrator/dispatcher` - 会话调度，管理并发与错误边界
//!
//! ## 模块结构

pub mod api;
pub mod app;
pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::{ChainSettings, Config, PayloadLimits};
pub use infrastructure::{RenderSession, RenderedPage, Renderer};
pub use models::{Answer, ChainStatus, Question, SessionSnapshot, StepOutcome};
pub use orchestrator::{ChainDriver, SessionDispatcher};
pub use workflow::{StepCtx, StepFlow};
