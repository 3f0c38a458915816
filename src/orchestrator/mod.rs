//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责链路驱动与会话调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `dispatcher` - 会话调度器
//! - 受理请求并立即返回会话 ID
//! - 控制并发数量（Semaphore）
//! - 每条链路一个任务，panic 不影响其他会话
//! - 登记会话快照、写入结果文件
//!
//! ### `chain_driver` - 链路驱动器
//! - 持有会话预算与截止时间
//! - 渲染当前题目（失败重试一次）
//! - 委托 StepFlow 处理单题
//! - 根据提交结果跳转 / 完成 / 失败
//!
//! ## 层次关系
//!
//! ```text
//! dispatcher (处理多条链路)
//!     ↓
//! chain_driver (处理一条链路的多道题)
//!     ↓
//! workflow::StepFlow (处理单道题)
//!     ↓
//! services (能力层：extract / acquire / derive / submit)
//!     ↓
//! infrastructure (基础设施：Renderer / JsExecutor)
//! ```

pub mod chain_driver;
pub mod dispatcher;

pub use chain_driver::ChainDriver;
pub use dispatcher::{SessionCounts, SessionDispatcher, SessionRegistry};
