//! API 模块
//!
//! 负责接收外部触发请求（HTTP）

pub mod routes;

pub use routes::{router, ApiState, QuizRequest};
