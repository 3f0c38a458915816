//! 渲染能力抽象
//!
//! 链路只依赖这两个 trait；真实实现见 `chromium.rs`，测试中使用桩实现

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RenderError;

/// 渲染完成（脚本执行已稳定）后的页面内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderedPage {
    /// 跳转后的最终地址
    pub url: String,
    /// 完整 DOM（outerHTML）
    pub html: String,
    /// 页面可见文本（innerText）
    pub text: String,
    /// 页面截图（base64 PNG）
    pub screenshot: Option<String>,
}

impl RenderedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
            text: text.into(),
            screenshot: None,
        }
    }
}

/// 渲染器：为每条链路创建独立的页面会话
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError>;
}

/// 单条链路独占的页面会话（一个标签页）
#[async_trait]
pub trait RenderSession: Send {
    /// 打开 URL 并等待脚本执行稳定后返回页面内容
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError>;

    /// 释放页面资源
    async fn close(self: Box<Self>);
}
