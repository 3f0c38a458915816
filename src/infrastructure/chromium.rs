//! 基于 chromiumoxide 的渲染器实现

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::Browser;
use serde::Deserialize;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use super::js_executor::JsExecutor;
use super::renderer::{RenderSession, RenderedPage, Renderer};
use crate::browser;
use crate::config::Config;
use crate::error::RenderError;

const SNAPSHOT_JS: &str = r#"
(() => ({
    url: window.location.href,
    html: document.documentElement.outerHTML,
    text: document.body ? document.body.innerText : ""
}))()
"#;

#[derive(Debug, Deserialize)]
struct PageSnapshot {
    url: String,
    html: String,
    text: String,
}

/// Chromium 渲染器
///
/// 浏览器进程在所有链路间共享，每条链路打开自己的标签页
pub struct ChromiumRenderer {
    browser: Browser,
    settle: Duration,
    capture_screenshot: bool,
}

impl ChromiumRenderer {
    /// 按配置连接已有浏览器或启动无头浏览器
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let browser = match config.browser_debug_port {
            Some(port) => browser::connect_to_browser(port).await?,
            None => browser::launch_headless_browser(config.chrome_executable.as_deref()).await?,
        };
        Ok(Self {
            browser,
            settle: Duration::from_millis(config.render_settle_ms),
            capture_screenshot: config.capture_screenshot,
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::SessionOpenFailed(e.to_string()))?;
        debug!("已打开新的标签页");

        Ok(Box::new(ChromiumRenderSession {
            executor: JsExecutor::new(page),
            settle: self.settle,
            capture_screenshot: self.capture_screenshot,
        }))
    }
}

/// 单条链路的标签页
pub struct ChromiumRenderSession {
    executor: JsExecutor,
    settle: Duration,
    capture_screenshot: bool,
}

impl ChromiumRenderSession {
    /// 等待 document.readyState 变为 complete，再额外等待 settle 时长让脚本执行完毕
    async fn wait_until_settled(&self, deadline: Instant) {
        while Instant::now() < deadline {
            match self.executor.eval_as::<String>("document.readyState").await {
                Ok(state) if state == "complete" => break,
                Ok(_) => sleep(Duration::from_millis(100)).await,
                Err(e) => {
                    debug!("读取 readyState 失败: {}", e);
                    break;
                }
            }
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        sleep(self.settle.min(remaining)).await;
    }
}

#[async_trait]
impl RenderSession for ChromiumRenderSession {
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout(timeout, self.executor.goto(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(RenderError::NavigationFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }

        self.wait_until_settled(deadline).await;

        let snapshot: PageSnapshot = self
            .executor
            .eval_as(SNAPSHOT_JS)
            .await
            .map_err(|e| RenderError::ContentUnavailable(e.to_string()))?;

        let screenshot = if self.capture_screenshot {
            match self.executor.screenshot_base64().await {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("截图失败，继续处理: {}", e);
                    None
                }
            }
        } else {
            None
        };

        debug!("页面渲染完成: {} (HTML {} 字节)", snapshot.url, snapshot.html.len());

        Ok(RenderedPage {
            url: snapshot.url,
            html: snapshot.html,
            text: snapshot.text,
            screenshot,
        })
    }

    async fn close(self: Box<Self>) {
        if let Err(e) = self.executor.close().await {
            warn!("关闭标签页失败: {}", e);
        }
    }
}
