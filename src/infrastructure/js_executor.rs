//! JS 执行器 - 基础设施层
//!
//! 持有一个 page 资源，只暴露"导航 / 执行 JS / 截图"的能力

use anyhow::Result;
use base64::Engine;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// JS 执行器
///
/// 职责：
/// - 持有一条链路独占的 Page 资源
/// - 暴露 goto() / eval() / screenshot() 能力
/// - 不认识 Question / Answer
/// - 不处理业务流程
pub struct JsExecutor {
    page: Page,
}

impl JsExecutor {
    /// 创建新的 JS 执行器
    pub fn new(page: Page) -> Self {
        Self { page }
    }

    /// 导航到指定 URL 并等待页面加载完成
    pub async fn goto(&self, url: &str) -> Result<()> {
        self.page.goto(url).await?;
        self.page.wait_for_navigation().await?;
        Ok(())
    }

    /// 执行 JS 代码，结果按 JSON 返回
    pub async fn eval(&self, js_code: impl Into<String>) -> Result<JsonValue> {
        let result = self.page.evaluate(js_code.into()).await?;
        let json_value = result.into_value()?;
        Ok(json_value)
    }

    /// 执行 JS 代码并反序列化为指定类型
    pub async fn eval_as<T: DeserializeOwned>(&self, js_code: impl Into<String>) -> Result<T> {
        let json_value = self.eval(js_code).await?;
        let typed_value = serde_json::from_value(json_value)?;
        Ok(typed_value)
    }

    /// 整页截图，返回 base64 编码的 PNG
    pub async fn screenshot_base64(&self) -> Result<String> {
        let bytes = self
            .page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// 关闭页面
    pub async fn close(self) -> Result<()> {
        self.page.close().await?;
        Ok(())
    }
}
