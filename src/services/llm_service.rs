//! LLM 服务 - 业务能力层
//!
//! 只负责"prompt 进、文本出"的推理能力，不关心题目与流程。
//! 使用 `async-openai`，兼容任何 OpenAI 风格的 Chat Completions 端点。

use anyhow::Result;
use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;

/// 答题需要稳定输出
const TEMPERATURE: f32 = 0.1;
const MAX_TOKENS: u32 = 2048;

/// 一次推理请求
#[derive(Debug, Clone, Default)]
pub struct ReasoningPrompt {
    pub system: Option<String>,
    pub user: String,
    /// 图片（URL 或 data URI），会追加到用户消息中
    pub images: Vec<String>,
}

/// 推理能力
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn complete(&self, prompt: &ReasoningPrompt) -> Result<String>;
}

/// LLM 服务
///
/// 职责：
/// - 把 `ReasoningPrompt` 转成 Chat Completions 请求
/// - 有图片时走 Vision 多段内容
/// - 不解析答案
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmService {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }
}

/// 组装消息：可选的 system + 一条 user（文本或文本加图片）
pub fn build_messages(prompt: &ReasoningPrompt) -> Result<Vec<ChatCompletionRequestMessage>> {
    let mut messages = Vec::with_capacity(2);

    if let Some(system) = &prompt.system {
        let message = ChatCompletionRequestSystemMessageArgs::default()
            .content(system.as_str())
            .build()?;
        messages.push(ChatCompletionRequestMessage::System(message));
    }

    let user = if prompt.images.is_empty() {
        ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.user.as_str())
            .build()?
    } else {
        let text = ChatCompletionRequestUserMessageContentPart::Text(
            ChatCompletionRequestMessageContentPartText {
                text: prompt.user.clone(),
            },
        );
        let images = prompt.images.iter().map(|url| {
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: url.clone(),
                        detail: Some(ImageDetail::Auto),
                    },
                },
            )
        });
        let parts: Vec<_> = std::iter::once(text).chain(images).collect();

        ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(parts))
            .build()?
    };
    messages.push(ChatCompletionRequestMessage::User(user));

    Ok(messages)
}

#[async_trait]
impl Reasoner for LlmService {
    async fn complete(&self, prompt: &ReasoningPrompt) -> Result<String> {
        debug!(
            "🤖 调用模型 {}，消息 {} 字符，图片 {} 张",
            self.model_name,
            prompt.user.chars().count(),
            prompt.images.len()
        );

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(build_messages(prompt)?)
            .temperature(TEMPERATURE)
            .max_tokens(MAX_TOKENS)
            .build()?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            anyhow::anyhow!("LLM API 调用失败: {}", e)
        })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow::anyhow!("LLM 返回内容为空"))?;

        Ok(content.trim().to_string())
    }
}
