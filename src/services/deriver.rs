//! 答案推导服务 - 业务能力层
//!
//! 只负责"Question + 载荷 → Answer"：
//! 1. 能确定性计算的直接算（见 `analysis`）
//! 2. 否则调用推理能力，要求返回 `{"answer": ..., "answer_type": ...}`
//! 3. 首次失败、超时或无法解析时，用不带载荷正文的精简 prompt 重试一次；
//!    两次尝试平分调用方给出的时间窗口
//! 4. 按答案形态做类型矫正

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::DerivationError;
use crate::models::{
    Answer, AnswerShape, AnswerValue, Payload, PayloadContent, Question,
};
use crate::services::analysis;
use crate::services::llm_service::{Reasoner, ReasoningPrompt};

const SYSTEM_PROMPT: &str = r#"You are a data analysis expert solving quiz questions.
You are given the question text, the page it came from and digests of the attached data.
Work out the answer and reply with ONLY a JSON object:
{"answer": <the final answer>, "answer_type": "boolean|number|string|base64|json"}
If the answer is a file or image, give it as a base64 data URI and set answer_type to "base64"."#;

/// 推导尝试次数（首次 + 精简重试）
const ATTEMPTS: usize = 2;

/// 答案推导服务
///
/// 职责：
/// - 只处理单个题目
/// - 不关心提交与跳转
pub struct AnswerDeriver {
    reasoner: Arc<dyn Reasoner>,
    vision: bool,
}

impl AnswerDeriver {
    pub fn new(reasoner: Arc<dyn Reasoner>, vision: bool) -> Self {
        Self { reasoner, vision }
    }

    /// 推导答案，`limit` 是整个推导阶段可用的时间
    pub async fn derive(
        &self,
        question: &Question,
        payloads: &[Payload],
        limit: Duration,
    ) -> Result<Answer, DerivationError> {
        if let Some(answer) = analysis::solve(question, payloads) {
            return Ok(answer);
        }
        self.derive_with_model(question, payloads, None, limit).await
    }

    /// 带着上一次被拒绝的原因重新推导（跳过确定性计算）
    pub async fn derive_with_feedback(
        &self,
        question: &Question,
        payloads: &[Payload],
        previous: &Answer,
        reason: &str,
        limit: Duration,
    ) -> Result<Answer, DerivationError> {
        let feedback = format!(
            "A previous answer {} was rejected with: {}\nGive a different, corrected answer.",
            previous.summary(),
            reason
        );
        self.derive_with_model(question, payloads, Some(feedback), limit).await
    }

    async fn derive_with_model(
        &self,
        question: &Question,
        payloads: &[Payload],
        feedback: Option<String>,
        limit: Duration,
    ) -> Result<Answer, DerivationError> {
        let per_attempt = limit / ATTEMPTS as u32;
        let prompts = [
            self.build_prompt(question, payloads, feedback.as_deref(), true),
            self.build_prompt(question, payloads, feedback.as_deref(), false),
        ];

        let mut last_text: Option<String> = None;
        let mut last_error: Option<String> = None;

        for (attempt, prompt) in prompts.iter().enumerate() {
            let reply = match tokio::time::timeout(per_attempt, self.reasoner.complete(prompt)).await {
                Ok(reply) => reply,
                Err(_) => Err(anyhow::anyhow!("推理超时 ({}ms)", per_attempt.as_millis())),
            };
            match reply {
                Ok(text) if text.trim().is_empty() => {
                    warn!("第 {} 次推理返回空内容", attempt + 1);
                }
                Ok(text) => {
                    if let Some(value) = parse_model_output(&text, &question.shape) {
                        debug!("第 {} 次推理得到答案", attempt + 1);
                        return Ok(Answer::model(value));
                    }
                    warn!(
                        "第 {} 次推理结果无法解析: {}",
                        attempt + 1,
                        crate::utils::truncate_text(&text, 200)
                    );
                    last_text = Some(text);
                }
                Err(e) => {
                    warn!("第 {} 次推理失败: {}", attempt + 1, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        if let Some(text) = last_text {
            debug!("按答案形态尽力矫正原始文本");
            return Ok(Answer::model(coerce_text(&text, &question.shape)));
        }

        match last_error {
            Some(reason) => Err(DerivationError::ReasonerFailed {
                attempts: ATTEMPTS,
                reason,
            }),
            None => Err(DerivationError::EmptyResponse { attempts: ATTEMPTS }),
        }
    }

    fn build_prompt(
        &self,
        question: &Question,
        payloads: &[Payload],
        feedback: Option<&str>,
        with_bodies: bool,
    ) -> ReasoningPrompt {
        let mut user = format!(
            "Question:\n{}\n\nQuiz URL: {}\n\nExpected answer type: {}",
            question.prompt.trim(),
            question.page_url,
            question.shape.label()
        );
        if let AnswerShape::Choice(options) = &question.shape {
            user.push_str(&format!("\nOptions: {}", options.join(" | ")));
        }

        if !payloads.is_empty() {
            user.push_str("\n\nAttached data:\n");
            for (idx, payload) in payloads.iter().enumerate() {
                user.push_str(&digest_payload(idx, payload, with_bodies));
                user.push('\n');
            }
        }

        if let Some(feedback) = feedback {
            user.push('\n');
            user.push_str(feedback);
        }

        let mut images = Vec::new();
        if self.vision {
            if let Some(shot) = &question.screenshot {
                images.push(format!("data:image/png;base64,{}", shot));
            }
            if with_bodies {
                images.extend(payloads.iter().filter_map(image_data_uri));
            }
        }

        ReasoningPrompt {
            system: Some(SYSTEM_PROMPT.to_string()),
            user,
            images,
        }
    }
}

// ========== 载荷序列化 ==========

/// 载荷摘要：头部一行（种类、来源、行数、是否截断），然后是正文
pub fn digest_payload(index: usize, payload: &Payload, with_body: bool) -> String {
    let mut header = format!(
        "[{}] {:?} {}",
        index + 1,
        payload.kind(),
        payload.source.describe()
    );
    if let Some(rows) = payload.meta.row_count {
        header.push_str(&format!(" rows={}", rows));
    }
    if payload.meta.truncated {
        header.push_str(" truncated=true");
    }
    if let Some(failure) = &payload.meta.failure {
        return format!("{} unavailable: {}", header, failure);
    }

    let body = match &payload.content {
        PayloadContent::Table(table) => {
            let mut body = format!("columns: {}", table.columns.join(", "));
            if with_body {
                body.push('\n');
                body.push_str(&table.columns.join(","));
                for row in &table.rows {
                    body.push('\n');
                    body.push_str(&row.join(","));
                }
                let total = payload.meta.row_count.unwrap_or(table.rows.len());
                if total > table.rows.len() {
                    body.push_str(&format!("\n... ({} more rows)", total - table.rows.len()));
                }
            }
            body
        }
        PayloadContent::Text { text } if with_body => {
            if payload.meta.truncated {
                format!("{}\n[truncated]", text)
            } else {
                text.clone()
            }
        }
        PayloadContent::Text { text } => format!("{} chars", text.chars().count()),
        PayloadContent::Binary { base64 } => format!(
            "binary {} ({} base64 chars, body omitted)",
            payload.meta.content_type.as_deref().unwrap_or("unknown"),
            base64.len()
        ),
        PayloadContent::Empty => "empty".to_string(),
    };

    format!("{}\n{}", header, body)
}

fn image_data_uri(payload: &Payload) -> Option<String> {
    let content_type = payload.meta.content_type.as_deref()?;
    if !content_type.starts_with("image/") {
        return None;
    }
    match &payload.content {
        PayloadContent::Binary { base64 } if !payload.meta.truncated => {
            Some(format!("data:{};base64,{}", content_type, base64))
        }
        _ => None,
    }
}

// ========== 结果解析与类型矫正 ==========

/// 解析模型返回的 JSON（允许被 markdown 代码块或说明文字包裹）
pub fn parse_model_output(text: &str, shape: &AnswerShape) -> Option<AnswerValue> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: JsonValue = serde_json::from_str(&text[start..=end]).ok()?;
    let answer = parsed.get("answer")?;
    if answer.is_null() {
        return None;
    }
    let answer_type = parsed.get("answer_type").and_then(JsonValue::as_str);
    coerce_value(answer, shape, answer_type)
}

/// 把无法解析的原始文本尽力转换为期望的形态
pub fn coerce_text(text: &str, shape: &AnswerShape) -> AnswerValue {
    let raw = JsonValue::String(text.trim().to_string());
    coerce_value(&raw, shape, None).unwrap_or_else(|| AnswerValue::Text(text.trim().to_string()))
}

/// 按形态矫正答案值
///
/// 题目形态为 Text 时以模型声明的 answer_type 为准
pub fn coerce_value(
    value: &JsonValue,
    shape: &AnswerShape,
    answer_type: Option<&str>,
) -> Option<AnswerValue> {
    let effective = match (shape, answer_type) {
        (AnswerShape::Text, Some("number")) => AnswerShape::Number,
        (AnswerShape::Text, Some("boolean")) => AnswerShape::Boolean,
        (AnswerShape::Text, Some("json")) => AnswerShape::Json,
        (AnswerShape::Text, Some("base64")) => AnswerShape::Artifact,
        (shape, _) => shape.clone(),
    };

    match effective {
        AnswerShape::Number => match value {
            JsonValue::Number(n) => n.as_f64().map(AnswerValue::Number),
            JsonValue::String(s) => number_in_text(s).map(AnswerValue::Number),
            _ => None,
        },
        AnswerShape::Boolean => match value {
            JsonValue::Bool(b) => Some(AnswerValue::Boolean(*b)),
            JsonValue::Number(n) => n.as_f64().map(|n| AnswerValue::Boolean(n != 0.0)),
            JsonValue::String(s) => boolean_in_text(s).map(AnswerValue::Boolean),
            _ => None,
        },
        AnswerShape::Choice(options) => {
            let text = json_text(value);
            Some(AnswerValue::Choice(match_choice(&text, &options)))
        }
        AnswerShape::Artifact => {
            let text = json_text(value);
            if text.starts_with("data:") {
                Some(AnswerValue::Artifact(text))
            } else {
                Some(AnswerValue::Artifact(format!("data:image/png;base64,{}", text)))
            }
        }
        AnswerShape::Json => match value {
            JsonValue::String(s) => serde_json::from_str(s).ok().map(AnswerValue::Json),
            other => Some(AnswerValue::Json(other.clone())),
        },
        AnswerShape::Text => Some(AnswerValue::Text(json_text(value))),
    }
}

fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

/// 从文本中取出第一个数字（允许千分位逗号）
fn number_in_text(text: &str) -> Option<f64> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"-?\d[\d,]*(?:\.\d+)?").unwrap());
    re.find(text)?.as_str().replace(',', "").parse().ok()
}

fn boolean_in_text(text: &str) -> Option<bool> {
    let lower = text.trim().to_lowercase();
    let first = lower
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())?;
    match first {
        "true" | "yes" | "1" | "correct" => Some(true),
        "false" | "no" | "0" | "incorrect" => Some(false),
        _ => None,
    }
}

/// 把模型的回答映射到候选项：完全匹配 > 选项字母 > 包含关系，都不满足时原样提交
fn match_choice(text: &str, options: &[String]) -> String {
    let lower = text.to_lowercase();
    if let Some(option) = options.iter().find(|o| o.to_lowercase() == lower) {
        return option.clone();
    }

    let letter = lower.trim_matches(|c: char| !c.is_alphanumeric());
    if letter.len() == 1 {
        if let Some(c) = letter.chars().next() {
            let idx = (c as u32).wrapping_sub('a' as u32) as usize;
            if let Some(option) = options.get(idx) {
                return option.clone();
            }
        }
    }

    options
        .iter()
        .find(|o| !o.is_empty() && lower.contains(&o.to_lowercase()))
        .cloned()
        .unwrap_or_else(|| text.to_string())
}
