//! 答案模型

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 答案来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// 语言模型推导
    Model,
    /// 确定性计算（算式 / 列聚合）
    Deterministic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Choice(String),
    /// base64 data URI
    Artifact(String),
    Json(JsonValue),
}

impl AnswerValue {
    /// 转换为提交请求体中的 JSON 值
    ///
    /// 整数形式的浮点数按整数提交（4.0 → 4）
    pub fn to_json(&self) -> JsonValue {
        match self {
            AnswerValue::Text(s) | AnswerValue::Choice(s) | AnswerValue::Artifact(s) => {
                JsonValue::String(s.clone())
            }
            AnswerValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9.0e15 {
                    JsonValue::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(JsonValue::Number)
                        .unwrap_or(JsonValue::Null)
                }
            }
            AnswerValue::Boolean(b) => JsonValue::Bool(*b),
            AnswerValue::Json(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub value: AnswerValue,
    pub provenance: Provenance,
}

impl Answer {
    pub fn model(value: AnswerValue) -> Self {
        Self {
            value,
            provenance: Provenance::Model,
        }
    }

    pub fn deterministic(value: AnswerValue) -> Self {
        Self {
            value,
            provenance: Provenance::Deterministic,
        }
    }

    /// 答案摘要（用于步骤记录，artifact 只显示长度）
    pub fn summary(&self) -> String {
        match &self.value {
            AnswerValue::Artifact(s) => format!("<artifact {} 字节>", s.len()),
            other => crate::utils::logging::truncate_text(&other.to_json().to_string(), 120),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integral_number_serializes_as_integer() {
        assert_eq!(AnswerValue::Number(4.0).to_json(), serde_json::json!(4));
        assert_eq!(AnswerValue::Number(2.5).to_json(), serde_json::json!(2.5));
    }

    #[test]
    fn test_artifact_summary_hides_content() {
        let answer = Answer::model(AnswerValue::Artifact("data:image/png;base64,AAAA".into()));
        assert!(answer.summary().starts_with("<artifact"));
    }
}
