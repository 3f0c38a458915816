//! 题目模型
//!
//! 每一步都从页面内容重新提取，提取后不再修改

use serde::{Deserialize, Serialize};

/// 数据引用的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// 可直接下载的 URL（csv / pdf / 图片等）
    Url,
    /// 页面内嵌的数据块（<pre> / <code>）
    Inline,
    /// 题目里提到的 API 接口
    Api,
}

/// 指向外部内容的引用（种类 + 定位符）
///
/// `Inline` 的定位符就是内容本身
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataReference {
    pub kind: ReferenceKind,
    pub locator: String,
}

impl DataReference {
    pub fn url(locator: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Url,
            locator: locator.into(),
        }
    }

    pub fn inline(content: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Inline,
            locator: content.into(),
        }
    }

    pub fn api(locator: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Api,
            locator: locator.into(),
        }
    }

    /// 用于日志与 prompt 的简短描述（内嵌内容只显示长度）
    pub fn describe(&self) -> String {
        match self.kind {
            ReferenceKind::Inline => format!("inline({} 字符)", self.locator.chars().count()),
            ReferenceKind::Url => format!("url({})", self.locator),
            ReferenceKind::Api => format!("api({})", self.locator),
        }
    }
}

/// 题目期望的答案形态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerShape {
    Text,
    Number,
    Boolean,
    /// 选择题，附带候选项
    Choice(Vec<String>),
    /// 文件 / 图表，以 base64 data URI 提交
    Artifact,
    Json,
}

impl AnswerShape {
    pub fn label(&self) -> &'static str {
        match self {
            AnswerShape::Text => "string",
            AnswerShape::Number => "number",
            AnswerShape::Boolean => "boolean",
            AnswerShape::Choice(_) => "choice",
            AnswerShape::Artifact => "base64",
            AnswerShape::Json => "json",
        }
    }
}

/// 提交目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTarget {
    pub url: String,
    /// 请求体中存放答案的字段名
    pub answer_field: String,
}

impl SubmissionTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            answer_field: "answer".to_string(),
        }
    }
}

/// 题目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// 题目所在页面（提交时需要回传）
    pub page_url: String,
    /// 题干文本
    pub prompt: String,
    pub references: Vec<DataReference>,
    pub shape: AnswerShape,
    pub submission_target: SubmissionTarget,
    /// 渲染器截取的页面截图（base64 PNG）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl Question {
    /// 题干摘要（用于步骤记录）
    pub fn summary(&self) -> String {
        crate::utils::logging::truncate_text(&self.prompt.replace('\n', " "), 120)
    }
}
