//! 内容提取服务 - 业务能力层
//!
//! 只负责"从渲染后的页面得到 Question"，不关心流程
//!
//! 两种策略：
//! - `ScriptSettledExtractor`：题目以 base64 形式藏在脚本里（`atob("...")`），解码后再解析
//! - `StaticMarkupExtractor`：直接使用渲染后的标记与可见文本
//!
//! 由 `ContentExtractor::select` 根据页面内容做一次廉价探测来选择策略。

use std::sync::OnceLock;

use base64::Engine;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractionError;
use crate::infrastructure::RenderedPage;
use crate::models::{AnswerShape, DataReference, Question, SubmissionTarget};

/// 可以直接下载的数据文件后缀
const DATA_EXTENSIONS: &[&str] = &[
    ".csv", ".tsv", ".json", ".txt", ".xlsx", ".xls", ".pdf", ".png", ".jpg", ".jpeg", ".gif",
    ".mp3", ".wav", ".opus", ".ogg",
];

/// 内容提取策略
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, page: &RenderedPage) -> Result<Question, ExtractionError>;
}

/// 静态标记策略
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticMarkupExtractor;

impl Extractor for StaticMarkupExtractor {
    fn name(&self) -> &'static str {
        "static-markup"
    }

    fn extract(&self, page: &RenderedPage) -> Result<Question, ExtractionError> {
        let document = Html::parse_document(&page.html);

        // 优先使用 #result 容器，其次是整个 body
        let (body_html, body_text) = match select_first(&document, "#result") {
            Some(result) if !element_text(&result).is_empty() => {
                (result.inner_html(), element_text(&result))
            }
            _ => {
                let text = if page.text.trim().is_empty() {
                    select_first(&document, "body")
                        .map(|b| element_text(&b))
                        .unwrap_or_default()
                } else {
                    page.text.trim().to_string()
                };
                (page.html.clone(), text)
            }
        };

        build_question(page, &body_html, body_text)
    }
}

/// 脚本编码策略
#[derive(Debug, Default, Clone, Copy)]
pub struct ScriptSettledExtractor;

impl ScriptSettledExtractor {
    /// 取出并解码脚本中的 base64 题目
    fn decode_embedded(html: &str) -> Option<String> {
        let captures = atob_regex().captures(html)?;
        let encoded: String = captures
            .get(1)?
            .as_str()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| warn!("base64 解码失败: {}", e))
            .ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl Extractor for ScriptSettledExtractor {
    fn name(&self) -> &'static str {
        "script-settled"
    }

    fn extract(&self, page: &RenderedPage) -> Result<Question, ExtractionError> {
        match Self::decode_embedded(&page.html) {
            Some(decoded) => {
                debug!("已解码脚本中的题目 ({} 字符)", decoded.len());
                let text = fragment_text(&decoded);
                build_question(page, &decoded, text)
            }
            None => {
                warn!("脚本中的题目无法解码，改用静态标记策略");
                StaticMarkupExtractor.extract(page)
            }
        }
    }
}

/// 内容提取入口
#[derive(Debug, Default, Clone, Copy)]
pub struct ContentExtractor {
    static_markup: StaticMarkupExtractor,
    script_settled: ScriptSettledExtractor,
}

impl ContentExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据页面内容选择提取策略
    pub fn select(&self, page: &RenderedPage) -> &dyn Extractor {
        if atob_regex().is_match(&page.html) {
            &self.script_settled
        } else {
            &self.static_markup
        }
    }

    pub fn extract(&self, page: &RenderedPage) -> Result<Question, ExtractionError> {
        let strategy = self.select(page);
        debug!("使用提取策略: {}", strategy.name());
        strategy.extract(page)
    }
}

// ========== 公共解析逻辑 ==========

fn build_question(
    page: &RenderedPage,
    body_html: &str,
    body_text: String,
) -> Result<Question, ExtractionError> {
    let prompt = body_text.trim().to_string();
    if prompt.is_empty() {
        return Err(ExtractionError::NoQuestionText);
    }

    let submit_url = find_submission_url(&page.url, body_html, &page.html, &prompt)?;
    let body = Html::parse_fragment(body_html);

    let mut target = SubmissionTarget::new(submit_url);
    if let Some(field) = find_answer_field(&body) {
        target.answer_field = field;
    }

    let references = find_references(&page.url, &body, &prompt, &target.url);
    let shape = infer_shape(&prompt);

    Ok(Question {
        page_url: page.url.clone(),
        prompt,
        references,
        shape,
        submission_target: target,
        screenshot: page.screenshot.clone(),
    })
}

/// 查找提交地址：form action → 脚本常量 → 题目文本中的 URL
fn find_submission_url(
    page_url: &str,
    body_html: &str,
    full_html: &str,
    prompt: &str,
) -> Result<String, ExtractionError> {
    let from_form = [body_html, full_html].iter().find_map(|html| {
        let document = Html::parse_document(html);
        select_first(&document, "form[action]")
            .and_then(|form| form.value().attr("action").map(str::to_string))
            .filter(|action| !action.trim().is_empty())
    });

    let from_script = || {
        submit_constant_regex()
            .captures(full_html)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    };

    let from_text = || {
        let urls = urls_in_text(prompt);
        urls.iter()
            .find(|u| u.trim_end_matches('/').ends_with("/submit"))
            .or_else(|| urls.iter().find(|u| u.to_lowercase().contains("submit")))
            .cloned()
    };

    let raw = from_form
        .or_else(from_script)
        .or_else(from_text)
        .ok_or(ExtractionError::NoSubmissionTarget)?;

    resolve_url(page_url, raw.trim()).ok_or(ExtractionError::InvalidSubmissionTarget(raw))
}

/// 从提交模板（<pre> 中的 JSON）中找答案字段名
fn find_answer_field(body: &Html) -> Option<String> {
    for block in select_all(body, "pre, code") {
        let text = block.text().collect::<String>();
        if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(text.trim()) {
            if let Some(key) = map.keys().find(|k| k.to_lowercase().contains("answer")) {
                return Some(key.clone());
            }
        }
        if let Some(c) = answer_key_regex().captures(&text) {
            return c.get(1).map(|m| m.as_str().to_string());
        }
    }
    None
}

/// 结构化地识别数据引用
fn find_references(page_url: &str, body: &Html, prompt: &str, submit_url: &str) -> Vec<DataReference> {
    let mut refs: Vec<DataReference> = Vec::new();
    let mut push = |r: DataReference| {
        if r.locator != submit_url && r.locator != page_url && !refs.contains(&r) {
            refs.push(r);
        }
    };

    // 链接与媒体资源
    for (selector, attr) in [("a[href]", "href"), ("audio[src], source[src], img[src]", "src")] {
        for element in select_all(body, selector) {
            let Some(raw) = element.value().attr(attr) else {
                continue;
            };
            if let Some(resolved) = resolve_url(page_url, raw) {
                if let Some(r) = classify_url(&resolved) {
                    push(r);
                }
            }
        }
    }

    // 内嵌数据块（提交模板除外）
    for block in select_all(body, "pre, code") {
        let text = block.text().collect::<String>().trim().to_string();
        if text.is_empty() || is_submission_template(&text) {
            continue;
        }
        push(DataReference::inline(text));
    }

    // 题目文本中提到的 URL
    for found in urls_in_text(prompt) {
        if let Some(r) = classify_url(&found) {
            push(r);
        }
    }

    refs
}

fn classify_url(url: &str) -> Option<DataReference> {
    let parsed = Url::parse(url).ok()?;
    let path = parsed.path().to_lowercase();
    let host = parsed.host_str().unwrap_or_default();

    if DATA_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        Some(DataReference::url(url))
    } else if path.contains("/api/") || host.starts_with("api.") {
        Some(DataReference::api(url))
    } else {
        None
    }
}

fn is_submission_template(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("answer\"") && (lower.contains("\"secret\"") || lower.contains("\"email\""))
}

/// 根据题干推断答案形态
pub fn infer_shape(prompt: &str) -> AnswerShape {
    let lower = prompt.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["base64", "data uri", "data:image", "chart", "plot", "visuali"]) {
        return AnswerShape::Artifact;
    }
    if has(&["true or false", "true/false", "boolean", "yes or no"]) {
        return AnswerShape::Boolean;
    }
    if has(&["json object", "as json", "json array"]) {
        return AnswerShape::Json;
    }

    let options: Vec<String> = choice_regex()
        .captures_iter(prompt)
        .filter_map(|c| c.get(2).map(|m| m.as_str().trim().to_string()))
        .collect();
    if options.len() >= 2 {
        return AnswerShape::Choice(options);
    }

    if has(&[
        "how many", "sum of", "total", "count", "average", "mean", "median", "number of",
        "calculate", "compute",
    ]) || arithmetic_regex().is_match(prompt)
    {
        return AnswerShape::Number;
    }

    AnswerShape::Text
}

// ========== 辅助函数 ==========

fn resolve_url(base: &str, raw: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(raw).ok().map(|u| u.to_string()),
        Err(_) => Url::parse(raw).ok().map(|u| u.to_string()),
    }
}

fn urls_in_text(text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
        .collect()
}

fn select_first<'a>(document: &'a Html, css: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(css).ok()?;
    document.select(&selector).next()
}

fn select_all<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(_) => Vec::new(),
    }
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn fragment_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    element_text(&fragment.root_element())
}

fn atob_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"atob\(\s*[`"']([A-Za-z0-9+/=\s]+)[`"']"#).unwrap())
}

fn submit_constant_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)submit[_-]?(?:url|endpoint)\s*[:=]\s*[`"']([^`"']+)[`"']"#).unwrap()
    })
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s<>"'`)\]]+"#).unwrap())
}

fn answer_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([A-Za-z_]*answer[A-Za-z_]*)"\s*:"#).unwrap())
}

fn choice_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*\(?([A-Da-d])[).]\s+(.+)$").unwrap())
}

fn arithmetic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(-?\d+(?:\.\d+)?)\s*([+\-*/×x÷])\s*(-?\d+(?:\.\d+)?)").unwrap()
    })
}
