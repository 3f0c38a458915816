//! 答案提交服务 - 业务能力层
//!
//! 只负责"把 Answer 交给提交目标并解读响应"，不决定链路是否继续

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;
use crate::error::SubmissionError;
use crate::models::{Answer, DataReference, Question, StepOutcome};

/// 传输失败后的重试间隔
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

const UNPARSEABLE: &str = "unparseable response";

const INCORRECT_PHRASES: &[&str] = &[
    "incorrect",
    "wrong answer",
    "answer is wrong",
    "not correct",
    "try again",
];
const COMPLETION_PHRASES: &[&str] = &[
    "congratulations",
    "quiz complete",
    "quiz completed",
    "all questions answered",
    "all done",
    "you have completed",
    "you have finished",
];
const TERMINAL_STATUSES: &[&str] = &["complete", "completed", "done", "finished"];

/// 提交能力
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, question: &Question, answer: &Answer) -> Result<StepOutcome, SubmissionError>;
}

/// 基于 HTTP POST 的提交服务
pub struct HttpSubmitter {
    client: reqwest::Client,
    email: String,
    secret: String,
}

impl HttpSubmitter {
    pub fn new(email: impl Into<String>, secret: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            email: email.into(),
            secret: secret.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.student_email.clone(),
            config.student_secret.clone(),
            Duration::from_secs(config.submit_timeout_secs),
        )
    }

    /// 构造请求体：`{email, secret, url, <answer_field>: value}`
    pub fn build_body(&self, question: &Question, answer: &Answer) -> JsonValue {
        let mut body = json!({
            "email": self.email,
            "secret": self.secret,
            "url": question.page_url,
        });
        body[question.submission_target.answer_field.as_str()] = answer.value.to_json();
        body
    }

    async fn post_once(&self, endpoint: &str, body: &JsonValue) -> Result<StepOutcome, SubmissionError> {
        let response = self
            .client
            .post(endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SubmissionError::Timeout {
                        endpoint: endpoint.to_string(),
                    }
                } else {
                    SubmissionError::RequestFailed {
                        endpoint: endpoint.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        debug!("提交响应 {}: {}", status, crate::utils::truncate_text(&text, 300));

        // 错误状态码只接受结构化的 JSON 判定，错误页面上的文字不算数
        let interpreted = if status.is_success() {
            interpret_response(&text, endpoint)
        } else {
            interpret_json_body(&text, endpoint)
        };

        match interpreted {
            Some(outcome) => Ok(outcome),
            None if status.is_success() => Ok(StepOutcome::Rejected(UNPARSEABLE.to_string())),
            None => Err(SubmissionError::BadStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl Submitter for HttpSubmitter {
    async fn submit(&self, question: &Question, answer: &Answer) -> Result<StepOutcome, SubmissionError> {
        let endpoint = question.submission_target.url.as_str();
        let body = self.build_body(question, answer);

        match self.post_once(endpoint, &body).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("提交失败，{}ms 后重试: {}", RETRY_BACKOFF.as_millis(), e);
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.post_once(endpoint, &body).await
            }
        }
    }
}

/// 解读提交响应，无法识别时返回 `Rejected("unparseable response")`
pub fn parse_response(body: &str, base_url: &str) -> StepOutcome {
    interpret_response(body, base_url).unwrap_or_else(|| StepOutcome::Rejected(UNPARSEABLE.to_string()))
}

fn interpret_response(body: &str, base_url: &str) -> Option<StepOutcome> {
    match serde_json::from_str::<JsonValue>(body.trim()) {
        Ok(JsonValue::Object(obj)) => interpret_json(&JsonValue::Object(obj), base_url),
        Ok(_) => None,
        Err(_) => interpret_markup(body, base_url),
    }
}

fn interpret_json_body(body: &str, base_url: &str) -> Option<StepOutcome> {
    match serde_json::from_str::<JsonValue>(body.trim()) {
        Ok(value @ JsonValue::Object(_)) => interpret_json(&value, base_url),
        _ => None,
    }
}

fn interpret_json(value: &JsonValue, base_url: &str) -> Option<StepOutcome> {
    let next_url = ["url", "next", "next_url"]
        .iter()
        .filter_map(|key| value.get(*key).and_then(JsonValue::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .and_then(|s| resolve(base_url, s));

    if let Some(correct) = value.get("correct").and_then(JsonValue::as_bool) {
        if !correct {
            let reason = value
                .get("reason")
                .and_then(JsonValue::as_str)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("incorrect answer");
            return Some(StepOutcome::Rejected(reason.to_string()));
        }
        return Some(match next_url {
            Some(url) => StepOutcome::Advance(DataReference::url(url)),
            None => StepOutcome::Complete,
        });
    }

    if let Some(url) = next_url {
        return Some(StepOutcome::Advance(DataReference::url(url)));
    }

    let completed = value.get("completed").and_then(JsonValue::as_bool) == Some(true);
    let terminal_status = value
        .get("status")
        .and_then(JsonValue::as_str)
        .map(|s| TERMINAL_STATUSES.contains(&s.trim().to_lowercase().as_str()))
        .unwrap_or(false);
    if completed || terminal_status {
        return Some(StepOutcome::Complete);
    }

    None
}

fn interpret_markup(body: &str, base_url: &str) -> Option<StepOutcome> {
    let document = Html::parse_document(body);
    let text = document
        .root_element()
        .text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let lower = text.to_lowercase();

    if phrase_regex(INCORRECT_PHRASES, &INCORRECT_RE).is_match(&lower) {
        return Some(StepOutcome::Rejected(crate::utils::truncate_text(&text, 200)));
    }
    if phrase_regex(COMPLETION_PHRASES, &COMPLETION_RE).is_match(&lower) {
        return Some(StepOutcome::Complete);
    }

    let selector = Selector::parse("a[href]").ok()?;
    document
        .select(&selector)
        .find(|a| a.text().collect::<String>().to_lowercase().contains("next"))
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| resolve(base_url, href))
        .map(|url| StepOutcome::Advance(DataReference::url(url)))
}

static INCORRECT_RE: OnceLock<Regex> = OnceLock::new();
static COMPLETION_RE: OnceLock<Regex> = OnceLock::new();

/// 整词匹配任一短语
fn phrase_regex(phrases: &[&str], cell: &'static OnceLock<Regex>) -> &'static Regex {
    cell.get_or_init(|| {
        let alternatives = phrases
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"\b(?:{})\b", alternatives)).unwrap()
    })
}

fn resolve(base: &str, raw: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base) => base.join(raw).ok().map(|u| u.to_string()),
        Err(_) => Url::parse(raw).ok().map(|u| u.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerShape, AnswerValue, SubmissionTarget};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BASE: &str = "https://quiz.test/submit";

    fn question(submit_url: String, field: &str) -> Question {
        Question {
            page_url: "https://quiz.test/q/1".into(),
            prompt: "What is 2+2?".into(),
            references: vec![],
            shape: AnswerShape::Number,
            submission_target: SubmissionTarget {
                url: submit_url,
                answer_field: field.into(),
            },
            screenshot: None,
        }
    }

    fn submitter() -> HttpSubmitter {
        HttpSubmitter::new("me@example.com", "s3cret", Duration::from_secs(5))
    }

    #[test]
    fn test_json_correct_with_url_advances() {
        let outcome = parse_response(r#"{"correct": true, "url": "/q/2", "reason": null}"#, BASE);
        assert_eq!(outcome, StepOutcome::Advance(DataReference::url("https://quiz.test/q/2")));
    }

    #[test]
    fn test_json_correct_without_url_completes() {
        assert_eq!(parse_response(r#"{"correct": true, "url": ""}"#, BASE), StepOutcome::Complete);
    }

    #[test]
    fn test_json_incorrect_is_rejected_with_reason() {
        let outcome = parse_response(
            r#"{"correct": false, "url": "https://quiz.test/q/3", "reason": "Sum is 42"}"#,
            BASE,
        );
        assert_eq!(outcome, StepOutcome::Rejected("Sum is 42".into()));
    }

    #[test]
    fn test_json_without_correct_flag() {
        assert!(matches!(parse_response(r#"{"next": "/q/9"}"#, BASE), StepOutcome::Advance(_)));
        assert_eq!(parse_response(r#"{"status": "Finished"}"#, BASE), StepOutcome::Complete);
        assert_eq!(parse_response(r#"{"completed": true}"#, BASE), StepOutcome::Complete);
        assert_eq!(
            parse_response(r#"{"message": "ok"}"#, BASE),
            StepOutcome::Rejected(UNPARSEABLE.into())
        );
    }

    #[test]
    fn test_html_responses() {
        assert_eq!(
            parse_response("<h1>Congratulations!</h1><p>You finished.</p>", BASE),
            StepOutcome::Complete
        );
        assert!(parse_response("<p>Wrong answer, sorry</p>", BASE).is_rejected());
        assert_eq!(
            parse_response(r#"<p>Good.</p><a href="/q/5">Next question</a>"#, BASE),
            StepOutcome::Advance(DataReference::url("https://quiz.test/q/5"))
        );
    }

    #[test]
    fn test_html_phrases_match_whole_words() {
        assert_eq!(
            parse_response("<h1>Oops, something went wrong</h1>", BASE),
            StepOutcome::Rejected(UNPARSEABLE.into())
        );
        assert_eq!(
            parse_response("<p>Downloading all questionnaires</p>", BASE),
            StepOutcome::Rejected(UNPARSEABLE.into())
        );
        assert!(parse_response("<p>That answer is wrong.</p>", BASE).is_rejected());
    }

    #[tokio::test]
    async fn test_error_page_is_retried_as_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(503)
                    .set_body_raw("<h1>Oops, something went wrong. Please try again later</h1>", "text/html"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let q = question(format!("{}/submit", server.uri()), "answer");
        let err = submitter()
            .submit(&q, &Answer::model(AnswerValue::Number(1.0)))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::BadStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_submit_sends_credentials_and_custom_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_partial_json(json!({
                "email": "me@example.com",
                "secret": "s3cret",
                "url": "https://quiz.test/q/1",
                "my_answer": 4
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": true, "url": null})))
            .expect(1)
            .mount(&server)
            .await;

        let q = question(format!("{}/submit", server.uri()), "my_answer");
        let outcome = submitter()
            .submit(&q, &Answer::deterministic(AnswerValue::Number(4.0)))
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Complete);
    }

    #[tokio::test]
    async fn test_submit_retries_once_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"correct": false, "reason": "nope"})))
            .mount(&server)
            .await;

        let q = question(format!("{}/submit", server.uri()), "answer");
        let outcome = submitter()
            .submit(&q, &Answer::model(AnswerValue::Number(5.0)))
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Rejected("nope".into()));
    }

    #[tokio::test]
    async fn test_persistent_server_error_is_submission_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let q = question(format!("{}/submit", server.uri()), "answer");
        let err = submitter()
            .submit(&q, &Answer::model(AnswerValue::Text("x".into())))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmissionError::BadStatus { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_rejection_in_error_status_is_still_parsed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"correct": false, "reason": "bad format"})))
            .mount(&server)
            .await;

        let q = question(format!("{}/submit", server.uri()), "answer");
        let outcome = submitter()
            .submit(&q, &Answer::model(AnswerValue::Text("x".into())))
            .await
            .unwrap();

        assert_eq!(outcome, StepOutcome::Rejected("bad format".into()));
    }
}
