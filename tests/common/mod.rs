//! 集成测试共用的桩实现

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use quiz_chain_solver::config::ChainSettings;
use quiz_chain_solver::error::{AcquisitionError, RenderError, SubmissionError};
use quiz_chain_solver::models::{Answer, DataReference, Payload, Question, StepOutcome};
use quiz_chain_solver::services::{AnswerDeriver, DataSource, Reasoner, ReasoningPrompt, Submitter};
use quiz_chain_solver::{ChainDriver, RenderSession, RenderedPage, Renderer, StepFlow};

pub const START_URL: &str = "https://quiz.test/q/1";

pub fn step_url(n: usize) -> String {
    format!("https://quiz.test/q/{}", n)
}

/// 每个地址都渲染成一道文本题，提交地址为 /submit
pub fn quiz_page(url: &str, with_data: bool) -> RenderedPage {
    let data = if with_data {
        r#"<a href="/data/sales.csv">sales.csv</a>"#
    } else {
        ""
    };
    RenderedPage::new(
        url,
        format!(
            r#"<html><body><div id="result">
                 <p>Question at {url}: name the capital of France.</p>{data}
                 <form action="/submit" method="post"></form>
               </div></body></html>"#
        ),
        "",
    )
}

/// 题干只有一句话的页面
pub fn prompt_page(url: &str, prompt: &str) -> RenderedPage {
    RenderedPage::new(
        url,
        format!(
            r#"<html><body><div id="result"><p>{prompt}</p>
                 <form action="/submit" method="post"></form>
               </div></body></html>"#
        ),
        "",
    )
}

// ========== Renderer ==========

#[derive(Default)]
pub struct RenderStats {
    pub renders: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

#[derive(Clone, Default)]
struct PageScript {
    /// 前 N 次渲染返回超时
    fail_first: usize,
    with_data: bool,
    /// 每次渲染都挂起这么久
    hang: Option<Duration>,
    prompt: Option<String>,
}

pub struct StubRenderer {
    script: PageScript,
    pub stats: Arc<RenderStats>,
}

impl StubRenderer {
    pub fn new() -> Arc<Self> {
        Self::build(PageScript::default())
    }

    pub fn failing(times: usize) -> Arc<Self> {
        Self::build(PageScript {
            fail_first: times,
            ..Default::default()
        })
    }

    pub fn with_data() -> Arc<Self> {
        Self::build(PageScript {
            with_data: true,
            ..Default::default()
        })
    }

    /// 渲染永远等不到页面就绪
    pub fn hanging(delay: Duration) -> Arc<Self> {
        Self::build(PageScript {
            hang: Some(delay),
            ..Default::default()
        })
    }

    pub fn with_prompt(prompt: &str) -> Arc<Self> {
        Self::build(PageScript {
            prompt: Some(prompt.to_string()),
            ..Default::default()
        })
    }

    fn build(script: PageScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            stats: Arc::new(RenderStats::default()),
        })
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn open(&self) -> Result<Box<dyn RenderSession>, RenderError> {
        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubTab {
            script: self.script.clone(),
            stats: self.stats.clone(),
        }))
    }
}

struct StubTab {
    script: PageScript,
    stats: Arc<RenderStats>,
}

#[async_trait]
impl RenderSession for StubTab {
    async fn render(&mut self, url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
        let n = self.stats.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(hang) = self.script.hang {
            tokio::time::sleep(hang).await;
        }
        if n < self.script.fail_first {
            return Err(RenderError::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        Ok(match &self.script.prompt {
            Some(prompt) => prompt_page(url, prompt),
            None => quiz_page(url, self.script.with_data),
        })
    }

    async fn close(self: Box<Self>) {
        self.stats.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ========== Reasoner ==========

pub struct StubReasoner {
    reply: String,
    delay: Duration,
    pub prompts: Mutex<Vec<ReasoningPrompt>>,
}

impl StubReasoner {
    pub fn answering(answer: &str) -> Arc<Self> {
        Self::slow(answer, Duration::ZERO)
    }

    pub fn slow(answer: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: format!(r#"{{"answer": "{}", "answer_type": "string"}}"#, answer),
            delay,
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<ReasoningPrompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reasoner for StubReasoner {
    async fn complete(&self, prompt: &ReasoningPrompt) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.reply.clone())
    }
}

// ========== DataSource ==========

/// 所有引用都获取失败
pub struct FailingSource {
    pub calls: AtomicUsize,
}

impl FailingSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DataSource for FailingSource {
    async fn acquire(&self, reference: &DataReference) -> Result<Payload, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AcquisitionError::BadStatus {
            locator: reference.locator.clone(),
            status: 404,
        })
    }
}

// ========== Submitter ==========

/// 按顺序返回预设结果；用完后一直返回 fallback
pub struct ScriptedSubmitter {
    script: Mutex<VecDeque<StepOutcome>>,
    fallback: Option<StepOutcome>,
    pub answers: Mutex<Vec<Answer>>,
}

impl ScriptedSubmitter {
    pub fn new(script: Vec<StepOutcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            answers: Mutex::new(Vec::new()),
        })
    }

    /// 每次都跳到"下一题"，链路永不结束
    pub fn always_advance() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(StepOutcome::Advance(DataReference::url(step_url(999)))),
            answers: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.answers.lock().unwrap().len()
    }
}

#[async_trait]
impl Submitter for ScriptedSubmitter {
    async fn submit(&self, _question: &Question, answer: &Answer) -> Result<StepOutcome, SubmissionError> {
        self.answers.lock().unwrap().push(answer.clone());
        let next = self.script.lock().unwrap().pop_front();
        match next.or_else(|| self.fallback.clone()) {
            Some(outcome) => Ok(outcome),
            None => Err(SubmissionError::BadStatus {
                endpoint: "stub".into(),
                status: 500,
            }),
        }
    }
}

/// 提交阶段直接 panic
pub struct PanickingSubmitter;

#[async_trait]
impl Submitter for PanickingSubmitter {
    async fn submit(&self, _question: &Question, _answer: &Answer) -> Result<StepOutcome, SubmissionError> {
        panic!("submitter blew up");
    }
}

pub fn advance_to(n: usize) -> StepOutcome {
    StepOutcome::Advance(DataReference::url(step_url(n)))
}

// ========== 装配 ==========

pub fn settings() -> ChainSettings {
    ChainSettings {
        budget: Duration::from_secs(170),
        max_steps: 20,
        step_reserve: Duration::from_secs(10),
        render_timeout: Duration::from_secs(30),
        acquire_timeout: Duration::from_secs(30),
        derive_timeout: Duration::from_secs(60),
        submit_timeout: Duration::from_secs(30),
        allow_answer_retry: false,
        max_answer_retries: 1,
    }
}

pub fn driver(
    settings: ChainSettings,
    renderer: Arc<dyn Renderer>,
    reasoner: Arc<dyn Reasoner>,
    source: Arc<dyn DataSource>,
    submitter: Arc<dyn Submitter>,
) -> ChainDriver {
    let deriver = AnswerDeriver::new(reasoner, false);
    let flow = StepFlow::new(source, deriver, submitter, settings);
    ChainDriver::new(renderer, flow)
}
