//! 应用装配
//!
//! 启动时构造一次所有能力，按层次注入：
//! infrastructure → services → workflow → orchestrator → api

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tracing::info;

use crate::api::{self, ApiState};
use crate::config::Config;
use crate::infrastructure::{ChromiumRenderer, Renderer};
use crate::orchestrator::{ChainDriver, SessionDispatcher};
use crate::services::{
    AnswerDeriver, DataAcquirer, DataSource, HttpSubmitter, LlmService, OutcomeWriter, Reasoner,
    Submitter,
};
use crate::utils::logging::log_startup;
use crate::workflow::StepFlow;

/// 应用主结构
pub struct App {
    config: Arc<Config>,
    dispatcher: SessionDispatcher,
}

impl App {
    /// 初始化应用：启动（或连接）浏览器并装配真实能力
    pub async fn initialize(config: Config) -> Result<Self> {
        log_startup(&config);

        let renderer = ChromiumRenderer::from_config(&config)
            .await
            .context("启动浏览器失败")?;
        info!("✓ 浏览器已就绪");

        let reasoner: Arc<dyn Reasoner> = Arc::new(LlmService::new(&config));
        let source: Arc<dyn DataSource> = Arc::new(DataAcquirer::new(
            config.payload_limits(),
            Duration::from_secs(config.acquire_timeout_secs),
        ));
        let submitter: Arc<dyn Submitter> = Arc::new(HttpSubmitter::from_config(&config));

        Ok(Self::with_components(
            config,
            Arc::new(renderer),
            reasoner,
            source,
            submitter,
        ))
    }

    /// 使用给定能力装配应用（测试中注入桩实现）
    pub fn with_components(
        config: Config,
        renderer: Arc<dyn Renderer>,
        reasoner: Arc<dyn Reasoner>,
        source: Arc<dyn DataSource>,
        submitter: Arc<dyn Submitter>,
    ) -> Self {
        let deriver = AnswerDeriver::new(reasoner, config.llm_vision);
        let flow = StepFlow::new(source, deriver, submitter, config.chain_settings());
        let driver = Arc::new(ChainDriver::new(renderer, flow));

        let dispatcher = SessionDispatcher::new(driver, config.max_concurrent_sessions)
            .with_retention(config.max_retained_sessions)
            .with_outcome_writer(OutcomeWriter::with_path(config.outcomes_log_file.clone()));

        Self {
            config: Arc::new(config),
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &SessionDispatcher {
        &self.dispatcher
    }

    pub fn router(&self) -> Router {
        api::router(ApiState {
            config: self.config.clone(),
            dispatcher: self.dispatcher.clone(),
        })
    }

    /// 启动 HTTP 服务
    pub async fn run(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听 {}", addr))?;
        info!("🌐 HTTP 服务已启动: http://{}", addr);

        axum::serve(listener, self.router())
            .await
            .context("HTTP 服务异常退出")?;
        Ok(())
    }
}
