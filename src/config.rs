use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置
///
/// 启动时构造一次，之后只以引用形式传入各组件，组件内部不再读取环境变量
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 服务配置 ---
    pub host: String,
    pub port: u16,
    // --- 学生凭证 ---
    pub student_email: String,
    pub student_secret: String,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    /// 是否把页面截图作为图片传给模型
    pub llm_vision: bool,
    // --- 链路预算 ---
    /// 整条链的时间预算（秒），需小于 3 分钟的重新提交窗口
    pub chain_budget_secs: u64,
    /// 单条链最多处理的题目数
    pub max_steps: usize,
    /// 开始新一步所需的最少剩余时间（秒）
    pub step_reserve_secs: u64,
    // --- 各阶段超时 ---
    pub render_timeout_secs: u64,
    /// 页面加载后等待脚本执行完毕的时间（毫秒）
    pub render_settle_ms: u64,
    pub capture_screenshot: bool,
    pub acquire_timeout_secs: u64,
    pub derive_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    // --- 载荷上限 ---
    pub max_table_rows: usize,
    pub max_text_chars: usize,
    pub max_binary_bytes: usize,
    /// 单个数据文件最多下载的字节数，超出部分不再读取
    pub max_download_bytes: usize,
    // --- 并发与重试 ---
    /// 同时运行的链路数量
    pub max_concurrent_sessions: usize,
    /// 内存中保留的已结束会话快照数量
    pub max_retained_sessions: usize,
    /// 答案被拒绝后是否带着反馈重新推导
    pub allow_answer_retry: bool,
    pub max_answer_retries: usize,
    // --- 浏览器 ---
    /// 设置后连接已有浏览器的调试端口，否则启动无头浏览器
    pub browser_debug_port: Option<u16>,
    pub chrome_executable: Option<String>,
    // --- 日志 ---
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 链路结果输出文件
    pub outcomes_log_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            student_email: String::new(),
            student_secret: String::new(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o".to_string(),
            llm_vision: true,
            chain_budget_secs: 170,
            max_steps: 20,
            step_reserve_secs: 10,
            render_timeout_secs: 30,
            render_settle_ms: 2000,
            capture_screenshot: true,
            acquire_timeout_secs: 30,
            derive_timeout_secs: 60,
            submit_timeout_secs: 30,
            max_table_rows: 50,
            max_text_chars: 8000,
            max_binary_bytes: 2_000_000,
            max_download_bytes: 20_000_000,
            max_concurrent_sessions: 4,
            max_retained_sessions: 256,
            allow_answer_retry: false,
            max_answer_retries: 1,
            browser_debug_port: None,
            chrome_executable: None,
            verbose_logging: false,
            outcomes_log_file: "outcomes.txt".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(default.host),
            port: env_or("PORT", default.port),
            student_email: std::env::var("STUDENT_EMAIL").unwrap_or(default.student_email),
            student_secret: std::env::var("STUDENT_SECRET").unwrap_or(default.student_secret),
            llm_api_key: std::env::var("OPENAI_API_KEY")
                .or_else(|_| std::env::var("LLM_API_KEY"))
                .unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            llm_vision: env_or("LLM_VISION", default.llm_vision),
            chain_budget_secs: env_or("QUIZ_TIMEOUT", default.chain_budget_secs),
            max_steps: env_or("MAX_STEPS", default.max_steps),
            step_reserve_secs: env_or("STEP_RESERVE_SECS", default.step_reserve_secs),
            render_timeout_secs: env_or("RENDER_TIMEOUT_SECS", default.render_timeout_secs),
            render_settle_ms: env_or("RENDER_SETTLE_MS", default.render_settle_ms),
            capture_screenshot: env_or("CAPTURE_SCREENSHOT", default.capture_screenshot),
            acquire_timeout_secs: env_or("ACQUIRE_TIMEOUT_SECS", default.acquire_timeout_secs),
            derive_timeout_secs: env_or("DERIVE_TIMEOUT_SECS", default.derive_timeout_secs),
            submit_timeout_secs: env_or("SUBMIT_TIMEOUT_SECS", default.submit_timeout_secs),
            max_table_rows: env_or("MAX_TABLE_ROWS", default.max_table_rows),
            max_text_chars: env_or("MAX_TEXT_CHARS", default.max_text_chars),
            max_binary_bytes: env_or("MAX_BINARY_BYTES", default.max_binary_bytes),
            max_download_bytes: env_or("MAX_DOWNLOAD_BYTES", default.max_download_bytes),
            max_concurrent_sessions: env_or("MAX_CONCURRENT_SESSIONS", default.max_concurrent_sessions),
            max_retained_sessions: env_or("MAX_RETAINED_SESSIONS", default.max_retained_sessions),
            allow_answer_retry: env_or("ALLOW_ANSWER_RETRY", default.allow_answer_retry),
            max_answer_retries: env_or("MAX_ANSWER_RETRIES", default.max_answer_retries),
            browser_debug_port: std::env::var("BROWSER_DEBUG_PORT").ok().and_then(|v| v.parse().ok()),
            chrome_executable: std::env::var("CHROME_EXECUTABLE").ok(),
            verbose_logging: env_or("VERBOSE_LOGGING", default.verbose_logging),
            outcomes_log_file: std::env::var("OUTCOMES_LOG_FILE").unwrap_or(default.outcomes_log_file),
        }
    }

    /// 从 TOML 文件加载配置，缺失的字段使用默认值
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })
    }

    /// 校验必填项
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.student_email.is_empty() {
            return Err(ConfigError::MissingField("STUDENT_EMAIL"));
        }
        if self.student_secret.is_empty() {
            return Err(ConfigError::MissingField("STUDENT_SECRET"));
        }
        if self.llm_api_key.is_empty() {
            return Err(ConfigError::MissingField("OPENAI_API_KEY"));
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// 链路驱动所需的参数
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            budget: Duration::from_secs(self.chain_budget_secs),
            max_steps: self.max_steps.max(1),
            step_reserve: Duration::from_secs(self.step_reserve_secs),
            render_timeout: Duration::from_secs(self.render_timeout_secs),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            derive_timeout: Duration::from_secs(self.derive_timeout_secs),
            submit_timeout: Duration::from_secs(self.submit_timeout_secs),
            allow_answer_retry: self.allow_answer_retry,
            max_answer_retries: self.max_answer_retries,
        }
    }

    /// 数据获取的大小上限
    pub fn payload_limits(&self) -> PayloadLimits {
        PayloadLimits {
            max_table_rows: self.max_table_rows.max(1),
            max_text_chars: self.max_text_chars.max(1),
            max_binary_bytes: self.max_binary_bytes.max(1),
            // 至少多读一个字节，二进制载荷才能判断是否被截断
            max_download_bytes: self.max_download_bytes.max(self.max_binary_bytes.max(1) + 1),
        }
    }
}

/// 链路驱动参数
#[derive(Clone, Debug)]
pub struct ChainSettings {
    pub budget: Duration,
    pub max_steps: usize,
    pub step_reserve: Duration,
    pub render_timeout: Duration,
    pub acquire_timeout: Duration,
    pub derive_timeout: Duration,
    pub submit_timeout: Duration,
    pub allow_answer_retry: bool,
    pub max_answer_retries: usize,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Config::default().chain_settings()
    }
}

/// 载荷大小上限
#[derive(Clone, Copy, Debug)]
pub struct PayloadLimits {
    pub max_table_rows: usize,
    pub max_text_chars: usize,
    pub max_binary_bytes: usize,
    pub max_download_bytes: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Config::default().payload_limits()
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
