use thiserror::Error;

/// 渲染阶段错误
#[derive(Debug, Error)]
pub enum RenderError {
    /// 无法打开新的页面会话
    #[error("打开页面会话失败: {0}")]
    SessionOpenFailed(String),
    /// 导航失败
    #[error("导航到 {url} 失败: {reason}")]
    NavigationFailed { url: String, reason: String },
    /// 超时
    #[error("渲染 {url} 超时 ({timeout_ms}ms)")]
    Timeout { url: String, timeout_ms: u64 },
    /// 读取 DOM / 文本失败
    #[error("读取页面内容失败: {0}")]
    ContentUnavailable(String),
}

/// 内容提取错误（对整条链是致命的）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    /// 页面没有可识别的题目文本
    #[error("页面中没有可识别的题目文本")]
    NoQuestionText,
    /// 找不到提交地址
    #[error("页面中没有提交地址 (form action / 脚本常量 / 题目文本)")]
    NoSubmissionTarget,
    /// 提交地址无法解析为 URL
    #[error("无法解析提交地址: {0}")]
    InvalidSubmissionTarget(String),
}

/// 数据获取错误（只影响单个引用，不会中断链路）
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// 网络请求失败
    #[error("请求 {locator} 失败: {source}")]
    RequestFailed {
        locator: String,
        #[source]
        source: reqwest::Error,
    },
    /// 非 2xx 响应
    #[error("请求 {locator} 返回状态码 {status}")]
    BadStatus { locator: String, status: u16 },
    /// 解码失败
    #[error("解码 {locator} 失败: {reason}")]
    DecodeFailed { locator: String, reason: String },
    /// 超时
    #[error("获取 {locator} 超时")]
    Timeout { locator: String },
}

/// 答案推导错误（仅在推理能力重试后仍不可用时出现）
#[derive(Debug, Error)]
pub enum DerivationError {
    /// 推理接口调用失败
    #[error("推理接口调用失败 (已尝试 {attempts} 次): {reason}")]
    ReasonerFailed { attempts: usize, reason: String },
    /// 推理接口返回空内容
    #[error("推理接口返回内容为空 (已尝试 {attempts} 次)")]
    EmptyResponse { attempts: usize },
}

/// 提交阶段错误（传输层失败，重试一次后仍失败）
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// 网络请求失败
    #[error("提交到 {endpoint} 失败: {reason}")]
    RequestFailed { endpoint: String, reason: String },
    /// 非 2xx 且响应体无法解析
    #[error("提交到 {endpoint} 返回状态码 {status}，响应体无法解析")]
    BadStatus { endpoint: String, status: u16 },
    /// 超时
    #[error("提交到 {endpoint} 超时")]
    Timeout { endpoint: String },
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必填项缺失
    #[error("配置项 {0} 未设置")]
    MissingField(&'static str),
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
