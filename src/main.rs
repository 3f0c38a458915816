use anyhow::{Context, Result};
use quiz_chain_solver::utils::logging;
use quiz_chain_solver::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置：QUIZ_CONFIG 指向 TOML 文件时优先使用，否则读取环境变量
    let config = match std::env::var("QUIZ_CONFIG") {
        Ok(path) => Config::from_toml_file(&path).with_context(|| format!("加载配置失败: {}", path))?,
        Err(_) => Config::from_env(),
    };

    // 初始化日志
    logging::init(config.verbose_logging);

    config.validate().context("配置不完整")?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
