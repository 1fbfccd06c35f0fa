//! 日志安装入口。
//!
//! - **意图 (Why)**：嵌入方可以自带 Subscriber；未配置时调用 [`install_logging`] 得到一套
//!   `EnvFilter + fmt` 的默认输出；
//! - **契约 (What)**：若进程已设置全局 Subscriber，返回 [`TelemetryError::SubscriberAlreadySet`]，
//!   绝不覆盖既有配置；过滤规则读取 `RUST_LOG`，缺省为 `info`。

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// 日志安装失败。
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet,
    #[error("failed to install global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装全局日志 Subscriber。
pub fn install_logging() -> Result<(), TelemetryError> {
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
