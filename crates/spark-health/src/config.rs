//! # 服务配置
//!
//! ## 意图（Why）
//! - 阻塞查询的默认等待与等待上限、`_agent` 对应的本地节点名、默认一致性模式都属于部署参数，
//!   以 TOML 文档描述，交由 `serde` 映射为强类型结构。
//!
//! ## 契约（What）
//! - 所有字段均有默认值，空文档即合法配置；
//! - `max_wait_ms >= default_wait_ms > 0`，否则返回 [`ConfigError::InvalidWaitBounds`]；
//! - 实际等待时长：请求值为 0 时取默认值，再按上限截断。
//!
//! ```toml
//! default_wait_ms = 300000
//! max_wait_ms = 600000
//! local_node = "agent-1"
//! default_consistency = "stale"
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::model::ConsistencyMode;

const DEFAULT_WAIT_MS: u64 = 300_000;
const MAX_WAIT_MS: u64 = 600_000;

/// 配置加载失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse health service config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(
        "invalid wait bounds: default_wait_ms={default_wait_ms}, max_wait_ms={max_wait_ms} (require max >= default > 0)"
    )]
    InvalidWaitBounds {
        default_wait_ms: u64,
        max_wait_ms: u64,
    },
}

/// 健康查询服务配置。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthServiceConfig {
    pub default_wait_ms: u64,
    pub max_wait_ms: u64,
    pub local_node: Option<String>,
    pub default_consistency: ConsistencyMode,
}

impl Default for HealthServiceConfig {
    fn default() -> Self {
        Self {
            default_wait_ms: DEFAULT_WAIT_MS,
            max_wait_ms: MAX_WAIT_MS,
            local_node: None,
            default_consistency: ConsistencyMode::Default,
        }
    }
}

impl HealthServiceConfig {
    /// 解析并校验 TOML 配置。
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// 校验等待边界。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_wait_ms == 0 || self.max_wait_ms < self.default_wait_ms {
            return Err(ConfigError::InvalidWaitBounds {
                default_wait_ms: self.default_wait_ms,
                max_wait_ms: self.max_wait_ms,
            });
        }
        Ok(())
    }

    /// 设置 `_agent` 对应的本地节点名。
    pub fn with_local_node(mut self, node: impl Into<String>) -> Self {
        self.local_node = Some(node.into());
        self
    }

    /// 计算本次请求的实际等待时长。
    pub fn effective_wait(&self, requested: Duration) -> Duration {
        let requested = if requested.is_zero() {
            Duration::from_millis(self.default_wait_ms)
        } else {
            requested
        };
        requested.min(Duration::from_millis(self.max_wait_ms))
    }
}
