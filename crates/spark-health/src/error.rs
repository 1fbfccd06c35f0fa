//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义健康查询链路对外暴露的错误语义，区分“请求非法”“令牌无效”“存储失败”等类别，
//!   便于上层传输层决定是否重试、如何映射状态码；
//! - 每个变体带稳定错误码 `spark.health.*`，与告警、指标维度对齐。
//!
//! ## 设计要求（What）
//! - 所有错误类型实现 `thiserror::Error`；
//! - 任何阶段失败都会丢弃已计算的中间结果，调用方只会拿到完整结果或错误，不存在“半成品”。

use std::borrow::Cow;

use thiserror::Error;

/// 版本化存储返回的错误，原样透传给调用方。
///
/// - **契约 (What)**：`code` 为存储侧的稳定错误码，`message` 为人类可读说明；
/// - **风险 (Trade-offs)**：本服务不对存储错误做重试，重试（如有）归属传输层。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("store failure `{code}`: {message}")]
pub struct StoreError {
    code: Cow<'static, str>,
    message: String,
}

impl StoreError {
    /// 构造存储错误。
    pub fn new(code: impl Into<Cow<'static, str>>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 存储侧错误码。
    pub fn code(&self) -> &str {
        &self.code
    }

    /// 错误描述。
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 健康查询核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：聚合校验、鉴权、存储、过滤、转发各阶段的失败，调用方可按变体决定后续动作；
/// - **契约 (What)**：
///   - `InvalidRequest` 一定发生在访问存储之前，且永不重试；
///   - `Store` 原样携带存储错误；
///   - `AuthorizationUnavailable` 与 `FilterExecution` 对当前请求是致命的；
///   - `Cancelled` 表示调用方已放弃等待（例如连接断开）。
/// - **设计权衡 (Trade-offs)**：使用 `String` 保存上下文，牺牲少量分配换取可读性。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum HealthError {
    /// 请求形态非法：空目标键、互斥标志同时出现、过滤表达式语法错误、租户校验失败。
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// 授权令牌无法解析。
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    /// 授权求值器不可用。
    #[error("authorization evaluator unavailable: {detail}")]
    AuthorizationUnavailable { detail: String },

    /// 过滤表达式在执行期失败（校验阶段已通过）。
    #[error("filter execution failed: {detail}")]
    FilterExecution { detail: String },

    /// 存储读取失败。
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 转发层已产出失败结果。
    #[error("forwarding failed: {detail}")]
    Forwarding { detail: String },

    /// 调用方取消了等待中的阻塞查询。
    #[error("query `{operation}` cancelled by caller")]
    Cancelled { operation: &'static str },
}

impl HealthError {
    /// 构造 `InvalidRequest`。
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        HealthError::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// 构造 `InvalidToken`。
    pub fn invalid_token(reason: impl Into<String>) -> Self {
        HealthError::InvalidToken {
            reason: reason.into(),
        }
    }

    /// 构造 `AuthorizationUnavailable`。
    pub fn authorization_unavailable(detail: impl Into<String>) -> Self {
        HealthError::AuthorizationUnavailable {
            detail: detail.into(),
        }
    }

    /// 构造 `FilterExecution`。
    pub fn filter_execution(detail: impl Into<String>) -> Self {
        HealthError::FilterExecution {
            detail: detail.into(),
        }
    }

    /// 返回稳定错误码，供日志与指标聚合。
    pub fn code(&self) -> &'static str {
        match self {
            HealthError::InvalidRequest { .. } => "spark.health.invalid_request",
            HealthError::InvalidToken { .. } => "spark.health.invalid_token",
            HealthError::AuthorizationUnavailable { .. } => {
                "spark.health.authorization_unavailable"
            }
            HealthError::FilterExecution { .. } => "spark.health.filter_execution",
            HealthError::Store(_) => "spark.health.store",
            HealthError::Forwarding { .. } => "spark.health.forwarding",
            HealthError::Cancelled { .. } => "spark.health.cancelled",
        }
    }

    /// 判断调用方是否值得重试。
    ///
    /// - **契约 (What)**：只有求值器暂不可用或转发失败被视为可重试；请求非法、令牌非法永远不可重试；
    ///   存储错误是否可重试由传输层结合 `StoreError::code` 判断，这里保守返回 `false`。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HealthError::AuthorizationUnavailable { .. } | HealthError::Forwarding { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_is_wrapped_verbatim() {
        let err: HealthError = StoreError::new("memdb.closed", "snapshot aborted").into();
        assert_eq!(err.code(), "spark.health.store");
        assert_eq!(
            err.to_string(),
            "store failure `memdb.closed`: snapshot aborted"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn invalid_request_is_never_retryable() {
        let err = HealthError::invalid_request("must provide service name");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid request: must provide service name");
    }
}
