//! 请求转发契约。
//!
//! - **意图 (Why)**：跨数据中心或需要领导者处理的请求，在本地执行之前交给 RPC 层转发；
//!   传输细节不属于本服务，这里只定义转发结果的形态。
//! - **契约 (What)**：`Local` 表示由本节点继续执行；`Handled` 携带远端产出的响应或错误，
//!   调用方必须原样返回，不再执行任何本地阶段。

use async_trait::async_trait;

use crate::{
    error::HealthError,
    request::{HealthReply, HealthRequest},
};

/// 转发决策结果。
#[derive(Clone, Debug, PartialEq)]
pub enum ForwardOutcome {
    Local,
    Handled(Result<HealthReply, HealthError>),
}

/// 请求转发器。
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: &HealthRequest) -> ForwardOutcome;
}

/// 单机部署：所有请求都在本地执行。
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalOnly;

#[async_trait]
impl Forwarder for LocalOnly {
    async fn forward(&self, _request: &HealthRequest) -> ForwardOutcome {
        ForwardOutcome::Local
    }
}
