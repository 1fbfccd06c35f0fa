//! 对外暴露的请求/响应形态。
//!
//! 这里的类型是“线上形态”：允许出现互斥标志同时为真等非法组合，交由
//! [`crate::validate::RequestValidator`] 在边界处一次性收敛为强类型的查询。

use std::{fmt, time::Duration};

use crate::model::{
    CheckRecord, CheckStateFilter, ConsistencyMode, NodeMeta, QueryResult,
    ServiceInstanceRecord, TenantScope, VersionToken,
};

/// 授权令牌。`Debug` 输出脱敏，避免令牌进入日志。
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// 匿名令牌（空串）。
    pub fn anonymous() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("AuthToken(anonymous)")
        } else {
            f.write_str("AuthToken(<redacted>)")
        }
    }
}

/// 所有操作共享的查询选项。
///
/// # 教案式说明
/// - **契约 (What)**：
///   - `min_version == 0` 表示不阻塞；
///   - `max_wait == 0` 表示使用服务配置的默认等待时长，最终等待时间会被配置上限截断；
///   - `near` 为距离排序参考节点，`"_agent"` 代表本地节点；
///   - `filter` 为布尔过滤表达式源码。
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub tenant: TenantScope,
    pub token: AuthToken,
    pub min_version: VersionToken,
    pub max_wait: Duration,
    pub consistency: ConsistencyMode,
    pub filter: Option<String>,
    pub near: Option<String>,
}

impl QueryOptions {
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = AuthToken::new(token);
        self
    }

    pub fn with_tenant(mut self, tenant: TenantScope) -> Self {
        self.tenant = tenant;
        self
    }

    /// 设置阻塞参数：最小版本与最长等待。
    pub fn blocking(mut self, min_version: impl Into<VersionToken>, max_wait: Duration) -> Self {
        self.min_version = min_version.into();
        self.max_wait = max_wait;
        self
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(expression.into());
        self
    }

    pub fn near(mut self, node: impl Into<String>) -> Self {
        self.near = Some(node.into());
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyMode) -> Self {
        self.consistency = consistency;
        self
    }
}

/// `ChecksInState` 请求。
#[derive(Clone, Debug)]
pub struct ChecksInStateRequest {
    pub state: CheckStateFilter,
    pub node_meta: NodeMeta,
    pub options: QueryOptions,
}

impl ChecksInStateRequest {
    pub fn new(state: CheckStateFilter) -> Self {
        Self {
            state,
            node_meta: NodeMeta::new(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_node_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_meta.insert(key.into(), value.into());
        self
    }
}

/// `NodeChecks` 请求。
#[derive(Clone, Debug)]
pub struct NodeChecksRequest {
    pub node: String,
    pub options: QueryOptions,
}

impl NodeChecksRequest {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// `ServiceChecks` 请求。
#[derive(Clone, Debug)]
pub struct ServiceChecksRequest {
    pub service: String,
    pub node_meta: NodeMeta,
    pub options: QueryOptions,
}

impl ServiceChecksRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            node_meta: NodeMeta::new(),
            options: QueryOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_node_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_meta.insert(key.into(), value.into());
        self
    }
}

/// `ServiceInstances` 请求。
///
/// # 教案式说明
/// - **意图 (Why)**：保留线上兼容字段：`legacy_tag` 为旧版客户端填写的单个标签，
///   `tags` 为新版标签集合；`tag_filter` 与 `proxy_only` 是互斥的形态标志。
/// - **契约 (What)**：二者同时为真时请求必然被拒绝（`InvalidRequest`），与其余字段无关。
#[derive(Clone, Debug, Default)]
pub struct ServiceInstancesRequest {
    pub service: String,
    pub legacy_tag: Option<String>,
    pub tags: Vec<String>,
    pub tag_filter: bool,
    pub proxy_only: bool,
    pub node_meta: NodeMeta,
    pub options: QueryOptions,
}

impl ServiceInstancesRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// 打开标签过滤并设置标签集合。
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_filter = true;
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// 打开标签过滤并设置旧版单标签。
    pub fn with_legacy_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag_filter = true;
        self.legacy_tag = Some(tag.into());
        self
    }

    /// 只查询目标服务的代理实例。
    pub fn proxy_only(mut self) -> Self {
        self.proxy_only = true;
        self
    }

    pub fn with_node_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.node_meta.insert(key.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// 可被转发的请求集合。
#[derive(Clone, Debug)]
pub enum HealthRequest {
    ChecksInState(ChecksInStateRequest),
    NodeChecks(NodeChecksRequest),
    ServiceChecks(ServiceChecksRequest),
    ServiceInstances(ServiceInstancesRequest),
}

impl HealthRequest {
    /// RPC 方法名，用于转发与日志。
    pub fn operation(&self) -> &'static str {
        match self {
            HealthRequest::ChecksInState(_) => "Health.ChecksInState",
            HealthRequest::NodeChecks(_) => "Health.NodeChecks",
            HealthRequest::ServiceChecks(_) => "Health.ServiceChecks",
            HealthRequest::ServiceInstances(_) => "Health.ServiceNodes",
        }
    }
}

/// 远端或本地产出的响应。
#[derive(Clone, Debug, PartialEq)]
pub enum HealthReply {
    Checks(QueryResult<CheckRecord>),
    Instances(QueryResult<ServiceInstanceRecord>),
}
