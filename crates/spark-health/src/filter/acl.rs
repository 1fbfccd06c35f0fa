//! # 授权过滤
//!
//! ## 定位（Why）
//! - 令牌到授权器的解析、授权器对“节点/服务”读权限的判定都来自外部策略引擎；
//!   本模块定义这两层契约，并提供 [`filter_authorized`] 把判定落到记录集合上。
//! - 附带两个参考实现：关闭 ACL 时使用的 [`AllowAll`]，以及基于最长前缀规则的
//!   [`AclPolicy`] + [`PolicyEvaluator`]，供测试与嵌入方直接使用。
//!
//! ## 契约（What）
//! - 记录暴露的每个目标都必须得到 `Allow`，任一 `Deny` 即整条丢弃；
//! - 授权器执行失败统一折算为 `AuthorizationUnavailable`，不返回部分结果；
//! - 过滤是幂等的：对同一授权器连续应用两次，与应用一次结果相同。

use std::{collections::BTreeMap, collections::HashMap, fmt, sync::Arc};

use crate::{
    error::HealthError,
    model::{HealthRecord, TenantScope},
    request::AuthToken,
};

/// 读取一条记录需要具备的授权目标。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReadTarget<'a> {
    Node(&'a str),
    Service(&'a str),
}

impl fmt::Display for ReadTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadTarget::Node(name) => write!(f, "node:{name}"),
            ReadTarget::Service(name) => write!(f, "service:{name}"),
        }
    }
}

/// 授权判定结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// 已解析令牌对应的授权器。
pub trait Authorizer: Send + Sync {
    fn can_read(
        &self,
        target: &ReadTarget<'_>,
        tenant: &TenantScope,
    ) -> Result<AccessDecision, HealthError>;
}

/// 令牌解析器。
///
/// - **契约 (What)**：令牌无法识别时返回 `InvalidToken`；求值器自身不可用时返回
///   `AuthorizationUnavailable`。
pub trait AuthorizationEvaluator: Send + Sync {
    fn resolve_token(
        &self,
        token: &AuthToken,
        tenant: &TenantScope,
    ) -> Result<Arc<dyn Authorizer>, HealthError>;
}

/// 放行一切读取，对应关闭 ACL 的部署。
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_read(
        &self,
        _target: &ReadTarget<'_>,
        _tenant: &TenantScope,
    ) -> Result<AccessDecision, HealthError> {
        Ok(AccessDecision::Allow)
    }
}

impl AuthorizationEvaluator for AllowAll {
    fn resolve_token(
        &self,
        _token: &AuthToken,
        _tenant: &TenantScope,
    ) -> Result<Arc<dyn Authorizer>, HealthError> {
        Ok(Arc::new(AllowAll))
    }
}

/// 基于前缀规则的读权限策略。
///
/// # 教案式说明
/// - **契约 (What)**：节点与服务各有一组 `前缀 -> 判定` 规则，最长匹配前缀胜出；
///   空前缀匹配一切；没有任何规则匹配时使用 `default`。
/// - **风险 (Trade-offs)**：规则按作用域无关处理，租户隔离依赖过滤链第 0 阶段。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AclPolicy {
    node_rules: BTreeMap<String, AccessDecision>,
    service_rules: BTreeMap<String, AccessDecision>,
    default: AccessDecision,
}

impl AclPolicy {
    /// 未命中规则时拒绝。
    pub fn deny_by_default() -> Self {
        Self::with_default(AccessDecision::Deny)
    }

    /// 未命中规则时放行。
    pub fn allow_by_default() -> Self {
        Self::with_default(AccessDecision::Allow)
    }

    fn with_default(default: AccessDecision) -> Self {
        Self {
            node_rules: BTreeMap::new(),
            service_rules: BTreeMap::new(),
            default,
        }
    }

    pub fn node_prefix(mut self, prefix: impl Into<String>, decision: AccessDecision) -> Self {
        self.node_rules.insert(prefix.into(), decision);
        self
    }

    pub fn service_prefix(mut self, prefix: impl Into<String>, decision: AccessDecision) -> Self {
        self.service_rules.insert(prefix.into(), decision);
        self
    }

    /// 计算某个目标的判定。
    pub fn decide(&self, target: &ReadTarget<'_>) -> AccessDecision {
        let (rules, name) = match target {
            ReadTarget::Node(name) => (&self.node_rules, *name),
            ReadTarget::Service(name) => (&self.service_rules, *name),
        };
        rules
            .iter()
            .filter(|(prefix, _)| name.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, decision)| *decision)
            .unwrap_or(self.default)
    }
}

impl Authorizer for AclPolicy {
    fn can_read(
        &self,
        target: &ReadTarget<'_>,
        _tenant: &TenantScope,
    ) -> Result<AccessDecision, HealthError> {
        Ok(self.decide(target))
    }
}

/// 令牌到策略的静态映射。
///
/// - **契约 (What)**：匿名令牌使用 `anonymous` 策略（未配置时视为无效令牌）；
///   未登记的非匿名令牌返回 `InvalidToken`。
#[derive(Clone, Debug, Default)]
pub struct PolicyEvaluator {
    policies: HashMap<String, Arc<AclPolicy>>,
    anonymous: Option<Arc<AclPolicy>>,
}

impl PolicyEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为令牌登记策略。
    pub fn with_token(mut self, token: impl Into<String>, policy: AclPolicy) -> Self {
        self.policies.insert(token.into(), Arc::new(policy));
        self
    }

    /// 设置匿名访问策略。
    pub fn with_anonymous(mut self, policy: AclPolicy) -> Self {
        self.anonymous = Some(Arc::new(policy));
        self
    }
}

impl AuthorizationEvaluator for PolicyEvaluator {
    fn resolve_token(
        &self,
        token: &AuthToken,
        _tenant: &TenantScope,
    ) -> Result<Arc<dyn Authorizer>, HealthError> {
        let policy = if token.is_anonymous() {
            self.anonymous.clone()
        } else {
            self.policies.get(token.as_str()).cloned()
        };
        match policy {
            Some(policy) => Ok(policy as Arc<dyn Authorizer>),
            None if token.is_anonymous() => Err(HealthError::invalid_token(
                "anonymous access is not configured",
            )),
            None => Err(HealthError::invalid_token("token not found")),
        }
    }
}

fn decide(
    authorizer: &dyn Authorizer,
    target: &ReadTarget<'_>,
    tenant: &TenantScope,
) -> Result<AccessDecision, HealthError> {
    authorizer.can_read(target, tenant).map_err(|err| match err {
        HealthError::AuthorizationUnavailable { .. } => err,
        other => HealthError::authorization_unavailable(format!(
            "evaluating read access to {target} failed: {other}"
        )),
    })
}

/// 丢弃任一目标被拒绝的记录，保持剩余记录的相对顺序。
pub fn filter_authorized<R: HealthRecord>(
    authorizer: &dyn Authorizer,
    tenant: &TenantScope,
    records: Vec<R>,
) -> Result<Vec<R>, HealthError> {
    let mut kept = Vec::with_capacity(records.len());
    'records: for record in records {
        for target in record.read_targets() {
            if !decide(authorizer, &target, tenant)?.is_allowed() {
                continue 'records;
            }
        }
        kept.push(record);
    }
    Ok(kept)
}

/// 代理查询的前置检查：调用方能否读取目标服务本身。
pub fn proxy_target_readable(
    authorizer: &dyn Authorizer,
    service: &str,
    tenant: &TenantScope,
) -> Result<bool, HealthError> {
    decide(authorizer, &ReadTarget::Service(service), tenant).map(AccessDecision::is_allowed)
}
