//! # RequestValidator：边界校验
//!
//! ## 意图（Why）
//! - 在访问存储、解析令牌之前一次性拒绝非法请求，避免为注定失败的请求付出 I/O；
//! - 输出“已校验”的查询：闭合的 [`LookupStrategy`]、对存储的读取描述、以及编译好的过滤器，
//!   之后的阶段不再重复检查形态。
//!
//! ## 契约（What）
//! - 校验顺序：形态标志 → 目标键非空 → 过滤表达式编译 → 租户作用域；
//! - 任一失败均为 `InvalidRequest`（租户校验器可能返回其自身的错误类别），无副作用；
//! - 仅由空白组成的过滤表达式等同于未提供。

use std::sync::Arc;

use crate::{
    error::HealthError,
    filter::expr::{CompiledFilter, FilterExpressionEngine},
    model::{NodeMeta, RecordShape, TenantScope},
    request::{
        ChecksInStateRequest, NodeChecksRequest, QueryOptions, ServiceChecksRequest,
        ServiceInstancesRequest,
    },
    store::{CheckQuery, CheckSelection, InstanceQuery},
    strategy::LookupStrategy,
    tenant::TenantValidator,
};

/// 已校验的检查查询。
#[derive(Clone, Debug)]
pub struct ValidatedChecks {
    pub query: CheckQuery,
    pub filter: Option<Arc<dyn CompiledFilter>>,
}

/// 已校验的服务实例查询。
///
/// - `post_node_meta`：策略未下推、需要在过滤链中执行的节点元数据谓词。
#[derive(Clone, Debug)]
pub struct ValidatedInstances {
    pub strategy: LookupStrategy,
    pub query: InstanceQuery,
    pub post_node_meta: Option<NodeMeta>,
    pub filter: Option<Arc<dyn CompiledFilter>>,
}

/// 请求校验器。
#[derive(Clone)]
pub struct RequestValidator {
    engine: Arc<dyn FilterExpressionEngine>,
    tenants: Arc<dyn TenantValidator>,
}

impl RequestValidator {
    pub fn new(
        engine: Arc<dyn FilterExpressionEngine>,
        tenants: Arc<dyn TenantValidator>,
    ) -> Self {
        Self { engine, tenants }
    }

    pub fn checks_in_state(
        &self,
        request: &ChecksInStateRequest,
    ) -> Result<ValidatedChecks, HealthError> {
        let filter = self.compile(&request.options, RecordShape::Check)?;
        self.tenant(&request.options.tenant)?;
        Ok(ValidatedChecks {
            query: CheckQuery {
                selection: CheckSelection::InState(request.state),
                node_meta: pushed(&request.node_meta),
            },
            filter,
        })
    }

    pub fn node_checks(&self, request: &NodeChecksRequest) -> Result<ValidatedChecks, HealthError> {
        require_key(&request.node, "node name")?;
        let filter = self.compile(&request.options, RecordShape::Check)?;
        self.tenant(&request.options.tenant)?;
        Ok(ValidatedChecks {
            query: CheckQuery {
                selection: CheckSelection::Node(request.node.clone()),
                node_meta: None,
            },
            filter,
        })
    }

    pub fn service_checks(
        &self,
        request: &ServiceChecksRequest,
    ) -> Result<ValidatedChecks, HealthError> {
        require_key(&request.service, "service name")?;
        let filter = self.compile(&request.options, RecordShape::Check)?;
        self.tenant(&request.options.tenant)?;
        Ok(ValidatedChecks {
            query: CheckQuery {
                selection: CheckSelection::Service(request.service.clone()),
                node_meta: pushed(&request.node_meta),
            },
            filter,
        })
    }

    pub fn service_instances(
        &self,
        request: &ServiceInstancesRequest,
    ) -> Result<ValidatedInstances, HealthError> {
        let strategy = LookupStrategy::select(request)?;
        require_key(&request.service, "service name")?;
        let filter = self.compile(&request.options, RecordShape::ServiceInstance)?;
        self.tenant(&request.options.tenant)?;
        let query = strategy.instance_query(&request.service, &request.node_meta);
        let post_node_meta = (!strategy.pushes_node_meta() && !request.node_meta.is_empty())
            .then(|| request.node_meta.clone());
        Ok(ValidatedInstances {
            strategy,
            query,
            post_node_meta,
            filter,
        })
    }

    fn compile(
        &self,
        options: &QueryOptions,
        shape: RecordShape,
    ) -> Result<Option<Arc<dyn CompiledFilter>>, HealthError> {
        match options.filter.as_deref().map(str::trim) {
            Some(expression) if !expression.is_empty() => {
                self.engine.compile(expression, shape).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn tenant(&self, scope: &TenantScope) -> Result<(), HealthError> {
        self.tenants.validate(scope)
    }
}

fn require_key(key: &str, what: &str) -> Result<(), HealthError> {
    if key.is_empty() {
        return Err(HealthError::invalid_request(format!("must provide {what}")));
    }
    Ok(())
}

fn pushed(node_meta: &NodeMeta) -> Option<NodeMeta> {
    (!node_meta.is_empty()).then(|| node_meta.clone())
}
