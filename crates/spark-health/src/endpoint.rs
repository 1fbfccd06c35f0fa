//! # HealthEndpoint：四个健康查询操作的编排
//!
//! ## 意图（Why）
//! - 把校验、转发、令牌解析、策略选择、阻塞读取、过滤链、距离排序、指标打点按固定顺序串起来；
//! - 各阶段都是可替换的协作方（存储、授权、表达式、坐标、指标、转发），这里只负责编排。
//!
//! ## 流程（How）
//! `RequestValidator → Forwarder → resolve_token → (代理前置授权) → BlockingQueryExecutor
//!  → ResultFilterChain → DistanceSorter → MetricsRecorder`，只有执行器会挂起。
//!
//! ## 契约（What）
//! - `InvalidRequest` 一定在转发与存储访问之前产生；
//! - 转发层已处理的请求原样返回其响应或错误；
//! - 代理查询在调用方无权读取目标服务时返回空的成功结果（版本为 0），不触达存储，也不打点；
//! - `NodeChecks` 不做距离排序；
//! - 任一阶段失败都丢弃已计算的中间结果。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::{
    blocking::{BlockingQueryExecutor, Observed},
    config::HealthServiceConfig,
    distance::{DistanceEstimator, DistanceSorter, NoCoordinates},
    error::{HealthError, StoreError},
    filter::{
        ResultFilterChain,
        acl::{self, AllowAll, AuthorizationEvaluator},
        expr::{ExpressionEngine, FilterExpressionEngine},
    },
    forward::{ForwardOutcome, Forwarder, LocalOnly},
    metrics::{MetricsRecorder, MetricsSink, NoopMetrics},
    model::{CheckRecord, CheckStateFilter, ConsistencyMode, QueryResult, ServiceInstanceRecord},
    request::{
        ChecksInStateRequest, HealthReply, HealthRequest, NodeChecksRequest, QueryOptions,
        ServiceChecksRequest, ServiceInstancesRequest,
    },
    store::{Snapshot, VersionedStore},
    strategy::LookupStrategy,
    tenant::{DefaultTenantValidator, TenantValidator},
    validate::{RequestValidator, ValidatedChecks},
};

/// 代表本地节点的参考节点名。
pub const AGENT_REFERENCE: &str = "_agent";

/// 健康查询服务。
///
/// 无跨请求的可变状态，可被多个任务并发共享（`Arc<HealthEndpoint>`）。
pub struct HealthEndpoint {
    store: Arc<dyn VersionedStore>,
    authorization: Arc<dyn AuthorizationEvaluator>,
    validator: RequestValidator,
    distances: Arc<dyn DistanceEstimator>,
    metrics: Arc<dyn MetricsSink>,
    forwarder: Arc<dyn Forwarder>,
    config: HealthServiceConfig,
}

impl HealthEndpoint {
    /// 以存储为必选项创建构建器，其余协作方取开源版默认实现。
    pub fn builder(store: Arc<dyn VersionedStore>) -> HealthEndpointBuilder {
        HealthEndpointBuilder {
            store,
            authorization: Arc::new(AllowAll),
            engine: Arc::new(ExpressionEngine),
            tenants: Arc::new(DefaultTenantValidator),
            distances: Arc::new(NoCoordinates),
            metrics: Arc::new(NoopMetrics),
            forwarder: Arc::new(LocalOnly),
            config: HealthServiceConfig::default(),
        }
    }

    pub fn config(&self) -> &HealthServiceConfig {
        &self.config
    }

    /// 查询处于给定状态（或任意状态）的检查。
    pub async fn checks_in_state(
        &self,
        request: &ChecksInStateRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<CheckRecord>, HealthError> {
        const OPERATION: &str = "Health.ChecksInState";
        let state = match request.state {
            CheckStateFilter::Any => "any",
            CheckStateFilter::Only(status) => status.as_str(),
        };
        let span = info_span!("health.query", operation = OPERATION, target = state);
        async {
            let validated = self.validator.checks_in_state(request)?;
            if let Some(reply) = self
                .forward(HealthRequest::ChecksInState(request.clone()))
                .await
            {
                return expect_checks(reply?);
            }
            self.run_checks(OPERATION, &request.options, validated, true, cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// 查询某节点上的全部检查。
    pub async fn node_checks(
        &self,
        request: &NodeChecksRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<CheckRecord>, HealthError> {
        const OPERATION: &str = "Health.NodeChecks";
        let span = info_span!("health.query", operation = OPERATION, target = %request.node);
        async {
            let validated = self.validator.node_checks(request)?;
            if let Some(reply) = self
                .forward(HealthRequest::NodeChecks(request.clone()))
                .await
            {
                return expect_checks(reply?);
            }
            self.run_checks(OPERATION, &request.options, validated, false, cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// 查询关联到某服务的全部检查。
    pub async fn service_checks(
        &self,
        request: &ServiceChecksRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<CheckRecord>, HealthError> {
        const OPERATION: &str = "Health.ServiceChecks";
        let span = info_span!("health.query", operation = OPERATION, target = %request.service);
        async {
            let validated = self.validator.service_checks(request)?;
            if let Some(reply) = self
                .forward(HealthRequest::ServiceChecks(request.clone()))
                .await
            {
                return expect_checks(reply?);
            }
            self.run_checks(OPERATION, &request.options, validated, true, cancel)
                .await
        }
        .instrument(span)
        .await
    }

    /// 查询服务实例（含节点与检查）。
    pub async fn service_instances(
        &self,
        request: &ServiceInstancesRequest,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<ServiceInstanceRecord>, HealthError> {
        const OPERATION: &str = "Health.ServiceNodes";
        let span = info_span!(
            "health.query",
            operation = OPERATION,
            target = %request.service,
            shape = tracing::field::Empty
        );
        let current = span.clone();
        async {
            let validated = self.validator.service_instances(request)?;
            current.record("shape", validated.strategy.label());
            if let Some(reply) = self
                .forward(HealthRequest::ServiceInstances(request.clone()))
                .await
            {
                return expect_instances(reply?);
            }

            let options = &request.options;
            let consistency = self.consistency(options);
            let authorizer = self
                .authorization
                .resolve_token(&options.token, &options.tenant)?;

            if validated.strategy == LookupStrategy::ProxyScoped
                && !acl::proxy_target_readable(
                    authorizer.as_ref(),
                    &request.service,
                    &options.tenant,
                )?
            {
                debug!(
                    service = %request.service,
                    "caller cannot read proxy target, returning empty result"
                );
                return Ok(QueryResult::empty(consistency));
            }

            let observed = self
                .execute(OPERATION, options, cancel, || {
                    self.store.read_instances(&validated.query, &options.tenant)
                })
                .await?;

            let mut records = ResultFilterChain::new(&options.tenant, authorizer.as_ref())
                .with_node_meta(validated.post_node_meta.as_ref())
                .with_filter(validated.filter.as_deref())
                .run(observed.records)?;
            DistanceSorter.sort(
                self.distances.as_ref(),
                self.reference(options),
                &mut records,
            );

            MetricsRecorder::new(self.metrics.as_ref()).record_instances(
                &request.service,
                &validated.strategy,
                request.legacy_tag.as_deref(),
                &request.tags,
                records.len(),
            );

            Ok::<_, HealthError>(QueryResult {
                version: observed.version,
                records,
                consistency,
            })
        }
        .instrument(span)
        .await
    }

    async fn run_checks(
        &self,
        operation: &'static str,
        options: &QueryOptions,
        validated: ValidatedChecks,
        sort_by_distance: bool,
        cancel: &CancellationToken,
    ) -> Result<QueryResult<CheckRecord>, HealthError> {
        let consistency = self.consistency(options);
        let authorizer = self
            .authorization
            .resolve_token(&options.token, &options.tenant)?;

        let observed = self
            .execute(operation, options, cancel, || {
                self.store.read_checks(&validated.query, &options.tenant)
            })
            .await?;

        let mut records = ResultFilterChain::new(&options.tenant, authorizer.as_ref())
            .with_filter(validated.filter.as_deref())
            .run(observed.records)?;
        if sort_by_distance {
            DistanceSorter.sort(
                self.distances.as_ref(),
                self.reference(options),
                &mut records,
            );
        }

        Ok(QueryResult {
            version: observed.version,
            records,
            consistency,
        })
    }

    async fn execute<R, F>(
        &self,
        operation: &'static str,
        options: &QueryOptions,
        cancel: &CancellationToken,
        read: F,
    ) -> Result<Observed<R>, HealthError>
    where
        F: FnMut() -> Result<Snapshot<R>, StoreError>,
    {
        let max_wait = self.config.effective_wait(options.max_wait);
        BlockingQueryExecutor::new(operation)
            .run(options.min_version, max_wait, cancel, read)
            .await
    }

    /// 转发层已处理时返回其结果。
    async fn forward(&self, request: HealthRequest) -> Option<Result<HealthReply, HealthError>> {
        match self.forwarder.forward(&request).await {
            ForwardOutcome::Local => None,
            ForwardOutcome::Handled(reply) => {
                debug!(operation = request.operation(), "request handled by forwarder");
                Some(reply)
            }
        }
    }

    fn consistency(&self, options: &QueryOptions) -> ConsistencyMode {
        let requested = match options.consistency {
            ConsistencyMode::Default => self.config.default_consistency,
            explicit => explicit,
        };
        self.store.effective_consistency(requested)
    }

    /// 解析距离排序的参考节点；`_agent` 指向配置中的本地节点。
    fn reference<'a>(&'a self, options: &'a QueryOptions) -> Option<&'a str> {
        match options.near.as_deref() {
            None | Some("") => None,
            Some(AGENT_REFERENCE) => self.config.local_node.as_deref(),
            Some(node) => Some(node),
        }
    }
}

fn expect_checks(reply: HealthReply) -> Result<QueryResult<CheckRecord>, HealthError> {
    match reply {
        HealthReply::Checks(result) => Ok(result),
        HealthReply::Instances(_) => Err(HealthError::Forwarding {
            detail: "forwarded reply carried service instances where checks were expected"
                .to_owned(),
        }),
    }
}

fn expect_instances(
    reply: HealthReply,
) -> Result<QueryResult<ServiceInstanceRecord>, HealthError> {
    match reply {
        HealthReply::Instances(result) => Ok(result),
        HealthReply::Checks(_) => Err(HealthError::Forwarding {
            detail: "forwarded reply carried checks where service instances were expected"
                .to_owned(),
        }),
    }
}

/// [`HealthEndpoint`] 构建器。
pub struct HealthEndpointBuilder {
    store: Arc<dyn VersionedStore>,
    authorization: Arc<dyn AuthorizationEvaluator>,
    engine: Arc<dyn FilterExpressionEngine>,
    tenants: Arc<dyn TenantValidator>,
    distances: Arc<dyn DistanceEstimator>,
    metrics: Arc<dyn MetricsSink>,
    forwarder: Arc<dyn Forwarder>,
    config: HealthServiceConfig,
}

impl HealthEndpointBuilder {
    pub fn authorization(mut self, evaluator: Arc<dyn AuthorizationEvaluator>) -> Self {
        self.authorization = evaluator;
        self
    }

    pub fn expression_engine(mut self, engine: Arc<dyn FilterExpressionEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn tenant_validator(mut self, validator: Arc<dyn TenantValidator>) -> Self {
        self.tenants = validator;
        self
    }

    pub fn distances(mut self, estimator: Arc<dyn DistanceEstimator>) -> Self {
        self.distances = estimator;
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn forwarder(mut self, forwarder: Arc<dyn Forwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn config(mut self, config: HealthServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> HealthEndpoint {
        HealthEndpoint {
            store: self.store,
            authorization: self.authorization,
            validator: RequestValidator::new(self.engine, self.tenants),
            distances: self.distances,
            metrics: self.metrics,
            forwarder: self.forwarder,
            config: self.config,
        }
    }
}
