//! # spark-health
//!
//! ## 定位与职责（Why）
//! - 一致性健康查询服务：面向版本化、可复制的目录存储回答“哪些服务实例/检查是健康的”；
//! - 同时提供长轮询变更通知、访问控制过滤、表达式过滤以及按网络拓扑的结果排序，
//!   四者必须以固定顺序正确组合。
//!
//! ## 架构嵌入（Where）
//! - `endpoint` 编排四个对外操作；`validate`、`strategy`、`blocking`、`filter`、`distance`、`metrics`
//!   分别承担校验、策略选择、阻塞读取、过滤链、距离排序与打点；
//! - 存储、授权、表达式引擎、坐标、指标后端、转发层都是外部协作方，以 Trait 形式接入，
//!   并各自附带一个参考实现，便于测试与单机嵌入。
//!
//! ## 使用示例（How）
//! ```no_run
//! use std::sync::Arc;
//!
//! use spark_health::{
//!     CheckStateFilter, ChecksInStateRequest, HealthEndpoint, HealthStatus, MemoryStore,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), spark_health::HealthError> {
//! let store = Arc::new(MemoryStore::new());
//! let endpoint = HealthEndpoint::builder(store).build();
//! let critical = endpoint
//!     .checks_in_state(
//!         &ChecksInStateRequest::new(CheckStateFilter::Only(HealthStatus::Critical)),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("{} critical checks at version {}", critical.len(), critical.version);
//! # Ok(())
//! # }
//! ```

/// 阻塞读取协议。
pub mod blocking;

/// 服务配置（TOML）。
pub mod config;

/// 网络距离估算与结果排序。
pub mod distance;

/// 四个查询操作的编排入口。
pub mod endpoint;

/// 错误类型与稳定错误码。
///
/// - **契约定位 (What)**：使用 `thiserror::Error` 派生，`code()` 返回 `spark.health.*`；
/// - **风险提示 (Trade-offs)**：`is_retryable` 只给出保守分类，传输层可结合上下文覆盖。
pub mod error;

/// 结果过滤链：租户守卫、节点元数据、授权、表达式。
pub mod filter;

/// 请求转发契约。
pub mod forward;

/// 查询打点。
pub mod metrics;

/// 数据模型。
pub mod model;

/// 请求与响应形态。
pub mod request;

/// 版本化存储契约与内存实现。
pub mod store;

/// 查询策略选择。
pub mod strategy;

/// 日志安装。
pub mod telemetry;

/// 租户作用域校验。
pub mod tenant;

/// 边界校验。
pub mod validate;

pub use blocking::{BlockingQueryExecutor, Observed};
pub use config::{ConfigError, HealthServiceConfig};
pub use distance::{Coordinate, CoordinateTable, DistanceEstimator, DistanceSorter, NoCoordinates};
pub use endpoint::{AGENT_REFERENCE, HealthEndpoint, HealthEndpointBuilder};
pub use error::{HealthError, StoreError};
pub use filter::{
    ResultFilterChain,
    acl::{
        AccessDecision, AclPolicy, AllowAll, AuthorizationEvaluator, Authorizer, PolicyEvaluator,
        ReadTarget,
    },
    expr::{CompiledFilter, ExpressionEngine, FieldValue, FilterExpressionEngine, Selectable},
};
pub use forward::{ForwardOutcome, Forwarder, LocalOnly};
pub use metrics::{InMemoryMetrics, MetricLabel, MetricsError, MetricsRecorder, MetricsSink, NoopMetrics};
pub use model::{
    CheckRecord, CheckStateFilter, ConsistencyMode, HealthRecord, HealthStatus, NodeDescriptor,
    NodeMeta, QueryResult, RecordShape, ServiceDescriptor, ServiceInstanceRecord, ServiceKind,
    TenantScope, VersionToken,
};
pub use request::{
    AuthToken, ChecksInStateRequest, HealthReply, HealthRequest, NodeChecksRequest, QueryOptions,
    ServiceChecksRequest, ServiceInstancesRequest,
};
pub use store::{
    ChangeWatch, CheckQuery, CheckSelection, InstanceQuery, InstanceSelection, MemoryStore,
    Snapshot, VersionedStore,
};
pub use strategy::LookupStrategy;
pub use tenant::{AnyTenant, DefaultTenantValidator, TenantValidator};
pub use validate::{RequestValidator, ValidatedChecks, ValidatedInstances};
