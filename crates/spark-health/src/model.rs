//! 健康查询的数据模型：版本令牌、租户作用域、检查与服务实例记录、查询结果。
//!
//! # 教案式说明
//! - **意图 (Why)**：所有实体都是“每次请求从存储现造的只读投影”，不在本服务内持久化或跨请求缓存；
//! - **契约 (What)**：[`QueryResult::version`] 必须等于其记录被读取时的存储版本（读快照原子性）；
//! - **架构位置 (Where)**：被 `store`、`filter`、`distance`、`endpoint` 共享，是整个链路的公共语汇。

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::Deserialize;

use crate::{error::HealthError, filter::acl::ReadTarget, filter::expr::Selectable};

/// 存储快照的单调版本令牌。
///
/// - **契约 (What)**：由存储生成，本服务只比较不生成；`ZERO` 作为请求中的最小版本表示“不阻塞”。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionToken(u64);

impl VersionToken {
    /// 零版本。
    pub const ZERO: VersionToken = VersionToken(0);

    /// 以原始计数构造。
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 读取原始计数。
    pub const fn get(self) -> u64 {
        self.0
    }

    /// 是否为零版本。
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for VersionToken {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 租户作用域（分区 + 命名空间）。
///
/// # 教案式说明
/// - **意图 (Why)**：多租户字段随每次调用传递，建模为不可变的上下文值，而非被修改的共享状态；
/// - **契约 (What)**：记录与请求在任何其他过滤之前先按作用域比对，二者必须完全相等。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantScope {
    partition: String,
    namespace: String,
}

impl TenantScope {
    /// 默认分区/命名空间名称。
    pub const DEFAULT: &'static str = "default";

    /// 构造作用域；空字符串按默认值处理。
    pub fn new(partition: impl Into<String>, namespace: impl Into<String>) -> Self {
        let partition = partition.into();
        let namespace = namespace.into();
        Self {
            partition: if partition.is_empty() {
                Self::DEFAULT.to_owned()
            } else {
                partition
            },
            namespace: if namespace.is_empty() {
                Self::DEFAULT.to_owned()
            } else {
                namespace
            },
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 是否为默认分区下的默认命名空间。
    pub fn is_default(&self) -> bool {
        self.partition == Self::DEFAULT && self.namespace == Self::DEFAULT
    }
}

impl Default for TenantScope {
    fn default() -> Self {
        Self::new(Self::DEFAULT, Self::DEFAULT)
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.partition, self.namespace)
    }
}

/// 健康检查状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl HealthStatus {
    /// 线上传输使用的小写文本。
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passing" => Ok(HealthStatus::Passing),
            "warning" => Ok(HealthStatus::Warning),
            "critical" => Ok(HealthStatus::Critical),
            "maintenance" => Ok(HealthStatus::Maintenance),
            other => Err(HealthError::invalid_request(format!(
                "unknown health status `{other}`"
            ))),
        }
    }
}

/// `ChecksInState` 的状态选择：具体状态或 `any`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CheckStateFilter {
    Any,
    Only(HealthStatus),
}

impl CheckStateFilter {
    /// 判断某个状态是否被选中。
    pub fn accepts(self, status: HealthStatus) -> bool {
        match self {
            CheckStateFilter::Any => true,
            CheckStateFilter::Only(expected) => expected == status,
        }
    }
}

impl FromStr for CheckStateFilter {
    type Err = HealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            return Ok(CheckStateFilter::Any);
        }
        s.parse().map(CheckStateFilter::Only)
    }
}

/// 节点元数据谓词，合取语义：全部键值都必须匹配。
pub type NodeMeta = BTreeMap<String, String>;

/// 判断节点元数据是否满足全部谓词。
pub fn node_meta_matches(predicates: &NodeMeta, meta: &NodeMeta) -> bool {
    predicates
        .iter()
        .all(|(key, expected)| meta.get(key) == Some(expected))
}

/// 请求的一致性模式，以及结果中“实际使用”的模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyMode {
    #[default]
    Default,
    Consistent,
    Stale,
}

impl ConsistencyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsistencyMode::Default => "default",
            ConsistencyMode::Consistent => "consistent",
            ConsistencyMode::Stale => "stale",
        }
    }
}

/// 节点描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub name: String,
    pub address: String,
    pub datacenter: String,
    pub meta: NodeMeta,
    pub tenant: TenantScope,
}

impl NodeDescriptor {
    /// 以节点名与地址构造，其余字段取默认值。
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            datacenter: String::new(),
            meta: NodeMeta::new(),
            tenant: TenantScope::default(),
        }
    }

    /// 追加一条元数据。
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_tenant(mut self, tenant: TenantScope) -> Self {
        self.tenant = tenant;
        self
    }
}

/// 服务实例类别。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    #[default]
    Typical,
    ConnectProxy,
}

impl ServiceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceKind::Typical => "",
            ServiceKind::ConnectProxy => "connect-proxy",
        }
    }
}

/// 服务描述。
///
/// - **契约 (What)**：`kind == ConnectProxy` 时 `proxy_destination` 指向被代理的服务名；
///   `connect_native` 表示实例本身即可直接接入代理网格。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub kind: ServiceKind,
    pub proxy_destination: Option<String>,
    pub connect_native: bool,
    pub port: u16,
    pub meta: BTreeMap<String, String>,
}

impl ServiceDescriptor {
    /// 构造常规服务，`id` 默认等于 `name`。
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            tags: Vec::new(),
            kind: ServiceKind::Typical,
            proxy_destination: None,
            connect_native: false,
            port: 0,
            meta: BTreeMap::new(),
        }
    }

    /// 构造面向 `destination` 的代理实例。
    pub fn proxy_for(name: impl Into<String>, destination: impl Into<String>) -> Self {
        let mut service = Self::new(name);
        service.kind = ServiceKind::ConnectProxy;
        service.proxy_destination = Some(destination.into());
        service
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn connect_native(mut self) -> Self {
        self.connect_native = true;
        self
    }

    /// 是否携带给定标签（大小写不敏感）。
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|own| own.eq_ignore_ascii_case(tag))
    }
}

/// 单条健康检查记录。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckRecord {
    pub node: String,
    pub check_id: String,
    pub name: String,
    pub status: HealthStatus,
    pub service_id: Option<String>,
    pub service_name: Option<String>,
    pub service_tags: Vec<String>,
    pub output: String,
    pub tenant: TenantScope,
}

impl CheckRecord {
    /// 构造节点级检查。
    pub fn new(node: impl Into<String>, check_id: impl Into<String>, status: HealthStatus) -> Self {
        let check_id = check_id.into();
        Self {
            node: node.into(),
            name: check_id.clone(),
            check_id,
            status,
            service_id: None,
            service_name: None,
            service_tags: Vec::new(),
            output: String::new(),
            tenant: TenantScope::default(),
        }
    }

    /// 将检查关联到某个服务实例。
    pub fn for_service(
        mut self,
        service_id: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        self.service_id = Some(service_id.into());
        self.service_name = Some(service_name.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    pub fn with_tenant(mut self, tenant: TenantScope) -> Self {
        self.tenant = tenant;
        self
    }
}

/// 服务实例及其节点、检查的联合视图。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInstanceRecord {
    pub node: NodeDescriptor,
    pub service: ServiceDescriptor,
    pub checks: Vec<CheckRecord>,
    pub tenant: TenantScope,
}

/// 查询形态：记录属于哪一类，用于编译过滤表达式时校验选择器。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordShape {
    Check,
    ServiceInstance,
}

/// 两类健康记录的公共能力。
///
/// # 教案式说明
/// - **意图 (Why)**：过滤链、距离排序只依赖这组方法，便于同一套流水线服务两类结果；
/// - **契约 (What)**：`read_targets` 返回读取该记录需要具备的全部授权目标，任一被拒即整条丢弃；
///   `node_meta` 对不携带节点元数据的记录返回 `None`。
pub trait HealthRecord: Selectable + Clone + Send + Sync + 'static {
    /// 记录形态。
    const SHAPE: RecordShape;

    /// 记录所在节点名。
    fn node_name(&self) -> &str;

    /// 记录所属租户。
    fn tenant(&self) -> &TenantScope;

    /// 节点元数据。
    fn node_meta(&self) -> Option<&NodeMeta>;

    /// 读取该记录所需的授权目标。
    fn read_targets(&self) -> Vec<ReadTarget<'_>>;
}

impl HealthRecord for CheckRecord {
    const SHAPE: RecordShape = RecordShape::Check;

    fn node_name(&self) -> &str {
        &self.node
    }

    fn tenant(&self) -> &TenantScope {
        &self.tenant
    }

    fn node_meta(&self) -> Option<&NodeMeta> {
        None
    }

    fn read_targets(&self) -> Vec<ReadTarget<'_>> {
        let mut targets = vec![ReadTarget::Node(&self.node)];
        if let Some(service) = self.service_name.as_deref() {
            targets.push(ReadTarget::Service(service));
        }
        targets
    }
}

impl HealthRecord for ServiceInstanceRecord {
    const SHAPE: RecordShape = RecordShape::ServiceInstance;

    fn node_name(&self) -> &str {
        &self.node.name
    }

    fn tenant(&self) -> &TenantScope {
        &self.tenant
    }

    fn node_meta(&self) -> Option<&NodeMeta> {
        Some(&self.node.meta)
    }

    fn read_targets(&self) -> Vec<ReadTarget<'_>> {
        vec![
            ReadTarget::Node(&self.node.name),
            ReadTarget::Service(&self.service.name),
        ]
    }
}

/// 查询结果。
///
/// - **契约 (What)**：`version` 即记录被读取时的存储版本；“超时”与“新数据”的区别只能通过它观察，
///   不提供额外标志位。
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult<R> {
    pub version: VersionToken,
    pub records: Vec<R>,
    pub consistency: ConsistencyMode,
}

impl<R> QueryResult<R> {
    /// 空结果，用于代理查询的静默拒绝。
    pub fn empty(consistency: ConsistencyMode) -> Self {
        Self {
            version: VersionToken::ZERO,
            records: Vec::new(),
            consistency,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
