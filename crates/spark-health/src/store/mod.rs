//! # store：版本化存储契约
//!
//! ## 定位与职责（Why）
//! - 本服务只“读”存储：每次读取得到一份一致快照、对应的版本令牌，以及一个可等待“下一次变化”的
//!   订阅句柄；
//! - 读取与等待被拆成两个显式操作（快照读取 + 返回的 [`ChangeWatch`]），而非把等待嵌在读取里，
//!   这样测试可以用简单的假实现分别驱动两者。
//!
//! ## 契约（What）
//! - 同一次读取内保证快照隔离；版本令牌单调不减；
//! - 句柄在读取时刻登记，读取之后发生的任何提交都必须能唤醒它（不丢更新）。
//!
//! ## 模块结构（How）
//! - 本文件定义查询描述与 Trait；
//! - [`memory`] 提供基于 `parking_lot::RwLock` + `tokio::sync::watch` 的内存参考实现。

use std::{fmt, time::Duration};

use async_trait::async_trait;

use crate::{
    error::StoreError,
    model::{
        CheckRecord, CheckStateFilter, ConsistencyMode, NodeMeta, ServiceInstanceRecord,
        TenantScope, VersionToken,
    },
};

pub mod memory;

pub use memory::MemoryStore;

/// 检查记录的读取方式。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CheckSelection {
    /// 按状态读取（`any` 表示全部）。
    InState(CheckStateFilter),
    /// 读取某节点上的全部检查。
    Node(String),
    /// 读取关联到某服务名的全部检查。
    Service(String),
}

/// 检查读取描述；`node_meta` 为下推到存储层的节点元数据谓词。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckQuery {
    pub selection: CheckSelection,
    pub node_meta: Option<NodeMeta>,
}

/// 服务实例的读取方式，与查询策略一一对应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstanceSelection {
    /// 按服务名读取全部实例。
    All,
    /// 标签集合与给定标签有交集的实例；空集合不施加约束。
    Tagged(Vec<String>),
    /// 目标服务的代理实例（代理类实例与原生接入实例）。
    Proxies,
}

/// 服务实例读取描述。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstanceQuery {
    pub service: String,
    pub selection: InstanceSelection,
    pub node_meta: Option<NodeMeta>,
}

/// 变更订阅句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：阻塞查询靠它“协作式挂起”，不忙轮询；
/// - **契约 (What)**：`wait` 在存储发生变化时返回 `true`，在 `remaining` 耗尽时返回 `false`；
///   两者都未发生时不应提前返回，否则执行器会空转。
#[async_trait]
pub trait ChangeWatch: Send {
    /// 最多等待 `remaining`，返回是否观察到变化。
    async fn wait(&mut self, remaining: Duration) -> bool;
}

/// 一次快照读取的结果。
pub struct Snapshot<R> {
    pub version: VersionToken,
    pub records: Vec<R>,
    pub watch: Box<dyn ChangeWatch>,
}

impl<R> Snapshot<R> {
    pub fn new(version: VersionToken, records: Vec<R>, watch: Box<dyn ChangeWatch>) -> Self {
        Self {
            version,
            records,
            watch,
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for Snapshot<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}

/// 版本化存储。
///
/// - **契约 (What)**：读取只针对调用方租户；错误原样返回，本服务不重试；
///   `effective_consistency` 报告本次读取实际采用的一致性模式（默认即请求值）。
pub trait VersionedStore: Send + Sync {
    fn read_checks(
        &self,
        query: &CheckQuery,
        tenant: &TenantScope,
    ) -> Result<Snapshot<CheckRecord>, StoreError>;

    fn read_instances(
        &self,
        query: &InstanceQuery,
        tenant: &TenantScope,
    ) -> Result<Snapshot<ServiceInstanceRecord>, StoreError>;

    fn effective_consistency(&self, requested: ConsistencyMode) -> ConsistencyMode {
        requested
    }
}
