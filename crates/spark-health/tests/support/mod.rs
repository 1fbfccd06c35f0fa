//! 集成测试共享夹具。

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use spark_health::{
    ChangeWatch, CheckQuery, CheckRecord, ForwardOutcome, Forwarder, HealthRequest, HealthStatus,
    InstanceQuery, MemoryStore, NodeDescriptor, ServiceDescriptor, ServiceInstanceRecord,
    Snapshot, StoreError, TenantScope, VersionToken, VersionedStore,
};

/// 版本 5 的目录：节点 a、b、c；a 上检查通过，b 上检查失败。
pub fn scenario_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.upsert_node(NodeDescriptor::new("a", "10.0.0.1"));
    store.upsert_node(NodeDescriptor::new("b", "10.0.0.2"));
    store.upsert_node(NodeDescriptor::new("c", "10.0.0.3"));
    store
        .upsert_check(CheckRecord::new("a", "serf", HealthStatus::Passing))
        .expect("node a registered");
    store
        .upsert_check(CheckRecord::new("b", "serf", HealthStatus::Critical))
        .expect("node b registered");
    assert_eq!(store.version(), VersionToken::new(5));
    store
}

/// 服务目录：
/// - `web` 在 n1（v1, prod）、n2（v2, staging）、n3（v1, prod）上各一个实例；
/// - `web-sidecar` 代理 `web`，位于 n2；
/// - `db` 位于 n3（原生接入）；
/// - 每个 `web` 实例带一个服务检查，n2 的检查失败。
pub fn catalog_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let tenant = TenantScope::default();
    for (node, address, env) in [
        ("n1", "10.0.1.1", "prod"),
        ("n2", "10.0.1.2", "staging"),
        ("n3", "10.0.1.3", "prod"),
    ] {
        store.upsert_node(
            NodeDescriptor::new(node, address)
                .with_meta("env", env)
                .with_meta("rack", format!("rack-{node}")),
        );
    }
    for (node, tag, status) in [
        ("n1", "v1", HealthStatus::Passing),
        ("n2", "v2", HealthStatus::Critical),
        ("n3", "v1", HealthStatus::Passing),
    ] {
        store
            .upsert_service(
                node,
                &tenant,
                ServiceDescriptor::new("web").with_tags([tag]).with_port(8080),
            )
            .expect("node registered");
        store
            .upsert_check(
                CheckRecord::new(node, "web-http", status)
                    .for_service("web", "web")
                    .with_output(format!("GET / on {node}")),
            )
            .expect("service registered");
    }
    store
        .upsert_service(
            "n2",
            &tenant,
            ServiceDescriptor::proxy_for("web-sidecar", "web").with_port(21000),
        )
        .expect("node registered");
    store
        .upsert_service(
            "n3",
            &tenant,
            ServiceDescriptor::new("db").connect_native().with_port(5432),
        )
        .expect("node registered");
    store
}

/// 从不触发的订阅句柄：睡满剩余预算。
pub struct SilentWatch;

#[async_trait]
impl ChangeWatch for SilentWatch {
    async fn wait(&mut self, remaining: Duration) -> bool {
        tokio::time::sleep(remaining).await;
        false
    }
}

/// 返回固定快照并统计读取次数的存储。
pub struct ScriptedStore {
    pub version: VersionToken,
    pub checks: Vec<CheckRecord>,
    pub instances: Vec<ServiceInstanceRecord>,
    pub failure: Option<StoreError>,
    pub reads: AtomicUsize,
}

impl ScriptedStore {
    pub fn with_checks(version: u64, checks: Vec<CheckRecord>) -> Self {
        Self {
            version: VersionToken::new(version),
            checks,
            instances: Vec::new(),
            failure: None,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn with_instances(version: u64, instances: Vec<ServiceInstanceRecord>) -> Self {
        Self {
            instances,
            ..Self::with_checks(version, Vec::new())
        }
    }

    pub fn failing(error: StoreError) -> Self {
        Self {
            failure: Some(error),
            ..Self::with_checks(1, Vec::new())
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl VersionedStore for ScriptedStore {
    fn read_checks(
        &self,
        _query: &CheckQuery,
        _tenant: &TenantScope,
    ) -> Result<Snapshot<CheckRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(Snapshot::new(
            self.version,
            self.checks.clone(),
            Box::new(SilentWatch),
        ))
    }

    fn read_instances(
        &self,
        _query: &InstanceQuery,
        _tenant: &TenantScope,
    ) -> Result<Snapshot<ServiceInstanceRecord>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        Ok(Snapshot::new(
            self.version,
            self.instances.clone(),
            Box::new(SilentWatch),
        ))
    }
}

/// 记录收到的请求并返回预设结果的转发器。
pub struct RecordingForwarder {
    pub outcome: ForwardOutcome,
    pub seen: Mutex<Vec<&'static str>>,
}

impl RecordingForwarder {
    pub fn new(outcome: ForwardOutcome) -> Self {
        Self {
            outcome,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<&'static str> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Forwarder for RecordingForwarder {
    async fn forward(&self, request: &HealthRequest) -> ForwardOutcome {
        self.seen.lock().push(request.operation());
        self.outcome.clone()
    }
}

pub fn node_names(records: &[ServiceInstanceRecord]) -> Vec<&str> {
    records.iter().map(|record| record.node.name.as_str()).collect()
}

pub fn check_nodes(records: &[CheckRecord]) -> Vec<&str> {
    records.iter().map(|record| record.node.as_str()).collect()
}
