//! 内存版本化存储。
//!
//! # 教案式解读
//! - **意图（Why）**：为嵌入方与测试提供一个满足 [`VersionedStore`] 契约的参考实现，
//!   语义对齐真实目录存储：节点、服务实例、检查三张表，全局单调版本。
//! - **实现策略（How）**：
//!   - 表数据放在 `parking_lot::RwLock` 中，读取持读锁构造快照；
//!   - 每次提交在写锁内递增版本并通过 `tokio::sync::watch` 广播；
//!   - 读取时在读锁内订阅广播，因此读取之后的任何提交都一定会唤醒该订阅，不丢更新。
//! - **风险提示（Trade-offs）**：唤醒粒度是“整库任意变化”，与查询无关的写入也会唤醒阻塞查询，
//!   代价是一次多余的重读；执行器会比较版本后继续等待。

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::{
    ChangeWatch, CheckQuery, CheckSelection, InstanceQuery, InstanceSelection, Snapshot,
    VersionedStore,
};
use crate::{
    error::StoreError,
    model::{
        CheckRecord, NodeDescriptor, ServiceDescriptor, ServiceInstanceRecord, ServiceKind,
        TenantScope, VersionToken, node_meta_matches,
    },
};

const CODE_UNKNOWN_NODE: &str = "spark.health.store.unknown_node";
const CODE_UNKNOWN_SERVICE: &str = "spark.health.store.unknown_service";

type NodeKey = (TenantScope, String);
type EntryKey = (TenantScope, String, String);

#[derive(Debug, Default)]
struct Tables {
    version: u64,
    nodes: BTreeMap<NodeKey, NodeDescriptor>,
    services: BTreeMap<EntryKey, ServiceDescriptor>,
    checks: BTreeMap<EntryKey, CheckRecord>,
}

/// 基于内存表的 [`VersionedStore`] 实现。
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// 构造空存储，初始版本为 0。
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            tables: RwLock::new(Tables::default()),
            changes,
        }
    }

    /// 当前版本。
    pub fn version(&self) -> VersionToken {
        VersionToken::new(self.tables.read().version)
    }

    /// 注册或替换节点。
    pub fn upsert_node(&self, node: NodeDescriptor) -> VersionToken {
        let mut tables = self.tables.write();
        tables
            .nodes
            .insert((node.tenant.clone(), node.name.clone()), node);
        self.commit(&mut tables)
    }

    /// 在已注册节点上注册或替换服务实例。
    ///
    /// - **后置条件**：同一节点上绑定该服务实例的检查，其服务名与标签随之刷新。
    pub fn upsert_service(
        &self,
        node: &str,
        tenant: &TenantScope,
        service: ServiceDescriptor,
    ) -> Result<VersionToken, StoreError> {
        let mut tables = self.tables.write();
        if !tables.nodes.contains_key(&(tenant.clone(), node.to_owned())) {
            return Err(unknown_node(node, tenant));
        }
        for ((scope, owner, _), check) in tables.checks.iter_mut() {
            if scope == tenant
                && owner == node
                && check.service_id.as_deref() == Some(service.id.as_str())
            {
                check.service_name = Some(service.name.clone());
                check.service_tags = service.tags.clone();
            }
        }
        tables.services.insert(
            (tenant.clone(), node.to_owned(), service.id.clone()),
            service,
        );
        Ok(self.commit(&mut tables))
    }

    /// 注册或替换检查。
    ///
    /// - **前置条件**：检查所在节点必须存在；若关联服务，该服务实例必须已注册在同一节点上。
    /// - **后置条件**：检查的服务名与标签会按已注册的服务实例回填。
    pub fn upsert_check(&self, mut check: CheckRecord) -> Result<VersionToken, StoreError> {
        let mut tables = self.tables.write();
        let tenant = check.tenant.clone();
        if !tables
            .nodes
            .contains_key(&(tenant.clone(), check.node.clone()))
        {
            return Err(unknown_node(&check.node, &tenant));
        }
        if let Some(service_id) = check.service_id.clone() {
            let key = (tenant.clone(), check.node.clone(), service_id.clone());
            let service = tables.services.get(&key).ok_or_else(|| {
                StoreError::new(
                    CODE_UNKNOWN_SERVICE,
                    format!(
                        "service `{service_id}` is not registered on node `{}`",
                        check.node
                    ),
                )
            })?;
            check.service_name = Some(service.name.clone());
            check.service_tags = service.tags.clone();
        }
        tables.checks.insert(
            (tenant, check.node.clone(), check.check_id.clone()),
            check,
        );
        Ok(self.commit(&mut tables))
    }

    /// 删除检查；不存在时不提交新版本。
    pub fn remove_check(
        &self,
        tenant: &TenantScope,
        node: &str,
        check_id: &str,
    ) -> Option<VersionToken> {
        let mut tables = self.tables.write();
        tables
            .checks
            .remove(&(tenant.clone(), node.to_owned(), check_id.to_owned()))?;
        Some(self.commit(&mut tables))
    }

    /// 删除节点及其上的服务与检查。
    pub fn remove_node(&self, tenant: &TenantScope, node: &str) -> Option<VersionToken> {
        let mut tables = self.tables.write();
        tables.nodes.remove(&(tenant.clone(), node.to_owned()))?;
        tables
            .services
            .retain(|(scope, owner, _), _| !(scope == tenant && owner == node));
        tables
            .checks
            .retain(|(scope, owner, _), _| !(scope == tenant && owner == node));
        Some(self.commit(&mut tables))
    }

    fn commit(&self, tables: &mut Tables) -> VersionToken {
        tables.version += 1;
        // 在写锁内广播，保证持读锁订阅的读者不会错过本次提交。
        self.changes.send_replace(tables.version);
        VersionToken::new(tables.version)
    }

    fn subscribe(&self) -> Box<dyn ChangeWatch> {
        Box::new(VersionWatch {
            receiver: self.changes.subscribe(),
        })
    }
}

impl VersionedStore for MemoryStore {
    fn read_checks(
        &self,
        query: &CheckQuery,
        tenant: &TenantScope,
    ) -> Result<Snapshot<CheckRecord>, StoreError> {
        let tables = self.tables.read();
        let records = tables
            .checks
            .iter()
            .filter(|((scope, _, _), _)| scope == tenant)
            .map(|(_, check)| check)
            .filter(|check| match &query.selection {
                CheckSelection::InState(state) => state.accepts(check.status),
                CheckSelection::Node(node) => &check.node == node,
                CheckSelection::Service(service) => {
                    check.service_name.as_deref() == Some(service.as_str())
                }
            })
            .filter(|check| match &query.node_meta {
                Some(predicates) => tables
                    .nodes
                    .get(&(tenant.clone(), check.node.clone()))
                    .is_some_and(|node| node_meta_matches(predicates, &node.meta)),
                None => true,
            })
            .cloned()
            .collect();
        Ok(Snapshot::new(
            VersionToken::new(tables.version),
            records,
            self.subscribe(),
        ))
    }

    fn read_instances(
        &self,
        query: &InstanceQuery,
        tenant: &TenantScope,
    ) -> Result<Snapshot<ServiceInstanceRecord>, StoreError> {
        let tables = self.tables.read();
        let mut records = Vec::new();
        for ((scope, node_name, service_id), service) in &tables.services {
            if scope != tenant || !selects(&query.service, &query.selection, service) {
                continue;
            }
            let Some(node) = tables.nodes.get(&(scope.clone(), node_name.clone())) else {
                continue;
            };
            if let Some(predicates) = &query.node_meta {
                if !node_meta_matches(predicates, &node.meta) {
                    continue;
                }
            }
            let checks = tables
                .checks
                .iter()
                .filter(|((check_scope, owner, _), check)| {
                    check_scope == scope
                        && owner == node_name
                        && check
                            .service_id
                            .as_ref()
                            .is_none_or(|bound| bound == service_id)
                })
                .map(|(_, check)| check.clone())
                .collect();
            records.push(ServiceInstanceRecord {
                node: node.clone(),
                service: service.clone(),
                checks,
                tenant: scope.clone(),
            });
        }
        Ok(Snapshot::new(
            VersionToken::new(tables.version),
            records,
            self.subscribe(),
        ))
    }
}

fn selects(target: &str, selection: &InstanceSelection, service: &ServiceDescriptor) -> bool {
    match selection {
        InstanceSelection::All => service.name == target,
        InstanceSelection::Tagged(tags) => {
            service.name == target
                && (tags.is_empty() || tags.iter().any(|tag| service.has_tag(tag)))
        }
        InstanceSelection::Proxies => {
            (service.kind == ServiceKind::ConnectProxy
                && service.proxy_destination.as_deref() == Some(target))
                || (service.connect_native && service.name == target)
        }
    }
}

fn unknown_node(node: &str, tenant: &TenantScope) -> StoreError {
    StoreError::new(
        CODE_UNKNOWN_NODE,
        format!("node `{node}` is not registered in `{tenant}`"),
    )
}

/// 基于 `watch::Receiver` 的订阅句柄。
struct VersionWatch {
    receiver: watch::Receiver<u64>,
}

#[async_trait]
impl ChangeWatch for VersionWatch {
    async fn wait(&mut self, remaining: Duration) -> bool {
        match tokio::time::timeout(remaining, self.receiver.changed()).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                // 发送端已销毁，不会再有变化；睡满剩余预算避免执行器空转。
                tokio::time::sleep(remaining).await;
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::acl::ReadTarget,
        model::{CheckStateFilter, HealthRecord, HealthStatus},
    };

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.upsert_node(NodeDescriptor::new("a", "10.0.0.1").with_meta("env", "prod"));
        store.upsert_node(NodeDescriptor::new("b", "10.0.0.2").with_meta("env", "dev"));
        let tenant = TenantScope::default();
        store
            .upsert_service("a", &tenant, ServiceDescriptor::new("web").with_tags(["v1"]))
            .unwrap();
        store
            .upsert_service("b", &tenant, ServiceDescriptor::new("web").with_tags(["v2"]))
            .unwrap();
        store
            .upsert_service("b", &tenant, ServiceDescriptor::proxy_for("web-sidecar", "web"))
            .unwrap();
        store
            .upsert_check(CheckRecord::new("a", "serf", HealthStatus::Passing))
            .unwrap();
        store
            .upsert_check(
                CheckRecord::new("b", "web-http", HealthStatus::Critical).for_service("web", "web"),
            )
            .unwrap();
        store
    }

    #[test]
    fn every_commit_bumps_the_version() {
        let store = seeded();
        assert_eq!(store.version(), VersionToken::new(7));
        assert!(store.remove_check(&TenantScope::default(), "a", "missing").is_none());
        assert_eq!(store.version(), VersionToken::new(7));
    }

    #[test]
    fn removing_a_node_drops_its_services_and_checks() {
        let store = seeded();
        let tenant = TenantScope::default();
        assert_eq!(store.remove_node(&tenant, "b"), Some(VersionToken::new(8)));
        assert_eq!(store.remove_node(&tenant, "b"), None);
        assert_eq!(store.version(), VersionToken::new(8));

        let checks = store
            .read_checks(
                &CheckQuery {
                    selection: CheckSelection::InState(CheckStateFilter::Any),
                    node_meta: None,
                },
                &tenant,
            )
            .unwrap();
        let nodes: Vec<_> = checks.records.iter().map(|c| c.node.as_str()).collect();
        assert_eq!(nodes, vec!["a"]);

        for selection in [InstanceSelection::All, InstanceSelection::Proxies] {
            let instances = store
                .read_instances(
                    &InstanceQuery {
                        service: "web".into(),
                        selection,
                        node_meta: None,
                    },
                    &tenant,
                )
                .unwrap();
            assert!(instances.records.iter().all(|i| i.node.name != "b"));
        }
        // 节点已不存在，服务无法再挂上去。
        assert!(
            store
                .upsert_service("b", &tenant, ServiceDescriptor::new("web"))
                .is_err()
        );
    }

    #[test]
    fn renaming_a_service_rebinds_its_checks() {
        let store = seeded();
        let tenant = TenantScope::default();
        store
            .upsert_service(
                "b",
                &tenant,
                ServiceDescriptor::new("billing")
                    .with_id("web")
                    .with_tags(["v3"]),
            )
            .unwrap();

        let by_service = |name: &str| {
            store
                .read_checks(
                    &CheckQuery {
                        selection: CheckSelection::Service(name.into()),
                        node_meta: None,
                    },
                    &tenant,
                )
                .unwrap()
                .records
        };
        assert!(by_service("web").is_empty());
        let renamed = by_service("billing");
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].service_name.as_deref(), Some("billing"));
        assert_eq!(renamed[0].service_tags, vec!["v3".to_owned()]);
        // 授权目标跟随新服务名。
        assert!(
            renamed[0]
                .read_targets()
                .contains(&ReadTarget::Service("billing"))
        );
    }

    #[test]
    fn check_for_unknown_service_is_rejected() {
        let store = seeded();
        let err = store
            .upsert_check(CheckRecord::new("a", "x", HealthStatus::Passing).for_service("db", "db"))
            .unwrap_err();
        assert_eq!(err.code(), CODE_UNKNOWN_SERVICE);
    }

    #[test]
    fn checks_in_state_honours_pushed_down_node_meta() {
        let store = seeded();
        let mut meta = crate::model::NodeMeta::new();
        meta.insert("env".into(), "prod".into());
        let snapshot = store
            .read_checks(
                &CheckQuery {
                    selection: CheckSelection::InState(CheckStateFilter::Any),
                    node_meta: Some(meta),
                },
                &TenantScope::default(),
            )
            .unwrap();
        let nodes: Vec<_> = snapshot.records.iter().map(|c| c.node.as_str()).collect();
        assert_eq!(nodes, vec!["a"]);
    }

    #[test]
    fn proxy_selection_returns_sidecars_only() {
        let store = seeded();
        let snapshot = store
            .read_instances(
                &InstanceQuery {
                    service: "web".into(),
                    selection: InstanceSelection::Proxies,
                    node_meta: None,
                },
                &TenantScope::default(),
            )
            .unwrap();
        assert_eq!(snapshot.records.len(), 1);
        assert_eq!(snapshot.records[0].service.name, "web-sidecar");
    }

    #[test]
    fn instance_carries_node_and_own_service_checks() {
        let store = seeded();
        let snapshot = store
            .read_instances(
                &InstanceQuery {
                    service: "web".into(),
                    selection: InstanceSelection::Tagged(vec!["V2".into()]),
                    node_meta: None,
                },
                &TenantScope::default(),
            )
            .unwrap();
        assert_eq!(snapshot.records.len(), 1);
        let checks: Vec<_> = snapshot.records[0]
            .checks
            .iter()
            .map(|c| c.check_id.as_str())
            .collect();
        assert_eq!(checks, vec!["web-http"]);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_fires_on_commit_after_read() {
        let store = std::sync::Arc::new(seeded());
        let mut snapshot = store
            .read_checks(
                &CheckQuery {
                    selection: CheckSelection::Node("a".into()),
                    node_meta: None,
                },
                &TenantScope::default(),
            )
            .unwrap();
        let writer = std::sync::Arc::clone(&store);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            writer.upsert_node(NodeDescriptor::new("c", "10.0.0.3"));
        });
        assert!(snapshot.watch.wait(Duration::from_secs(30)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_times_out_without_commits() {
        let store = seeded();
        let mut snapshot = store
            .read_checks(
                &CheckQuery {
                    selection: CheckSelection::Node("a".into()),
                    node_meta: None,
                },
                &TenantScope::default(),
            )
            .unwrap();
        assert!(!snapshot.watch.wait(Duration::from_secs(5)).await);
    }
}
