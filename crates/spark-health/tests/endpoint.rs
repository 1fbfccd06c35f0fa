//! 端到端查询场景：校验、转发、授权、过滤、排序、打点的组合行为。

mod support;

use std::sync::Arc;

use spark_health::{
    AccessDecision, AclPolicy, AnyTenant, CheckRecord, CheckStateFilter, ChecksInStateRequest,
    ConsistencyMode, Coordinate, CoordinateTable, ForwardOutcome, HealthEndpoint, HealthError,
    HealthReply, HealthServiceConfig, HealthStatus, InMemoryMetrics, NodeChecksRequest,
    NodeDescriptor, PolicyEvaluator, QueryOptions, QueryResult, ServiceChecksRequest,
    ServiceDescriptor, ServiceInstanceRecord, ServiceInstancesRequest, StoreError, TenantScope,
    VersionToken,
};
use support::{
    RecordingForwarder, ScriptedStore, catalog_store, check_nodes, node_names, scenario_store,
};
use tokio_util::sync::CancellationToken;

fn cancel() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test]
async fn critical_checks_are_returned_at_store_version() {
    let endpoint = HealthEndpoint::builder(scenario_store()).build();
    let result = endpoint
        .checks_in_state(
            &ChecksInStateRequest::new(CheckStateFilter::Only(HealthStatus::Critical)),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(result.version, VersionToken::new(5));
    assert_eq!(check_nodes(&result.records), vec!["b"]);
    assert_eq!(result.consistency, ConsistencyMode::Default);
}

#[tokio::test]
async fn any_state_selects_every_check() {
    let endpoint = HealthEndpoint::builder(scenario_store()).build();
    let result = endpoint
        .checks_in_state(&ChecksInStateRequest::new(CheckStateFilter::Any), &cancel())
        .await
        .unwrap();
    assert_eq!(check_nodes(&result.records), vec!["a", "b"]);
}

#[tokio::test]
async fn status_filter_keeps_passing_checks_regardless_of_input_order() {
    let passing = CheckRecord::new("a", "serf", HealthStatus::Passing);
    let warning = CheckRecord::new("b", "serf", HealthStatus::Warning);
    for records in [
        vec![passing.clone(), warning.clone()],
        vec![warning.clone(), passing.clone()],
    ] {
        let store = Arc::new(ScriptedStore::with_checks(3, records));
        let endpoint = HealthEndpoint::builder(store).build();
        let result = endpoint
            .checks_in_state(
                &ChecksInStateRequest::new(CheckStateFilter::Any)
                    .with_options(QueryOptions::default().with_filter(r#"Status == "passing""#)),
                &cancel(),
            )
            .await
            .unwrap();
        assert_eq!(result.records, vec![passing.clone()]);
    }
}

#[tokio::test]
async fn contradictory_shape_flags_never_touch_the_store() {
    let store = Arc::new(ScriptedStore::with_instances(1, Vec::new()));
    let forwarder = Arc::new(RecordingForwarder::new(ForwardOutcome::Local));
    let endpoint = HealthEndpoint::builder(store.clone())
        .forwarder(forwarder.clone())
        .build();
    let request = ServiceInstancesRequest::new("web").with_tags(["v1"]).proxy_only();
    let err = endpoint
        .service_instances(&request, &cancel())
        .await
        .unwrap_err();
    assert!(matches!(err, HealthError::InvalidRequest { .. }));
    assert_eq!(store.reads(), 0);
    assert!(forwarder.seen().is_empty());
}

#[tokio::test]
async fn empty_target_keys_are_invalid() {
    let endpoint = HealthEndpoint::builder(scenario_store()).build();
    assert!(matches!(
        endpoint.node_checks(&NodeChecksRequest::new(""), &cancel()).await,
        Err(HealthError::InvalidRequest { .. })
    ));
    assert!(matches!(
        endpoint
            .service_checks(&ServiceChecksRequest::new(""), &cancel())
            .await,
        Err(HealthError::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn proxy_query_for_unreadable_service_is_silently_empty() {
    let store = Arc::new(ScriptedStore::with_instances(9, Vec::new()));
    let metrics = Arc::new(InMemoryMetrics::new());
    let evaluator = PolicyEvaluator::new().with_token(
        "viewer",
        AclPolicy::allow_by_default().service_prefix("web", AccessDecision::Deny),
    );
    let endpoint = HealthEndpoint::builder(store.clone())
        .authorization(Arc::new(evaluator))
        .metrics(metrics.clone())
        .build();
    let request = ServiceInstancesRequest::new("web")
        .proxy_only()
        .with_options(QueryOptions::default().with_token("viewer"));
    let result = endpoint.service_instances(&request, &cancel()).await.unwrap();
    assert_eq!(result, QueryResult::empty(ConsistencyMode::Default));
    assert_eq!(store.reads(), 0);
    assert!(metrics.snapshot().is_empty());
}

#[tokio::test]
async fn proxy_query_returns_sidecars_and_connect_metrics() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let endpoint = HealthEndpoint::builder(catalog_store())
        .metrics(metrics.clone())
        .build();
    let result = endpoint
        .service_instances(&ServiceInstancesRequest::new("web").proxy_only(), &cancel())
        .await
        .unwrap();
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].service.name, "web-sidecar");
    assert_eq!(
        metrics.counter("health.connect.query", &[("service", "web"), ("shape", "proxy")]),
        1
    );

    let native = endpoint
        .service_instances(&ServiceInstancesRequest::new("db").proxy_only(), &cancel())
        .await
        .unwrap();
    assert_eq!(node_names(&native.records), vec!["n3"]);
}

#[tokio::test]
async fn unknown_token_is_surfaced() {
    let endpoint = HealthEndpoint::builder(scenario_store())
        .authorization(Arc::new(PolicyEvaluator::new()))
        .build();
    let request = NodeChecksRequest::new("a")
        .with_options(QueryOptions::default().with_token("forged"));
    assert!(matches!(
        endpoint.node_checks(&request, &cancel()).await,
        Err(HealthError::InvalidToken { .. })
    ));
}

#[tokio::test]
async fn filter_never_sees_unauthorized_records() {
    let evaluator = PolicyEvaluator::new().with_token(
        "ops",
        AclPolicy::allow_by_default().node_prefix("n2", AccessDecision::Deny),
    );
    let endpoint = HealthEndpoint::builder(catalog_store())
        .authorization(Arc::new(evaluator))
        .build();
    // 只有 n2 的检查失败；授权先剔除 n2，表达式因此看不到任何失败实例。
    let request = ServiceInstancesRequest::new("web").with_options(
        QueryOptions::default()
            .with_token("ops")
            .with_filter(r#"Checks.Status == "critical""#),
    );
    let result = endpoint.service_instances(&request, &cancel()).await.unwrap();
    assert!(result.records.is_empty());
}

#[tokio::test]
async fn tag_scoped_lookup_applies_node_meta_in_the_filter_chain() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let endpoint = HealthEndpoint::builder(catalog_store())
        .metrics(metrics.clone())
        .build();
    let request = ServiceInstancesRequest::new("web")
        .with_tags(["v1", "v2"])
        .with_node_meta("env", "prod");
    let result = endpoint.service_instances(&request, &cancel()).await.unwrap();
    assert_eq!(node_names(&result.records), vec!["n1", "n3"]);
    assert_eq!(
        metrics.counter(
            "health.service.query-tags",
            &[("service", "web"), ("tag", "v1"), ("tag", "v2")]
        ),
        1
    );
}

#[tokio::test]
async fn legacy_tag_wins_and_is_counted() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let endpoint = HealthEndpoint::builder(catalog_store())
        .metrics(metrics.clone())
        .build();
    let mut request = ServiceInstancesRequest::new("web").with_tags(["v1"]);
    request.legacy_tag = Some("v2".into());
    let result = endpoint.service_instances(&request, &cancel()).await.unwrap();
    assert_eq!(node_names(&result.records), vec!["n2"]);
    assert_eq!(
        metrics.counter(
            "health.service.query-tag",
            &[("service", "web"), ("tag", "v2")]
        ),
        1
    );
}

#[tokio::test]
async fn missing_service_counts_not_found() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let endpoint = HealthEndpoint::builder(catalog_store())
        .metrics(metrics.clone())
        .build();
    let result = endpoint
        .service_instances(&ServiceInstancesRequest::new("ghost"), &cancel())
        .await
        .unwrap();
    assert!(result.is_empty());
    assert_eq!(
        metrics.counter("health.service.not-found", &[("service", "ghost")]),
        1
    );
}

#[tokio::test]
async fn results_without_reference_keep_store_order() {
    let coordinates = Arc::new(CoordinateTable::new());
    coordinates.update("n3", Coordinate::new(vec![0.0, 0.0]));
    coordinates.update("n1", Coordinate::new(vec![0.2, 0.0]));
    coordinates.update("n2", Coordinate::new(vec![0.05, 0.0]));
    let endpoint = HealthEndpoint::builder(catalog_store())
        .distances(coordinates)
        .build();

    let unsorted = endpoint
        .service_instances(&ServiceInstancesRequest::new("web"), &cancel())
        .await
        .unwrap();
    assert_eq!(node_names(&unsorted.records), vec!["n1", "n2", "n3"]);

    let sorted = endpoint
        .service_instances(
            &ServiceInstancesRequest::new("web")
                .with_options(QueryOptions::default().near("n3")),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(node_names(&sorted.records), vec!["n3", "n2", "n1"]);
    assert_eq!(sorted.version, unsorted.version);
}

#[tokio::test]
async fn agent_reference_resolves_to_local_node() {
    let coordinates = Arc::new(CoordinateTable::new());
    coordinates.update("n1", Coordinate::new(vec![0.0]));
    coordinates.update("n2", Coordinate::new(vec![0.3]));
    coordinates.update("n3", Coordinate::new(vec![0.1]));
    let endpoint = HealthEndpoint::builder(catalog_store())
        .distances(coordinates)
        .config(HealthServiceConfig::default().with_local_node("n1"))
        .build();
    let result = endpoint
        .service_checks(
            &ServiceChecksRequest::new("web")
                .with_options(QueryOptions::default().near("_agent")),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(check_nodes(&result.records), vec!["n1", "n3", "n2"]);
}

#[tokio::test]
async fn node_checks_are_never_distance_sorted() {
    let store = Arc::new(ScriptedStore::with_checks(
        4,
        vec![
            CheckRecord::new("far", "serf", HealthStatus::Passing),
            CheckRecord::new("near", "serf", HealthStatus::Passing),
        ],
    ));
    let coordinates = Arc::new(CoordinateTable::new());
    coordinates.update("origin", Coordinate::new(vec![0.0]));
    coordinates.update("near", Coordinate::new(vec![0.01]));
    coordinates.update("far", Coordinate::new(vec![1.0]));
    let endpoint = HealthEndpoint::builder(store).distances(coordinates).build();
    let result = endpoint
        .node_checks(
            &NodeChecksRequest::new("any")
                .with_options(QueryOptions::default().near("origin")),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(check_nodes(&result.records), vec!["far", "near"]);
}

#[tokio::test]
async fn forwarded_requests_return_the_remote_reply() {
    let remote = QueryResult {
        version: VersionToken::new(42),
        records: vec![CheckRecord::new("remote", "serf", HealthStatus::Warning)],
        consistency: ConsistencyMode::Consistent,
    };
    let forwarder = Arc::new(RecordingForwarder::new(ForwardOutcome::Handled(Ok(
        HealthReply::Checks(remote.clone()),
    ))));
    let store = Arc::new(ScriptedStore::with_checks(1, Vec::new()));
    let endpoint = HealthEndpoint::builder(store.clone())
        .forwarder(forwarder.clone())
        .build();
    let result = endpoint
        .node_checks(&NodeChecksRequest::new("remote"), &cancel())
        .await
        .unwrap();
    assert_eq!(result, remote);
    assert_eq!(forwarder.seen(), vec!["Health.NodeChecks"]);
    assert_eq!(store.reads(), 0);
}

#[tokio::test]
async fn forwarding_errors_and_mismatched_replies_are_surfaced() {
    let failing = Arc::new(RecordingForwarder::new(ForwardOutcome::Handled(Err(
        HealthError::Forwarding {
            detail: "no path to datacenter".into(),
        },
    ))));
    let endpoint = HealthEndpoint::builder(scenario_store())
        .forwarder(failing)
        .build();
    let err = endpoint
        .service_instances(&ServiceInstancesRequest::new("web"), &cancel())
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    let mismatched = Arc::new(RecordingForwarder::new(ForwardOutcome::Handled(Ok(
        HealthReply::Instances(QueryResult::<ServiceInstanceRecord>::empty(
            ConsistencyMode::Default,
        )),
    ))));
    let endpoint = HealthEndpoint::builder(scenario_store())
        .forwarder(mismatched)
        .build();
    assert!(matches!(
        endpoint
            .checks_in_state(&ChecksInStateRequest::new(CheckStateFilter::Any), &cancel())
            .await,
        Err(HealthError::Forwarding { .. })
    ));
}

#[tokio::test]
async fn store_errors_are_propagated_verbatim() {
    let store = Arc::new(ScriptedStore::failing(StoreError::new(
        "memdb.aborted",
        "snapshot aborted",
    )));
    let endpoint = HealthEndpoint::builder(store.clone()).build();
    let err = endpoint
        .service_checks(&ServiceChecksRequest::new("web"), &cancel())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        HealthError::Store(StoreError::new("memdb.aborted", "snapshot aborted"))
    );
    assert_eq!(store.reads(), 1);
}

#[tokio::test]
async fn foreign_tenants_are_rejected_by_default_and_guarded_otherwise() {
    let billing = TenantScope::new("billing", "default");
    let endpoint = HealthEndpoint::builder(scenario_store()).build();
    let request = ChecksInStateRequest::new(CheckStateFilter::Any)
        .with_options(QueryOptions::default().with_tenant(billing.clone()));
    assert!(matches!(
        endpoint.checks_in_state(&request, &cancel()).await,
        Err(HealthError::InvalidRequest { .. })
    ));

    // 存储越界返回了其他租户的记录，过滤链仍然把它挡住。
    let leaky = Arc::new(ScriptedStore::with_checks(
        2,
        vec![
            CheckRecord::new("mine", "serf", HealthStatus::Passing).with_tenant(billing.clone()),
            CheckRecord::new("theirs", "serf", HealthStatus::Passing),
        ],
    ));
    let endpoint = HealthEndpoint::builder(leaky)
        .tenant_validator(Arc::new(AnyTenant))
        .build();
    let result = endpoint.checks_in_state(&request, &cancel()).await.unwrap();
    assert_eq!(check_nodes(&result.records), vec!["mine"]);
}

#[tokio::test]
async fn configured_default_consistency_is_reported() {
    let config = HealthServiceConfig::from_toml_str(r#"default_consistency = "stale""#).unwrap();
    let endpoint = HealthEndpoint::builder(scenario_store()).config(config).build();
    let result = endpoint
        .checks_in_state(&ChecksInStateRequest::new(CheckStateFilter::Any), &cancel())
        .await
        .unwrap();
    assert_eq!(result.consistency, ConsistencyMode::Stale);

    let explicit = endpoint
        .checks_in_state(
            &ChecksInStateRequest::new(CheckStateFilter::Any).with_options(
                QueryOptions::default().with_consistency(ConsistencyMode::Consistent),
            ),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(explicit.consistency, ConsistencyMode::Consistent);
}

#[tokio::test]
async fn service_checks_honour_node_meta_pushdown() {
    let store = catalog_store();
    store.upsert_node(NodeDescriptor::new("n4", "10.0.1.4").with_meta("env", "prod"));
    store
        .upsert_service("n4", &TenantScope::default(), ServiceDescriptor::new("web"))
        .unwrap();
    store
        .upsert_check(
            CheckRecord::new("n4", "web-http", HealthStatus::Warning).for_service("web", "web"),
        )
        .unwrap();
    let endpoint = HealthEndpoint::builder(store).build();
    let result = endpoint
        .service_checks(
            &ServiceChecksRequest::new("web").with_node_meta("env", "prod"),
            &cancel(),
        )
        .await
        .unwrap();
    assert_eq!(check_nodes(&result.records), vec!["n1", "n3", "n4"]);
}
