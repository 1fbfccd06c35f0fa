//! # StrategySelector：按查询形态选择读取方式
//!
//! ## 意图（Why）
//! - 线上请求用两个布尔标志描述形态（标签过滤 / 仅代理），组合出四种情况，其中“两者同时为真”非法；
//! - 在边界处把标志收敛为闭合枚举 [`LookupStrategy`]，之后的链路不再可能出现非法组合。
//!
//! ## 契约（What）
//! | proxy_only | tag_filter | 策略 |
//! |---|---|---|
//! | true | false | `ProxyScoped` |
//! | false | true | `TagScoped`（非空旧版单标签优先于标签集合） |
//! | false | false | `Plain`（节点元数据谓词下推到存储） |
//! | true | true | `InvalidRequest` |

use crate::{
    error::HealthError,
    model::NodeMeta,
    request::ServiceInstancesRequest,
    store::{InstanceQuery, InstanceSelection},
};

/// 服务实例的查询策略。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupStrategy {
    /// 按服务名直接查询。
    Plain,
    /// 按标签交集查询。
    TagScoped { tags: Vec<String> },
    /// 查询目标服务的代理实例。
    ProxyScoped,
}

impl LookupStrategy {
    /// 依据请求形态标志选择策略。
    ///
    /// - **契约 (What)**：选择是全函数且确定的；除 `Plain` 外不存在其他兜底。
    pub fn select(request: &ServiceInstancesRequest) -> Result<Self, HealthError> {
        match (request.proxy_only, request.tag_filter) {
            (true, true) => Err(HealthError::invalid_request(
                "tag filtering and proxy-only lookups are mutually exclusive",
            )),
            (true, false) => Ok(LookupStrategy::ProxyScoped),
            (false, true) => Ok(LookupStrategy::TagScoped {
                tags: effective_tags(request),
            }),
            (false, false) => Ok(LookupStrategy::Plain),
        }
    }

    /// 指标与日志使用的形态标签。
    pub fn label(&self) -> &'static str {
        match self {
            LookupStrategy::Plain => "plain",
            LookupStrategy::TagScoped { .. } => "tag",
            LookupStrategy::ProxyScoped => "proxy",
        }
    }

    /// 该策略是否把节点元数据谓词直接交给存储。
    pub fn pushes_node_meta(&self) -> bool {
        matches!(self, LookupStrategy::Plain)
    }

    /// 生成对存储的读取描述。
    pub fn instance_query(&self, service: &str, node_meta: &NodeMeta) -> InstanceQuery {
        let selection = match self {
            LookupStrategy::Plain => InstanceSelection::All,
            LookupStrategy::TagScoped { tags } => InstanceSelection::Tagged(tags.clone()),
            LookupStrategy::ProxyScoped => InstanceSelection::Proxies,
        };
        let pushed = (self.pushes_node_meta() && !node_meta.is_empty()).then(|| node_meta.clone());
        InstanceQuery {
            service: service.to_owned(),
            selection,
            node_meta: pushed,
        }
    }
}

// 旧版客户端只填写单个标签字段；一旦出现即覆盖标签集合，不做合并。
fn effective_tags(request: &ServiceInstancesRequest) -> Vec<String> {
    match request.legacy_tag.as_deref() {
        Some(tag) if !tag.is_empty() => vec![tag.to_owned()],
        _ => request.tags.clone(),
    }
}
