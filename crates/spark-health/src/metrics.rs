//! # MetricsRecorder：查询结果计数
//!
//! ## 意图（Why）
//! - 服务实例查询成功后按形态打点，运营侧据此区分普通查询与代理网格查询、统计标签使用情况、
//!   以及“查无实例”的热点服务；
//! - 指标后端是外部协作方，这里只依赖 [`MetricsSink`]；后端失败只记日志，绝不影响查询结果。
//!
//! ## 契约（What）
//! - `health.<service|connect>.query{service, shape}`：每次成功查询一次；
//! - `health.<key>.query-tag{service, tag}`：请求携带旧版单标签时；
//! - `health.<key>.query-tags{service, tag...}`：请求携带标签集合时，标签按字典序排列；
//! - `health.<key>.not-found{service}`：最终结果为空时。

use std::{collections::BTreeMap, fmt};

use dashmap::DashMap;
use thiserror::Error;
use tracing::warn;

use crate::strategy::LookupStrategy;

/// 指标标签。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MetricLabel<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

impl<'a> MetricLabel<'a> {
    pub const fn new(name: &'a str, value: &'a str) -> Self {
        Self { name, value }
    }
}

/// 指标后端报告的失败。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("metrics sink rejected `{metric}`: {reason}")]
pub struct MetricsError {
    pub metric: String,
    pub reason: String,
}

/// 指标后端。
///
/// - **契约 (What)**：`name` 为分段名称（如 `["health", "service", "query"]`），
///   实现方自行决定拼接方式；实现必须线程安全且不阻塞调用方。
pub trait MetricsSink: Send + Sync {
    fn incr_counter(
        &self,
        name: &[&str],
        value: u64,
        labels: &[MetricLabel<'_>],
    ) -> Result<(), MetricsError>;
}

/// 丢弃所有指标。
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr_counter(
        &self,
        _name: &[&str],
        _value: u64,
        _labels: &[MetricLabel<'_>],
    ) -> Result<(), MetricsError> {
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CounterKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl CounterKey {
    fn new(name: &[&str], labels: &[MetricLabel<'_>]) -> Self {
        Self {
            name: name.join("."),
            labels: labels
                .iter()
                .map(|label| (label.name.to_owned(), label.value.to_owned()))
                .collect(),
        }
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (index, (name, value)) in self.labels.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// 进程内累加的计数器，主要服务于测试与调试端点。
///
/// 标签按写入顺序参与键计算，相同名称不同标签视为不同序列。
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: DashMap<CounterKey, u64>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取某条序列的当前值；`name` 为点分名称。
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = CounterKey {
            name: name.to_owned(),
            labels: labels
                .iter()
                .map(|(label, value)| ((*label).to_owned(), (*value).to_owned()))
                .collect(),
        };
        self.counters.get(&key).map(|entry| *entry).unwrap_or(0)
    }

    /// 以 `name{k=v,...}` 形式导出全部序列，按字典序排列。
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|entry| (entry.key().to_string(), *entry.value()))
            .collect()
    }
}

impl MetricsSink for InMemoryMetrics {
    fn incr_counter(
        &self,
        name: &[&str],
        value: u64,
        labels: &[MetricLabel<'_>],
    ) -> Result<(), MetricsError> {
        *self.counters.entry(CounterKey::new(name, labels)).or_insert(0) += value;
        Ok(())
    }
}

/// 服务实例查询的打点器。
pub struct MetricsRecorder<'a> {
    sink: &'a dyn MetricsSink,
}

impl<'a> MetricsRecorder<'a> {
    pub fn new(sink: &'a dyn MetricsSink) -> Self {
        Self { sink }
    }

    /// 记录一次成功的服务实例查询。
    pub fn record_instances(
        &self,
        service: &str,
        strategy: &LookupStrategy,
        legacy_tag: Option<&str>,
        tags: &[String],
        returned: usize,
    ) {
        let key = match strategy {
            LookupStrategy::ProxyScoped => "connect",
            LookupStrategy::Plain | LookupStrategy::TagScoped { .. } => "service",
        };

        self.emit(
            &["health", key, "query"],
            &[
                MetricLabel::new("service", service),
                MetricLabel::new("shape", strategy.label()),
            ],
        );

        if let Some(tag) = legacy_tag.filter(|tag| !tag.is_empty()) {
            self.emit(
                &["health", key, "query-tag"],
                &[MetricLabel::new("service", service), MetricLabel::new("tag", tag)],
            );
        }

        if !tags.is_empty() {
            let mut sorted: Vec<&str> = tags.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            let mut labels = Vec::with_capacity(sorted.len() + 1);
            labels.push(MetricLabel::new("service", service));
            labels.extend(sorted.into_iter().map(|tag| MetricLabel::new("tag", tag)));
            self.emit(&["health", key, "query-tags"], &labels);
        }

        if returned == 0 {
            self.emit(
                &["health", key, "not-found"],
                &[MetricLabel::new("service", service)],
            );
        }
    }

    fn emit(&self, name: &[&str], labels: &[MetricLabel<'_>]) {
        if let Err(error) = self.sink.incr_counter(name, 1, labels) {
            warn!(metric = %name.join("."), %error, "dropping health metric");
        }
    }
}
