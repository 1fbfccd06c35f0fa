//! 两类记录的选择器表。

use std::borrow::Cow;

use super::{FieldValue, Selectable};
use crate::model::{CheckRecord, RecordShape, ServiceInstanceRecord};

const CHECK_SELECTORS: &[&str] = &[
    "Node",
    "CheckID",
    "Name",
    "Status",
    "ServiceID",
    "ServiceName",
    "ServiceTags",
    "Output",
    "Partition",
    "Namespace",
];

const INSTANCE_SELECTORS: &[&str] = &[
    "Node.Node",
    "Node.Address",
    "Node.Datacenter",
    "Node.Meta",
    "Service.ID",
    "Service.Service",
    "Service.Tags",
    "Service.Kind",
    "Service.Port",
    "Service.Meta",
    "Checks.Status",
    "Checks.CheckID",
    "Checks.Name",
];

/// 映射类选择器前缀，允许追加任意键名。
const INSTANCE_MAP_PREFIXES: &[&str] = &["Node.Meta.", "Service.Meta."];

pub(crate) fn is_known_selector(shape: RecordShape, selector: &str) -> bool {
    match shape {
        RecordShape::Check => CHECK_SELECTORS.contains(&selector),
        RecordShape::ServiceInstance => {
            INSTANCE_SELECTORS.contains(&selector)
                || INSTANCE_MAP_PREFIXES.iter().any(|prefix| {
                    selector
                        .strip_prefix(prefix)
                        .is_some_and(|key| !key.is_empty())
                })
        }
    }
}

fn borrowed(value: &str) -> FieldValue<'_> {
    FieldValue::Str(Cow::Borrowed(value))
}

fn optional(value: Option<&str>) -> FieldValue<'_> {
    borrowed(value.unwrap_or_default())
}

fn map_lookup<'a>(
    map: &'a std::collections::BTreeMap<String, String>,
    key: &str,
) -> FieldValue<'a> {
    map.get(key)
        .map(|value| borrowed(value))
        .unwrap_or(FieldValue::Missing)
}

impl Selectable for CheckRecord {
    fn select(&self, selector: &str) -> Option<FieldValue<'_>> {
        let value = match selector {
            "Node" => borrowed(&self.node),
            "CheckID" => borrowed(&self.check_id),
            "Name" => borrowed(&self.name),
            "Status" => borrowed(self.status.as_str()),
            "ServiceID" => optional(self.service_id.as_deref()),
            "ServiceName" => optional(self.service_name.as_deref()),
            "ServiceTags" => FieldValue::List(self.service_tags.iter().map(String::as_str).collect()),
            "Output" => borrowed(&self.output),
            "Partition" => borrowed(self.tenant.partition()),
            "Namespace" => borrowed(self.tenant.namespace()),
            _ => return None,
        };
        Some(value)
    }
}

impl Selectable for ServiceInstanceRecord {
    fn select(&self, selector: &str) -> Option<FieldValue<'_>> {
        let value = match selector {
            "Node.Node" => borrowed(&self.node.name),
            "Node.Address" => borrowed(&self.node.address),
            "Node.Datacenter" => borrowed(&self.node.datacenter),
            "Node.Meta" => FieldValue::List(self.node.meta.keys().map(String::as_str).collect()),
            "Service.ID" => borrowed(&self.service.id),
            "Service.Service" => borrowed(&self.service.name),
            "Service.Tags" => {
                FieldValue::List(self.service.tags.iter().map(String::as_str).collect())
            }
            "Service.Kind" => borrowed(self.service.kind.as_str()),
            "Service.Port" => FieldValue::Str(Cow::Owned(self.service.port.to_string())),
            "Service.Meta" => {
                FieldValue::List(self.service.meta.keys().map(String::as_str).collect())
            }
            "Checks.Status" => {
                FieldValue::List(self.checks.iter().map(|check| check.status.as_str()).collect())
            }
            "Checks.CheckID" => {
                FieldValue::List(self.checks.iter().map(|check| check.check_id.as_str()).collect())
            }
            "Checks.Name" => {
                FieldValue::List(self.checks.iter().map(|check| check.name.as_str()).collect())
            }
            other => {
                if let Some(key) = other.strip_prefix("Node.Meta.") {
                    map_lookup(&self.node.meta, key)
                } else if let Some(key) = other.strip_prefix("Service.Meta.") {
                    map_lookup(&self.service.meta, key)
                } else {
                    return None;
                }
            }
        };
        Some(value)
    }
}
