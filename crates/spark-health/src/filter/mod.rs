//! # ResultFilterChain：结果过滤链
//!
//! ## 意图（Why）
//! - 执行器返回的是“存储眼中”的结果；在披露给调用方之前，必须依次剔除跨租户、
//!   不满足节点元数据、未授权、以及不满足过滤表达式的记录；
//! - 阶段顺序固定：先授权后表达式，保证表达式只会看到已授权的记录。
//!
//! ## 契约（What）
//! 0. 租户守卫：作用域与请求不一致的记录直接丢弃；
//! 1. 节点元数据预过滤：仅当请求携带谓词且策略没有把谓词下推给存储时执行；
//! 2. 授权过滤：见 [`acl::filter_authorized`]；
//! 3. 表达式过滤：见 [`expr::apply`]。
//!
//! 每个阶段都保持剩余记录的相对顺序；任一阶段失败即整体失败。

use tracing::debug;

use crate::{
    error::HealthError,
    model::{HealthRecord, NodeMeta, TenantScope, node_meta_matches},
};

pub mod acl;
pub mod expr;

use acl::Authorizer;
use expr::CompiledFilter;

/// 单次请求的过滤链，借用请求期内的授权器与编译好的过滤器。
pub struct ResultFilterChain<'a> {
    tenant: &'a TenantScope,
    authorizer: &'a dyn Authorizer,
    node_meta: Option<&'a NodeMeta>,
    filter: Option<&'a dyn CompiledFilter>,
}

impl<'a> ResultFilterChain<'a> {
    pub fn new(tenant: &'a TenantScope, authorizer: &'a dyn Authorizer) -> Self {
        Self {
            tenant,
            authorizer,
            node_meta: None,
            filter: None,
        }
    }

    /// 设置需要在服务侧执行的节点元数据谓词；空谓词等同于不设置。
    pub fn with_node_meta(mut self, predicates: Option<&'a NodeMeta>) -> Self {
        self.node_meta = predicates.filter(|predicates| !predicates.is_empty());
        self
    }

    pub fn with_filter(mut self, filter: Option<&'a dyn CompiledFilter>) -> Self {
        self.filter = filter;
        self
    }

    /// 按固定顺序执行全部阶段。
    pub fn run<R: HealthRecord>(&self, records: Vec<R>) -> Result<Vec<R>, HealthError> {
        let read = records.len();

        let mut records: Vec<R> = records
            .into_iter()
            .filter(|record| record.tenant() == self.tenant)
            .collect();

        if let Some(predicates) = self.node_meta {
            records.retain(|record| {
                record
                    .node_meta()
                    .is_some_and(|meta| node_meta_matches(predicates, meta))
            });
        }
        let scoped = records.len();

        let records = acl::filter_authorized(self.authorizer, self.tenant, records)?;
        let authorized = records.len();

        let records = match self.filter {
            Some(filter) => expr::apply(filter, records)?,
            None => records,
        };

        debug!(
            shape = ?R::SHAPE,
            filter = self.filter.map(|filter| filter.expression()),
            read,
            scoped,
            authorized,
            returned = records.len(),
            "result filter chain finished"
        );
        Ok(records)
    }
}
