//! # 布尔过滤表达式
//!
//! ## 定位（Why）
//! - 调用方可提交形如 `Status == "passing"` 的表达式，对已通过授权的记录做最后一轮筛选；
//! - 表达式引擎是外部协作方：本模块定义编译/执行契约 [`FilterExpressionEngine`] 与 [`CompiledFilter`]，
//!   并附带一个小型内置实现 [`ExpressionEngine`]。
//!
//! ## 契约（What）
//! - `compile` 针对记录形态校验选择器，语法或选择器错误统一为 `InvalidRequest`；
//! - `matches` 必须是记录内容的纯函数：无副作用、与输入顺序无关；执行期失败为 `FilterExecution`。
//!
//! ## 语法速览（How）
//! - 比较：`Sel == "v"`、`Sel != "v"`；
//! - 包含：`Sel contains "v"`、`Sel not contains "v"`、`"v" in Sel`、`"v" not in Sel`；
//! - 判空：`Sel is empty`、`Sel is not empty`；
//! - 组合：`and`、`or`、`not`、括号。列表选择器上的 `==` 表示“任一元素相等”。

use std::{borrow::Cow, fmt, sync::Arc};

use crate::{error::HealthError, model::RecordShape};

mod parser;
mod shape;

use parser::Expr;

/// 选择器取值结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue<'a> {
    /// 标量字段。
    Str(Cow<'a, str>),
    /// 列表字段（标签、检查状态集合、元数据键集合等）。
    List(Vec<&'a str>),
    /// 映射类字段中不存在的键。
    Missing,
}

/// 可被表达式读取字段的记录。
///
/// - **契约 (What)**：未知选择器返回 `None`；映射中缺失的键返回 `Some(FieldValue::Missing)`。
pub trait Selectable {
    fn select(&self, selector: &str) -> Option<FieldValue<'_>>;
}

/// 编译后的过滤器。
pub trait CompiledFilter: Send + Sync + fmt::Debug {
    /// 原始表达式，便于日志排障。
    fn expression(&self) -> &str;

    /// 判断记录是否保留。
    fn matches(&self, record: &dyn Selectable) -> Result<bool, HealthError>;
}

/// 过滤表达式引擎。
pub trait FilterExpressionEngine: Send + Sync {
    /// 针对记录形态编译表达式。
    fn compile(
        &self,
        expression: &str,
        shape: RecordShape,
    ) -> Result<Arc<dyn CompiledFilter>, HealthError>;
}

/// 对整批记录执行过滤，保持原有相对顺序；任一记录执行失败即整体失败，不返回部分结果。
pub fn apply<R: Selectable>(
    filter: &dyn CompiledFilter,
    records: Vec<R>,
) -> Result<Vec<R>, HealthError> {
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if filter.matches(&record)? {
            kept.push(record);
        }
    }
    Ok(kept)
}

/// 内置的表达式引擎。
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpressionEngine;

impl FilterExpressionEngine for ExpressionEngine {
    fn compile(
        &self,
        expression: &str,
        shape: RecordShape,
    ) -> Result<Arc<dyn CompiledFilter>, HealthError> {
        let ast = parser::parse(expression).map_err(|err| {
            HealthError::invalid_request(format!("failed to parse filter expression: {err}"))
        })?;
        if let Some(unknown) = ast
            .selectors()
            .into_iter()
            .find(|selector| !shape::is_known_selector(shape, selector))
        {
            return Err(HealthError::invalid_request(format!(
                "selector `{unknown}` is not valid for {shape:?} records"
            )));
        }
        Ok(Arc::new(CompiledExpression {
            source: expression.to_owned(),
            ast,
        }))
    }
}

/// [`ExpressionEngine`] 的编译产物。
#[derive(Debug)]
struct CompiledExpression {
    source: String,
    ast: Expr,
}

impl CompiledFilter for CompiledExpression {
    fn expression(&self) -> &str {
        &self.source
    }

    fn matches(&self, record: &dyn Selectable) -> Result<bool, HealthError> {
        self.ast.evaluate(record).map_err(|selector| {
            HealthError::filter_execution(format!(
                "selector `{selector}` cannot be resolved while evaluating `{}`",
                self.source
            ))
        })
    }
}
