//! 表达式语法分析与求值。
//!
//! 文法见同目录 `filter.pest`。`and`/`or` 链解析为扁平的 [`Expr::And`]/[`Expr::Or`] 列表，
//! 前缀 `not` 按奇偶折叠，语法树深度只随括号层数增长。

use pest::{Parser, iterators::Pair};
use pest_derive::Parser;
use thiserror::Error;

use super::{FieldValue, Selectable};

/// 表达式字节长度上限。
const MAX_LENGTH: usize = 8 * 1024;
/// 括号嵌套上限。
const MAX_DEPTH: usize = 32;
/// 匹配子句数量上限。
const MAX_CLAUSES: usize = 256;

#[derive(Parser)]
#[grammar = "src/filter/expr/filter.pest"]
struct FilterGrammar;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub(crate) enum ParseError {
    #[error("expression is empty")]
    Empty,
    #[error("expression is {0} bytes long, limit is {max} bytes", max = MAX_LENGTH)]
    TooLong(usize),
    #[error("expression nests deeper than {} levels", MAX_DEPTH)]
    TooDeep,
    #[error("expression has more than {} match clauses", MAX_CLAUSES)]
    TooManyClauses,
    #[error("{0}")]
    Syntax(String),
}

/// 匹配操作符；`in` / `not in` 在解析时归一化为 `Contains` / `NotContains`。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MatchOp {
    Equal,
    NotEqual,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Match {
        selector: String,
        op: MatchOp,
        value: String,
    },
}

impl Expr {
    /// 表达式引用的全部选择器。
    pub(crate) fn selectors(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_selectors(&mut out);
        out
    }

    fn collect_selectors<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::And(terms) | Expr::Or(terms) => {
                for term in terms {
                    term.collect_selectors(out);
                }
            }
            Expr::Not(inner) => inner.collect_selectors(out),
            Expr::Match { selector, .. } => out.push(selector),
        }
    }

    /// 求值；无法解析的选择器以 `Err(selector)` 返回。
    pub(crate) fn evaluate(&self, record: &dyn Selectable) -> Result<bool, String> {
        match self {
            Expr::And(terms) => {
                for term in terms {
                    if !term.evaluate(record)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Expr::Or(terms) => {
                for term in terms {
                    if term.evaluate(record)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Not(inner) => Ok(!inner.evaluate(record)?),
            Expr::Match {
                selector,
                op,
                value,
            } => {
                let field = record.select(selector).ok_or_else(|| selector.clone())?;
                Ok(match op {
                    MatchOp::Equal => equals(&field, value),
                    MatchOp::NotEqual => !equals(&field, value),
                    MatchOp::Contains => contains(&field, value),
                    MatchOp::NotContains => !contains(&field, value),
                    MatchOp::IsEmpty => is_empty(&field),
                    MatchOp::IsNotEmpty => !is_empty(&field),
                })
            }
        }
    }
}

fn equals(field: &FieldValue<'_>, value: &str) -> bool {
    match field {
        FieldValue::Str(text) => text == value,
        FieldValue::List(items) => items.iter().any(|item| *item == value),
        FieldValue::Missing => false,
    }
}

fn contains(field: &FieldValue<'_>, value: &str) -> bool {
    match field {
        FieldValue::Str(text) => text.contains(value),
        FieldValue::List(items) => items.iter().any(|item| *item == value),
        FieldValue::Missing => false,
    }
}

fn is_empty(field: &FieldValue<'_>) -> bool {
    match field {
        FieldValue::Str(text) => text.is_empty(),
        FieldValue::List(items) => items.is_empty(),
        FieldValue::Missing => true,
    }
}

pub(crate) fn parse(source: &str) -> Result<Expr, ParseError> {
    if source.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    if source.len() > MAX_LENGTH {
        return Err(ParseError::TooLong(source.len()));
    }
    // 文法对括号递归，先在原文上限定层数再交给 pest。
    check_nesting(source)?;

    let mut pairs = FilterGrammar::parse(Rule::filter, source)
        .map_err(|err| ParseError::Syntax(err.to_string()))?;
    let root = pairs
        .next()
        .and_then(|filter| filter.into_inner().next())
        .ok_or_else(|| ParseError::Syntax("missing expression".to_owned()))?;
    TreeBuilder::default().or_expr(root)
}

fn check_nesting(source: &str) -> Result<(), ParseError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for ch in source.chars() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '(' => {
                depth += 1;
                if depth > MAX_DEPTH {
                    return Err(ParseError::TooDeep);
                }
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

/// 将 pest 语法树收敛为 [`Expr`]，并累计匹配子句数量。
#[derive(Default)]
struct TreeBuilder {
    clauses: usize,
}

impl TreeBuilder {
    fn or_expr(&mut self, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
        let mut terms = Vec::new();
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::and_expr {
                terms.push(self.and_expr(inner)?);
            }
        }
        Ok(join(terms, Expr::Or))
    }

    fn and_expr(&mut self, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
        let mut terms = Vec::new();
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::unary {
                terms.push(self.unary(inner)?);
            }
        }
        Ok(join(terms, Expr::And))
    }

    fn unary(&mut self, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
        let mut negations = 0usize;
        let mut operand = None;
        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::kw_not => negations += 1,
                Rule::group => {
                    let nested = inner
                        .into_inner()
                        .next()
                        .ok_or_else(|| ParseError::Syntax("empty group".to_owned()))?;
                    operand = Some(self.or_expr(nested)?);
                }
                _ => operand = Some(self.clause(inner)?),
            }
        }
        let operand = operand.ok_or_else(|| ParseError::Syntax("missing operand".to_owned()))?;
        Ok(if negations % 2 == 1 {
            Expr::Not(Box::new(operand))
        } else {
            operand
        })
    }

    fn clause(&mut self, pair: Pair<'_, Rule>) -> Result<Expr, ParseError> {
        self.clauses += 1;
        if self.clauses > MAX_CLAUSES {
            return Err(ParseError::TooManyClauses);
        }

        let rule = pair.as_rule();
        let mut selector = String::new();
        let mut value = String::new();
        let mut negated = false;
        let mut compare = MatchOp::Equal;
        for part in pair.into_inner() {
            match part.as_rule() {
                Rule::selector => selector = part.as_str().to_owned(),
                Rule::bare => value = part.as_str().to_owned(),
                Rule::string => value = unquote(part.as_str()),
                Rule::kw_not => negated = true,
                Rule::compare_op if part.as_str() == "!=" => compare = MatchOp::NotEqual,
                _ => {}
            }
        }
        let op = match (rule, negated) {
            (Rule::comparison, _) => compare,
            (Rule::containment | Rule::membership, false) => MatchOp::Contains,
            (Rule::containment | Rule::membership, true) => MatchOp::NotContains,
            (Rule::emptiness, false) => MatchOp::IsEmpty,
            (Rule::emptiness, true) => MatchOp::IsNotEmpty,
            (other, _) => return Err(ParseError::Syntax(format!("unexpected {other:?}"))),
        };
        Ok(Expr::Match {
            selector,
            op,
            value,
        })
    }
}

fn join(mut terms: Vec<Expr>, combine: fn(Vec<Expr>) -> Expr) -> Expr {
    if terms.len() == 1 {
        terms.swap_remove(0)
    } else {
        combine(terms)
    }
}

/// 去掉引号并还原 `\x` 转义。
fn unquote(raw: &str) -> String {
    let body = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(raw);
    let mut text = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => text.extend(chars.next()),
            other => text.push(other),
        }
    }
    text
}
