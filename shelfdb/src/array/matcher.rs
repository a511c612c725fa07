use crate::error::{Result, ShelfError};
use crate::query::{evaluate_item, Expr, Operator};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Caller-defined rewrite of a whole array.
pub type ElementTransform = Arc<dyn Fn(Vec<Value>) -> Vec<Value> + Send + Sync>;

/// How `update_array` picks the elements to rewrite.
#[derive(Clone)]
pub enum ArrayMatcher {
    /// Match elements whose `key` equals the key of an update object.
    SinglePath { key: String },
    /// `<field|$item> <=|===> <literal>`: `=` rewrites every loose match,
    /// `===` only the first strict match.
    Expression(Expr),
    Custom(ElementTransform),
}

impl fmt::Debug for ArrayMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayMatcher::SinglePath { key } => f.debug_struct("SinglePath").field("key", key).finish(),
            ArrayMatcher::Expression(expr) => f.debug_tuple("Expression").field(expr).finish(),
            ArrayMatcher::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl ArrayMatcher {
    pub fn key(key: impl Into<String>) -> Self {
        ArrayMatcher::SinglePath { key: key.into() }
    }

    pub fn expression(text: &str) -> Result<Self> {
        let expr = Expr::parse(text)?;
        check_operator(expr.op)?;
        Ok(ArrayMatcher::Expression(expr))
    }

    pub fn custom(transform: impl Fn(Vec<Value>) -> Vec<Value> + Send + Sync + 'static) -> Self {
        ArrayMatcher::Custom(Arc::new(transform))
    }

    /// A bare key selects single-path mode, anything with an operator is an expression.
    pub fn parse(text: &str) -> Result<Self> {
        if text.contains(['=', '!', '<', '>']) {
            ArrayMatcher::expression(text)
        } else if text.trim().is_empty() {
            Err(ShelfError::Query("array matcher is empty".into()))
        } else {
            Ok(ArrayMatcher::key(text.trim()))
        }
    }
}

pub(crate) fn check_operator(op: Operator) -> Result<()> {
    match op {
        Operator::Eq | Operator::StrictEq => Ok(()),
        other => Err(ShelfError::Query(format!(
            "'{other}' is not a valid pathExpr operator"
        ))),
    }
}

/// Indexes of the elements an expression rewrites: all matches for `=`, the first for `===`.
pub(crate) fn matching_indexes(expr: &Expr, items: &[Value]) -> Vec<usize> {
    let mut matches = items
        .iter()
        .enumerate()
        .filter(|(_, item)| evaluate_item(expr, item))
        .map(|(index, _)| index);
    match expr.op {
        Operator::StrictEq => matches.next().into_iter().collect(),
        _ => matches.collect(),
    }
}
