//! Predicate evaluation over loaded documents.

use super::expr::{Expr, Literal, Operator};
use crate::document::get_path;
use serde_json::Value;
use std::cmp::Ordering;

/// Comparable view of a JSON value or literal. Numbers are normalized to `f64`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Missing,
    Null,
    Bool(bool),
    Number(f64),
    String(&'a str),
    Other,
}

impl<'a> From<Option<&'a Value>> for Comparable<'a> {
    fn from(value: Option<&'a Value>) -> Self {
        match value {
            None => Comparable::Missing,
            Some(Value::Null) => Comparable::Null,
            Some(Value::Bool(b)) => Comparable::Bool(*b),
            Some(Value::Number(n)) => Comparable::Number(n.as_f64().unwrap_or(f64::NAN)),
            Some(Value::String(s)) => Comparable::String(s),
            Some(_) => Comparable::Other,
        }
    }
}

impl<'a> From<&'a Literal> for Comparable<'a> {
    fn from(literal: &'a Literal) -> Self {
        match literal {
            Literal::Bool(b) => Comparable::Bool(*b),
            Literal::Null => Comparable::Null,
            Literal::Undefined => Comparable::Missing,
            Literal::Number(n) => Comparable::Number(*n),
            Literal::Text(s) => Comparable::String(s),
        }
    }
}

impl<'a> Comparable<'a> {
    fn is_nullish(&self) -> bool {
        matches!(self, Comparable::Missing | Comparable::Null)
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Comparable::Number(n) => Some(*n),
            Comparable::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Equality that coerces between numbers and numeric strings, and treats
    /// `null` and a missing value alike.
    fn loose_eq(&self, other: &Comparable<'_>) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Number(_), _) | (_, Comparable::Number(_)) => {
                match (self.as_number(), other.as_number()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Equality without coercion.
    fn strict_eq(&self, other: &Comparable<'_>) -> bool {
        match (self, other) {
            (Comparable::Missing, Comparable::Missing) | (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            _ => false,
        }
    }

    fn partial_cmp(&self, other: &Comparable<'_>) -> Option<Ordering> {
        match (self, other) {
            (Comparable::String(a), Comparable::String(b)) => match (self.as_number(), other.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => a.partial_cmp(b),
            },
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

/// Apply an operator to a value (absent when `None`).
pub fn compare(value: Option<&Value>, op: Operator, literal: &Literal) -> bool {
    let left = Comparable::from(value);
    let right = Comparable::from(literal);
    match op {
        Operator::Eq => left.loose_eq(&right),
        Operator::StrictEq => left.strict_eq(&right),
        Operator::Ne => !left.loose_eq(&right),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            match left.partial_cmp(&right) {
                Some(ordering) => match op {
                    Operator::Gt => ordering == Ordering::Greater,
                    Operator::Gte => ordering != Ordering::Less,
                    Operator::Lt => ordering == Ordering::Less,
                    _ => ordering != Ordering::Greater,
                },
                None => false,
            }
        }
    }
}

/// Evaluate an expression against a document (or any JSON value).
pub fn evaluate(expr: &Expr, doc: &Value) -> bool {
    let value = get_path(doc, &expr.path);
    compare(value.as_deref(), expr.op, &expr.literal)
}

/// Evaluate an expression against one array element. `$item` compares the element
/// itself; any other key reads a property of it.
pub fn evaluate_item(expr: &Expr, item: &Value) -> bool {
    if expr.addresses_item() {
        compare(Some(item), expr.op, &expr.literal)
    } else {
        evaluate(expr, item)
    }
}

/// Sort order of raw values: missing and `null` first, then by comparable value.
/// Values of different kinds compare equal so a stable sort keeps their order.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let left = Comparable::from(a);
    let right = Comparable::from(b);
    match (left.is_nullish(), right.is_nullish()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => match (&left, &right) {
            (Comparable::Number(x), Comparable::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (Comparable::String(x), Comparable::String(y)) => x.cmp(y),
            (Comparable::Bool(x), Comparable::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}
