//! Filter and query engine.
//!
//! A [`Query`] is built fluently and then run over documents already fetched from
//! the store:
//!
//! ```ignore
//! let query = Query::new()
//!     .filter("age > 16")
//!     .and("active = $true")
//!     .sort("age", SortDirection::Desc)
//!     .limit(10);
//! ```
//!
//! `filter` opens a chain and `and`/`or` extend it, folding left to right. Calling
//! `filter` again opens another chain; separate chains must all hold. After
//! filtering, the pipeline always runs projection, sort, offset, limit and
//! populate, in that order.

pub mod eval;
pub mod expr;
pub mod populate;

use crate::document::{get_path, Document, ID_FIELD};
use crate::error::{Result, ShelfError};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

pub use eval::{compare, evaluate, evaluate_item};
pub use expr::{Expr, Literal, Operator, ITEM_KEY};
pub use populate::populate;

/// Caller-supplied rewrite of an array; a document matches when the result is non-empty.
pub type ArrayTransform = Arc<dyn Fn(&[Value]) -> Vec<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

#[derive(Clone)]
pub enum Predicate {
    Compare(Expr),
    Transform { path: String, transform: ArrayTransform },
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Compare(expr) => f.debug_tuple("Compare").field(expr).finish(),
            Predicate::Transform { path, .. } => {
                f.debug_struct("Transform").field("path", path).finish_non_exhaustive()
            }
        }
    }
}

impl Predicate {
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Predicate::Compare(expr) => evaluate(expr, doc),
            Predicate::Transform { path, transform } => match get_path(doc, path).as_deref() {
                Some(Value::Array(items)) => !transform(items).is_empty(),
                _ => false,
            },
        }
    }
}

/// Predicates joined left to right. The first link has no connective.
#[derive(Debug, Clone, Default)]
pub struct QueryChain {
    links: Vec<(Option<Connective>, Predicate)>,
}

impl QueryChain {
    pub fn matches(&self, doc: &Value) -> bool {
        let mut links = self.links.iter();
        let Some((_, first)) = links.next() else {
            return true;
        };
        links.fold(first.matches(doc), |acc, (connective, predicate)| match connective {
            Some(Connective::Or) => acc || predicate.matches(doc),
            _ => acc && predicate.matches(doc),
        })
    }
}

#[derive(Debug, Clone, Default)]
enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// A filter chain plus the post-filter pipeline.
///
/// Builder misuse (a malformed expression, `and` before `filter`) is recorded and
/// reported when the query runs.
#[derive(Debug, Clone, Default)]
pub struct Query {
    chains: Vec<QueryChain>,
    error: Option<String>,
    include: Vec<String>,
    exclude: Vec<String>,
    sort: Option<Sort>,
    offset: usize,
    limit: Option<usize>,
    populate: Vec<String>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    fn fail(mut self, message: String) -> Self {
        self.error.get_or_insert(message);
        self
    }

    fn push(mut self, connective: Option<Connective>, predicate: Result<Predicate>) -> Self {
        let predicate = match predicate {
            Ok(predicate) => predicate,
            Err(err) => return self.fail(err.to_string()),
        };
        match connective {
            None => self.chains.push(QueryChain {
                links: vec![(None, predicate)],
            }),
            Some(connective) => match self.chains.last_mut() {
                Some(chain) => chain.links.push((Some(connective), predicate)),
                None => {
                    let name = if connective == Connective::And { "and" } else { "or" };
                    return self.fail(format!("'{name}' must follow a 'where' filter"));
                }
            },
        }
        self
    }

    /// Open a chain with a `<path> <op> <literal>` expression.
    pub fn filter(self, expression: &str) -> Self {
        self.push(None, compare_predicate(expression))
    }

    pub fn and(self, expression: &str) -> Self {
        self.push(Some(Connective::And), compare_predicate(expression))
    }

    pub fn or(self, expression: &str) -> Self {
        self.push(Some(Connective::Or), compare_predicate(expression))
    }

    /// Open a chain matching documents whose array at `path` has at least one element
    /// satisfying `[key, op, literal]`. The key `$item` compares elements directly.
    pub fn filter_array(self, path: &str, tokens: [&str; 3]) -> Self {
        let [key, op, literal] = tokens;
        let predicate = array_predicate(path, key, op, literal);
        self.push(None, predicate)
    }

    pub fn filter_with(
        self,
        path: &str,
        transform: impl Fn(&[Value]) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.push(
            None,
            Ok(Predicate::Transform {
                path: path.to_string(),
                transform: Arc::new(transform),
            }),
        )
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn populate<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.populate.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn populate_paths(&self) -> &[String] {
        &self.populate
    }

    /// Surface any error recorded while the query was built.
    pub fn check(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(ShelfError::Query(message.clone())),
            None if !self.include.is_empty() && !self.exclude.is_empty() => Err(ShelfError::Query(
                "'include' and 'exclude' cannot be combined".into(),
            )),
            None => Ok(()),
        }
    }

    /// Whether a document satisfies every filter chain.
    pub fn matches(&self, doc: &Document) -> bool {
        if self.chains.is_empty() {
            return true;
        }
        let value = Value::Object(doc.clone());
        self.chains.iter().all(|chain| chain.matches(&value))
    }

    /// Filter, then project, sort, skip and truncate. Population needs the store and
    /// is run by the caller afterwards.
    pub fn apply(&self, documents: Vec<Document>) -> Result<Vec<Document>> {
        self.check()?;

        let mut results: Vec<Document> = documents
            .into_iter()
            .filter(|doc| self.matches(doc))
            .collect();

        match self.projection() {
            Projection::All => {}
            Projection::Include(fields) => {
                results = results.iter().map(|doc| project_include(doc, &fields, true)).collect();
            }
            Projection::Exclude(fields) => {
                for doc in results.iter_mut() {
                    project_exclude(doc, &fields, true);
                }
            }
        }

        if let Some(sort) = &self.sort {
            results.sort_by(|a, b| {
                let left = get_path_in(a, &sort.field);
                let right = get_path_in(b, &sort.field);
                let ordering = eval::sort_order(left.as_deref(), right.as_deref());
                match sort.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        let results = results.into_iter().skip(self.offset);
        Ok(match self.limit {
            Some(limit) => results.take(limit).collect(),
            None => results.collect(),
        })
    }

    fn projection(&self) -> Projection {
        if !self.include.is_empty() {
            Projection::Include(self.include.clone())
        } else if !self.exclude.is_empty() {
            Projection::Exclude(self.exclude.clone())
        } else {
            Projection::All
        }
    }
}

fn compare_predicate(expression: &str) -> Result<Predicate> {
    let expr = Expr::parse(expression)?;
    if expr.op == Operator::StrictEq {
        return Err(ShelfError::Query(format!(
            "'===' is not a valid filter operator in '{expression}'"
        )));
    }
    Ok(Predicate::Compare(expr))
}

fn array_predicate(path: &str, key: &str, op: &str, literal: &str) -> Result<Predicate> {
    let expr = Expr::from_tokens(key, op, literal)?;
    Ok(Predicate::Transform {
        path: path.to_string(),
        transform: Arc::new(move |items: &[Value]| {
            items
                .iter()
                .filter(|item| evaluate_item(&expr, item))
                .cloned()
                .collect()
        }),
    })
}

fn get_path_in<'d>(doc: &'d Document, path: &str) -> Option<std::borrow::Cow<'d, Value>> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = doc.get(head)?;
    match rest {
        Some(rest) => get_path(value, rest),
        None => Some(std::borrow::Cow::Borrowed(value)),
    }
}

/// Keep only the listed (possibly dotted) paths. `id` survives at the top level.
fn project_include(doc: &Map<String, Value>, paths: &[String], top: bool) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in doc {
        if (top && key == ID_FIELD) || paths.iter().any(|p| p == key) {
            out.insert(key.clone(), value.clone());
            continue;
        }
        let prefix = format!("{key}.");
        let nested: Vec<String> = paths
            .iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .collect();
        if let (false, Value::Object(inner)) = (nested.is_empty(), value) {
            out.insert(key.clone(), Value::Object(project_include(inner, &nested, false)));
        }
    }
    out
}

/// Drop the listed (possibly dotted) paths. `id` is never dropped at the top level.
fn project_exclude(doc: &mut Map<String, Value>, paths: &[String], top: bool) {
    let direct: HashSet<&str> = paths
        .iter()
        .filter(|p| !p.contains('.'))
        .map(String::as_str)
        .collect();
    doc.retain(|key, _| (top && key == ID_FIELD) || !direct.contains(key.as_str()));

    for (key, value) in doc.iter_mut() {
        let prefix = format!("{key}.");
        let nested: Vec<String> = paths
            .iter()
            .filter_map(|p| p.strip_prefix(&prefix).map(str::to_string))
            .collect();
        if let (false, Value::Object(inner)) = (nested.is_empty(), value) {
            project_exclude(inner, &nested, false);
        }
    }
}
