use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Largest integer a JSON number can carry without losing precision.
pub const MAX_SAFE_ID: u64 = 9_007_199_254_740_991;

pub const DEFAULT_UID_MIN_LEN: usize = 6;
pub const DEFAULT_UID_MAX_LEN: usize = 64;

/// Raw schema file: database options plus one definition per collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub collections: HashMap<String, CollectionDefinition>,
}

/// Database-wide options read from the `database:` block of `schema.yaml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_shard_max_bytes")]
    pub shard_max_bytes: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            shard_max_bytes: default_shard_max_bytes(),
        }
    }
}

fn default_shard_max_bytes() -> usize {
    1024 * 1024
}

/// Declarative, not yet compiled, definition of a single collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionDefinition {
    #[serde(default)]
    pub settings: Settings,
    /// Field declarations in declaration order.
    pub fields: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub timestamps: Timestamps,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(default)]
    pub created_at: bool,
    #[serde(default)]
    pub updated_at: bool,
}

/// Which id space a collection uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// `$incr`: positive integers handed out by a counter.
    Incr,
    /// `$uid`: random string ids.
    Uid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Number,
    Boolean,
    Date,
    Any,
}

impl ScalarKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Number => "Number",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::Date => "Date",
            ScalarKind::Any => "Any",
        }
    }
}

/// Type names usable inside an `anyOf` whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMarker {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Object,
}

impl TypeMarker {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "String" => TypeMarker::String,
            "Number" => TypeMarker::Number,
            "Boolean" => TypeMarker::Boolean,
            "Date" => TypeMarker::Date,
            "Array" => TypeMarker::Array,
            "Object" => TypeMarker::Object,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnyOfEntry {
    Type(TypeMarker),
    Value(Value),
}

/// Constraint and transformation options extracted from a `{ type: ... }` declaration.
#[derive(Debug, Clone, Default)]
pub struct Rules {
    pub required: bool,
    pub default: Option<Value>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub enum_values: Option<Vec<Value>>,
    pub trim: bool,
    pub lowercase: bool,
    pub capitalize: bool,
    pub starts_after: Option<DateTime<Utc>>,
    pub starts_before: Option<DateTime<Utc>>,
    pub any_of: Option<Vec<AnyOfEntry>>,
    pub pattern: Option<Regex>,
}

/// One compiled field declaration.
#[derive(Debug, Clone)]
pub enum SchemaNode {
    Scalar { kind: ScalarKind, rules: Rules },
    IncrId { max: u64 },
    UidId { min_len: usize, max_len: usize },
    Ref { collection: String, id_kind: IdKind, required: bool },
    Array { embed: ArrayEmbed, rules: Rules },
    /// A full document of `collection`, built in place and persisted in its own store.
    EmbeddedDocument { collection: String, required: bool },
    NestedObject { fields: Fields },
}

impl SchemaNode {
    pub fn is_required(&self) -> bool {
        match self {
            SchemaNode::Scalar { rules, .. } | SchemaNode::Array { rules, .. } => rules.required,
            SchemaNode::Ref { required, .. } | SchemaNode::EmbeddedDocument { required, .. } => {
                *required
            }
            SchemaNode::IncrId { .. } | SchemaNode::UidId { .. } => false,
            SchemaNode::NestedObject { .. } => false,
        }
    }

    pub fn id_kind(&self) -> Option<IdKind> {
        match self {
            SchemaNode::IncrId { .. } => Some(IdKind::Incr),
            SchemaNode::UidId { .. } => Some(IdKind::Uid),
            _ => None,
        }
    }
}

/// Element classification of an array field.
#[derive(Debug, Clone)]
pub enum ArrayEmbed {
    /// `[]`: any elements.
    Empty,
    ScalarList { kind: ScalarKind, rules: Rules },
    RefList { collection: String, id_kind: IdKind },
    DocList { collection: String },
    ObjectList { fields: Fields },
    ArrayOfArray { inner: Box<ArrayEmbed> },
}

impl ArrayEmbed {
    pub fn describe(&self) -> &'static str {
        match self {
            ArrayEmbed::Empty => "untyped list",
            ArrayEmbed::ScalarList { .. } => "scalar list",
            ArrayEmbed::RefList { .. } => "reference list",
            ArrayEmbed::DocList { .. } => "document list",
            ArrayEmbed::ObjectList { .. } => "object list",
            ArrayEmbed::ArrayOfArray { .. } => "list of lists",
        }
    }
}

/// Ordered field-name to node mapping.
#[derive(Debug, Clone, Default)]
pub struct Fields(Vec<(String, SchemaNode)>);

impl Fields {
    pub fn new() -> Self {
        Fields(Vec::new())
    }

    pub fn push(&mut self, name: impl Into<String>, node: SchemaNode) {
        self.0.push((name.into(), node));
    }

    pub fn insert_first(&mut self, name: impl Into<String>, node: SchemaNode) {
        self.0.insert(0, (name.into(), node));
    }

    pub fn get(&self, name: &str) -> Option<&SchemaNode> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SchemaNode)> {
        self.0.iter().map(|(n, node)| (n.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a dotted path through nested objects.
    pub fn resolve(&self, path: &str) -> Option<&SchemaNode> {
        let mut parts = path.split('.');
        let mut node = self.get(parts.next()?)?;
        for part in parts {
            match node {
                SchemaNode::NestedObject { fields } => node = fields.get(part)?,
                _ => return None,
            }
        }
        Some(node)
    }
}

/// Compiled schema of one collection.
#[derive(Debug, Clone)]
pub struct SchemaTree {
    pub collection: String,
    pub fields: Fields,
    pub settings: Settings,
}

impl SchemaTree {
    pub fn id_node(&self) -> &SchemaNode {
        // The compiler always places an id node first.
        &self.fields.0[0].1
    }

    pub fn id_kind(&self) -> IdKind {
        self.id_node().id_kind().unwrap_or(IdKind::Incr)
    }

    pub fn incr_max(&self) -> u64 {
        match self.id_node() {
            SchemaNode::IncrId { max } => *max,
            _ => MAX_SAFE_ID,
        }
    }
}

/// Id kinds of every registered collection, resolved before any fields are compiled.
pub type IdKinds = HashMap<String, IdKind>;
