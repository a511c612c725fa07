use super::types::*;
use crate::error::{Result, ShelfError};
use crate::validation::scalar::{parse_date, validate_scalar};
use regex::Regex;
use serde_json::{Map, Value};

const SCHEMA_KEY: &str = "schema";
const REF_KEY: &str = "$ref";
const TYPE_KEY: &str = "type";

/// Type names accepted on the right-hand side of `type:` or as a bare declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Scalar(ScalarKind),
    Array,
    Incr,
    Uid,
}

impl Marker {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "String" => Marker::Scalar(ScalarKind::String),
            "Number" => Marker::Scalar(ScalarKind::Number),
            "Boolean" => Marker::Scalar(ScalarKind::Boolean),
            "Date" => Marker::Scalar(ScalarKind::Date),
            "Any" => Marker::Scalar(ScalarKind::Any),
            "Array" => Marker::Array,
            "$incr" => Marker::Incr,
            "$uid" => Marker::Uid,
            _ => return None,
        })
    }

    fn allowed_keys(&self) -> &'static [&'static str] {
        match self {
            Marker::Scalar(ScalarKind::String) => &[
                "required", "default", "minLength", "maxLength", "enum", "trim", "lowercase",
                "capitalize", "validate",
            ],
            Marker::Scalar(ScalarKind::Number) => {
                &["required", "default", "min", "max", "enum", "validate"]
            }
            Marker::Scalar(ScalarKind::Boolean) => &["required", "default"],
            Marker::Scalar(ScalarKind::Date) => {
                &["required", "default", "startsAfter", "startsBefore"]
            }
            Marker::Scalar(ScalarKind::Any) => &["required", "default", "anyOf"],
            Marker::Array => &["required", "default", "minLength", "maxLength", "enum"],
            Marker::Incr => &["max"],
            Marker::Uid => &["minLength", "maxLength"],
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Marker::Scalar(kind) => kind.name(),
            Marker::Array => "Array",
            Marker::Incr => "$incr",
            Marker::Uid => "$uid",
        }
    }
}

/// Walks declarative field declarations and produces schema nodes.
///
/// `id_kinds` holds the id kind of every collection in the registry being built, so
/// references may target collections declared later (or the collection itself).
pub struct Compiler<'a> {
    id_kinds: &'a IdKinds,
}

impl<'a> Compiler<'a> {
    pub fn new(id_kinds: &'a IdKinds) -> Self {
        Compiler { id_kinds }
    }

    /// Compile the declarations of one collection into a schema tree.
    pub fn compile_tree(
        &self,
        collection: &str,
        settings: Settings,
        declarations: &Map<String, Value>,
    ) -> Result<SchemaTree> {
        let mut fields = Fields::new();
        let mut id_node = None;

        for (name, decl) in declarations {
            if name == "id" {
                id_node = Some(compile_id(decl)?);
                continue;
            }
            fields.push(name.clone(), self.compile_node(name, decl, 0)?);
        }

        fields.insert_first(
            "id",
            id_node.unwrap_or(SchemaNode::IncrId { max: MAX_SAFE_ID }),
        );

        Ok(SchemaTree {
            collection: collection.to_string(),
            fields,
            settings,
        })
    }

    /// `depth` is the number of arrays enclosing the declaration.
    fn compile_node(&self, path: &str, decl: &Value, depth: usize) -> Result<SchemaNode> {
        match decl {
            Value::String(name) => self.compile_marker(path, name, &Map::new()),
            Value::Array(items) => Ok(SchemaNode::Array {
                embed: self.compile_embed(path, items, depth + 1)?,
                rules: Rules::default(),
            }),
            Value::Object(map) if map.contains_key(SCHEMA_KEY) => {
                check_embed_depth(path, depth)?;
                let (collection, required) = self.compile_embedded(path, map)?;
                Ok(SchemaNode::EmbeddedDocument {
                    collection,
                    required,
                })
            }
            Value::Object(map) if map.contains_key(REF_KEY) => {
                check_embed_depth(path, depth)?;
                let (collection, id_kind, required) = self.compile_ref(path, map)?;
                Ok(SchemaNode::Ref {
                    collection,
                    id_kind,
                    required,
                })
            }
            Value::Object(map) => match map.get(TYPE_KEY) {
                Some(Value::String(name)) => self.compile_marker(path, name, map),
                Some(Value::Object(_)) | None => Ok(SchemaNode::NestedObject {
                    fields: self.compile_fields(path, map, depth)?,
                }),
                Some(other) => Err(ShelfError::schema(
                    path,
                    format!("'type' must be a type name, got {other}"),
                )),
            },
            other => Err(ShelfError::schema(
                path,
                format!("unsupported field declaration {other}"),
            )),
        }
    }

    fn compile_fields(&self, path: &str, map: &Map<String, Value>, depth: usize) -> Result<Fields> {
        let mut fields = Fields::new();
        for (name, decl) in map {
            let child = format!("{path}.{name}");
            fields.push(name.clone(), self.compile_node(&child, decl, depth)?);
        }
        Ok(fields)
    }

    fn compile_marker(&self, path: &str, name: &str, options: &Map<String, Value>) -> Result<SchemaNode> {
        let marker = Marker::parse(name)
            .ok_or_else(|| ShelfError::schema(path, format!("unknown type '{name}'")))?;

        match marker {
            Marker::Incr | Marker::Uid => Err(ShelfError::schema(
                path,
                format!("'{}' is only valid on the 'id' field", marker.name()),
            )),
            Marker::Array => Ok(SchemaNode::Array {
                embed: ArrayEmbed::Empty,
                rules: extract_rules(path, marker, options)?,
            }),
            Marker::Scalar(kind) => Ok(SchemaNode::Scalar {
                kind,
                rules: extract_rules(path, marker, options)?,
            }),
        }
    }

    fn compile_embed(&self, path: &str, items: &[Value], depth: usize) -> Result<ArrayEmbed> {
        let item = match items {
            [] => return Ok(ArrayEmbed::Empty),
            [item] => item,
            _ => {
                return Err(ShelfError::schema(
                    path,
                    "array declarations take exactly one element type",
                ))
            }
        };

        match item {
            Value::String(name) => match Marker::parse(name) {
                Some(Marker::Scalar(kind)) => Ok(ArrayEmbed::ScalarList {
                    kind,
                    rules: Rules::default(),
                }),
                Some(Marker::Array) => Ok(ArrayEmbed::ArrayOfArray {
                    inner: Box::new(ArrayEmbed::Empty),
                }),
                Some(marker) => Err(ShelfError::schema(
                    path,
                    format!("'{}' cannot be used as an array element", marker.name()),
                )),
                None => Err(ShelfError::schema(path, format!("unknown type '{name}'"))),
            },
            Value::Array(inner) => Ok(ArrayEmbed::ArrayOfArray {
                inner: Box::new(self.compile_embed(path, inner, depth + 1)?),
            }),
            Value::Object(map) if map.contains_key(REF_KEY) => {
                check_embed_depth(path, depth)?;
                let (collection, id_kind, _) = self.compile_ref(path, map)?;
                Ok(ArrayEmbed::RefList {
                    collection,
                    id_kind,
                })
            }
            Value::Object(map) if map.contains_key(SCHEMA_KEY) => {
                check_embed_depth(path, depth)?;
                let (collection, _) = self.compile_embedded(path, map)?;
                Ok(ArrayEmbed::DocList { collection })
            }
            Value::Object(map) => match map.get(TYPE_KEY) {
                Some(Value::String(name)) => match Marker::parse(name) {
                    Some(marker @ Marker::Scalar(kind)) => Ok(ArrayEmbed::ScalarList {
                        kind,
                        rules: extract_rules(path, marker, map)?,
                    }),
                    _ => Err(ShelfError::schema(
                        path,
                        format!("'{name}' cannot be used as an array element"),
                    )),
                },
                _ => Ok(ArrayEmbed::ObjectList {
                    fields: self.compile_fields(path, map, depth)?,
                }),
            },
            other => Err(ShelfError::schema(
                path,
                format!("unsupported array element declaration {other}"),
            )),
        }
    }

    fn compile_embedded(&self, path: &str, map: &Map<String, Value>) -> Result<(String, bool)> {
        check_keys(path, map, &[SCHEMA_KEY, "required"])?;
        let collection = map
            .get(SCHEMA_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ShelfError::schema(path, "'schema' must name a collection"))?;
        self.target_kind(path, collection)?;
        Ok((collection.to_string(), bool_option(path, map, "required")?))
    }

    /// Accepts `{ $ref: groups }` or `{ collection: groups, $ref: Number }`.
    fn compile_ref(&self, path: &str, map: &Map<String, Value>) -> Result<(String, IdKind, bool)> {
        check_keys(path, map, &[REF_KEY, "collection", "required"])?;
        let target = map
            .get(REF_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| ShelfError::schema(path, "'$ref' must be a collection or id type"))?;

        let (collection, declared_kind) = match map.get("collection") {
            Some(Value::String(collection)) => {
                let kind = match target {
                    "Number" | "$incr" => IdKind::Incr,
                    "String" | "$uid" => IdKind::Uid,
                    other => {
                        return Err(ShelfError::schema(
                            path,
                            format!("'{other}' is not a valid reference id type"),
                        ))
                    }
                };
                (collection.as_str(), Some(kind))
            }
            Some(other) => {
                return Err(ShelfError::schema(
                    path,
                    format!("'collection' must be a collection name, got {other}"),
                ))
            }
            None => (target, None),
        };

        let id_kind = self.target_kind(path, collection)?;
        if let Some(declared) = declared_kind {
            if declared != id_kind {
                return Err(ShelfError::schema(
                    path,
                    format!("reference id type does not match the id of collection '{collection}'"),
                ));
            }
        }
        Ok((collection.to_string(), id_kind, bool_option(path, map, "required")?))
    }

    fn target_kind(&self, path: &str, collection: &str) -> Result<IdKind> {
        self.id_kinds
            .get(collection)
            .copied()
            .ok_or_else(|| ShelfError::schema(path, format!("unknown collection '{collection}'")))
    }
}

/// Resolve the id kind of a collection from its declarations without compiling anything else.
pub fn declared_id_kind(declarations: &Map<String, Value>) -> Result<IdKind> {
    match declarations.get("id") {
        Some(decl) => Ok(compile_id(decl)?
            .id_kind()
            .unwrap_or(IdKind::Incr)),
        None => Ok(IdKind::Incr),
    }
}

fn compile_id(decl: &Value) -> Result<SchemaNode> {
    let (name, options) = match decl {
        Value::String(name) => (name.as_str(), Map::new()),
        Value::Object(map) => match map.get(TYPE_KEY) {
            Some(Value::String(name)) => (name.as_str(), map.clone()),
            _ => return Err(ShelfError::schema("id", "id must be declared as $incr or $uid")),
        },
        _ => return Err(ShelfError::schema("id", "id must be declared as $incr or $uid")),
    };

    match Marker::parse(name) {
        Some(marker @ Marker::Incr) => {
            check_keys("id", &options, &id_keys(marker))?;
            let max = match options.get("max") {
                Some(value) => value
                    .as_u64()
                    .filter(|max| *max > 0)
                    .ok_or_else(|| ShelfError::schema("id", "'max' must be a positive integer"))?,
                None => MAX_SAFE_ID,
            };
            Ok(SchemaNode::IncrId { max })
        }
        Some(marker @ Marker::Uid) => {
            check_keys("id", &options, &id_keys(marker))?;
            let min_len = usize_option("id", &options, "minLength")?.unwrap_or(DEFAULT_UID_MIN_LEN);
            let max_len = usize_option("id", &options, "maxLength")?.unwrap_or(DEFAULT_UID_MAX_LEN);
            if min_len == 0 || min_len > max_len {
                return Err(ShelfError::schema(
                    "id",
                    format!("invalid $uid length bounds {min_len}..{max_len}"),
                ));
            }
            Ok(SchemaNode::UidId { min_len, max_len })
        }
        _ => Err(ShelfError::schema(
            "id",
            format!("id must be declared as $incr or $uid, got '{name}'"),
        )),
    }
}

fn id_keys(marker: Marker) -> Vec<&'static str> {
    std::iter::once(TYPE_KEY)
        .chain(marker.allowed_keys().iter().copied())
        .collect()
}

fn check_embed_depth(path: &str, depth: usize) -> Result<()> {
    if depth > 1 {
        return Err(ShelfError::schema(
            path,
            "references and embedded documents are only supported one array level deep",
        ));
    }
    Ok(())
}

fn check_keys(path: &str, map: &Map<String, Value>, allowed: &[&str]) -> Result<()> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(ShelfError::schema(
                path,
                format!("unknown option '{key}' for field '{path}'"),
            ));
        }
    }
    Ok(())
}

fn extract_rules(path: &str, marker: Marker, options: &Map<String, Value>) -> Result<Rules> {
    let mut rules = Rules::default();
    let allowed = marker.allowed_keys();

    for (key, value) in options {
        if key == TYPE_KEY {
            continue;
        }
        if !allowed.contains(&key.as_str()) {
            return Err(ShelfError::schema(
                path,
                format!("unknown option '{key}' for {} field '{path}'", marker.name()),
            ));
        }
        match key.as_str() {
            "required" => rules.required = bool_option(path, options, key)?,
            "default" => rules.default = Some(value.clone()),
            "min" => rules.min = Some(number_option(path, key, value)?),
            "max" => rules.max = Some(number_option(path, key, value)?),
            "minLength" => rules.min_length = usize_option(path, options, key)?,
            "maxLength" => rules.max_length = usize_option(path, options, key)?,
            "enum" => {
                let values = value
                    .as_array()
                    .ok_or_else(|| ShelfError::schema(path, "'enum' must be a list"))?;
                rules.enum_values = Some(values.clone());
            }
            "trim" => rules.trim = bool_option(path, options, key)?,
            "lowercase" => rules.lowercase = bool_option(path, options, key)?,
            "capitalize" => rules.capitalize = bool_option(path, options, key)?,
            "startsAfter" => rules.starts_after = Some(date_option(path, key, value)?),
            "startsBefore" => rules.starts_before = Some(date_option(path, key, value)?),
            "anyOf" => {
                let entries = value
                    .as_array()
                    .ok_or_else(|| ShelfError::schema(path, "'anyOf' must be a list"))?;
                rules.any_of = Some(
                    entries
                        .iter()
                        .map(|entry| match entry.as_str().and_then(TypeMarker::parse) {
                            Some(marker) => AnyOfEntry::Type(marker),
                            None => AnyOfEntry::Value(entry.clone()),
                        })
                        .collect(),
                );
            }
            "validate" => {
                let pattern = value
                    .as_str()
                    .ok_or_else(|| ShelfError::schema(path, "'validate' must be a pattern"))?;
                let regex = Regex::new(pattern).map_err(|e| {
                    ShelfError::schema(path, format!("invalid 'validate' pattern: {e}"))
                })?;
                rules.pattern = Some(regex);
            }
            other => {
                return Err(ShelfError::schema(
                    path,
                    format!("option '{other}' is not supported for {} field '{path}'", marker.name()),
                ))
            }
        }
    }

    if rules.lowercase && rules.capitalize {
        return Err(ShelfError::schema(
            path,
            "'lowercase' and 'capitalize' cannot be combined",
        ));
    }
    if let (Some(min), Some(max)) = (rules.min_length, rules.max_length) {
        if min > max {
            return Err(ShelfError::schema(path, "'minLength' is greater than 'maxLength'"));
        }
    }

    if let Marker::Scalar(kind) = marker {
        check_declared_values(path, kind, &rules)?;
    }
    Ok(rules)
}

/// Defaults and enum members must themselves be valid values of the field.
fn check_declared_values(path: &str, kind: ScalarKind, rules: &Rules) -> Result<()> {
    if let Some(values) = &rules.enum_values {
        let expected: fn(&Value) -> bool = match kind {
            ScalarKind::String => Value::is_string,
            ScalarKind::Number => Value::is_number,
            _ => return Ok(()),
        };
        if let Some(bad) = values.iter().find(|v| !expected(v)) {
            return Err(ShelfError::schema(
                path,
                format!("enum value {bad} is not a {}", kind.name()),
            ));
        }
    }
    if let Some(default) = &rules.default {
        validate_scalar(path, kind, rules, Some(default)).map_err(|e| {
            ShelfError::schema(path, format!("invalid default: {e}"))
        })?;
    }
    Ok(())
}

fn bool_option(path: &str, map: &Map<String, Value>, key: &str) -> Result<bool> {
    match map.get(key) {
        None => Ok(false),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(ShelfError::schema(
            path,
            format!("'{key}' must be true or false, got {other}"),
        )),
    }
}

fn usize_option(path: &str, map: &Map<String, Value>, key: &str) -> Result<Option<usize>> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value
            .as_u64()
            .map(|n| Some(n as usize))
            .ok_or_else(|| {
                ShelfError::schema(path, format!("'{key}' must be a non-negative integer"))
            }),
    }
}

fn number_option(path: &str, key: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| ShelfError::schema(path, format!("'{key}' must be a number, got {value}")))
}

fn date_option(path: &str, key: &str, value: &Value) -> Result<chrono::DateTime<chrono::Utc>> {
    value
        .as_str()
        .and_then(parse_date)
        .ok_or_else(|| ShelfError::schema(path, format!("'{key}' must be an ISO date, got {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kinds() -> IdKinds {
        IdKinds::from([
            ("users".to_string(), IdKind::Incr),
            ("groups".to_string(), IdKind::Incr),
            ("tokens".to_string(), IdKind::Uid),
        ])
    }

    fn compile(decls: Value) -> Result<SchemaTree> {
        let kinds = kinds();
        let map = decls.as_object().unwrap().clone();
        Compiler::new(&kinds).compile_tree("users", Settings::default(), &map)
    }

    #[test]
    fn test_bare_markers_become_scalars() {
        let tree = compile(json!({ "name": "String", "age": "Number", "seen": "Date" })).unwrap();
        assert!(matches!(
            tree.fields.get("name"),
            Some(SchemaNode::Scalar { kind: ScalarKind::String, .. })
        ));
        assert!(matches!(
            tree.fields.get("seen"),
            Some(SchemaNode::Scalar { kind: ScalarKind::Date, .. })
        ));
    }

    #[test]
    fn test_implicit_incr_id_comes_first() {
        let tree = compile(json!({ "name": "String" })).unwrap();
        let names: Vec<&str> = tree.fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(tree.id_kind(), IdKind::Incr);
    }

    #[test]
    fn test_declared_uid_id() {
        let tree = compile(json!({
            "name": "String",
            "id": { "type": "$uid", "minLength": 8, "maxLength": 12 },
        }))
        .unwrap();
        assert!(matches!(
            tree.id_node(),
            SchemaNode::UidId { min_len: 8, max_len: 12 }
        ));
    }

    #[test]
    fn test_id_must_be_an_id_type() {
        let err = compile(json!({ "id": "Number" })).unwrap_err();
        assert!(err.to_string().contains("$incr or $uid"));
    }

    #[test]
    fn test_rules_are_extracted() {
        let tree = compile(json!({
            "age": { "type": "Number", "min": 0, "max": 130, "required": true },
        }))
        .unwrap();
        match tree.fields.get("age") {
            Some(SchemaNode::Scalar { rules, .. }) => {
                assert_eq!(rules.min, Some(0.0));
                assert_eq!(rules.max, Some(130.0));
                assert!(rules.required);
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_unknown_option_names_key_and_field() {
        let err = compile(json!({ "age": { "type": "Number", "minimum": 0 } })).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("minimum"));
        assert!(message.contains("age"));
    }

    #[test]
    fn test_every_allowed_option_is_handled() {
        let markers = ["String", "Number", "Boolean", "Date", "Any", "Array", "$incr", "$uid"];
        for marker in markers.into_iter().filter_map(Marker::parse) {
            for key in marker.allowed_keys() {
                let mut options = Map::new();
                options.insert(key.to_string(), Value::Null);
                if let Err(err) = extract_rules("f", marker, &options) {
                    assert!(!err.to_string().contains("is not supported"), "{key}: {err}");
                }
            }
        }
    }

    #[test]
    fn test_option_on_wrong_kind_is_rejected() {
        let err = compile(json!({ "age": { "type": "Number", "trim": true } })).unwrap_err();
        assert!(err.to_string().contains("trim"));
    }

    #[test]
    fn test_lowercase_and_capitalize_conflict() {
        let err = compile(json!({
            "name": { "type": "String", "lowercase": true, "capitalize": true },
        }))
        .unwrap_err();
        assert!(err.to_string().contains("cannot be combined"));
    }

    #[test]
    fn test_invalid_default_is_a_compile_error() {
        let err = compile(json!({ "age": { "type": "Number", "default": "ten" } })).unwrap_err();
        assert!(matches!(err, ShelfError::SchemaCompile { .. }));
    }

    #[test]
    fn test_type_object_is_a_nested_field() {
        let tree = compile(json!({
            "meta": { "type": { "type": "String" }, "size": "Number" },
        }))
        .unwrap();
        match tree.fields.get("meta") {
            Some(SchemaNode::NestedObject { fields }) => {
                assert!(fields.contains("type"));
                assert!(fields.contains("size"));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_reference_forms() {
        let tree = compile(json!({
            "group": { "$ref": "groups" },
            "owner": { "collection": "users", "$ref": "Number" },
            "token": { "$ref": "tokens", "required": true },
        }))
        .unwrap();
        assert!(matches!(
            tree.fields.get("owner"),
            Some(SchemaNode::Ref { id_kind: IdKind::Incr, .. })
        ));
        assert!(matches!(
            tree.fields.get("token"),
            Some(SchemaNode::Ref { id_kind: IdKind::Uid, required: true, .. })
        ));
    }

    #[test]
    fn test_reference_id_type_mismatch() {
        let err = compile(json!({ "t": { "collection": "tokens", "$ref": "Number" } })).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_unknown_reference_target() {
        let err = compile(json!({ "x": { "$ref": "nowhere" } })).unwrap_err();
        assert!(err.to_string().contains("unknown collection 'nowhere'"));
    }

    #[test]
    fn test_array_classification() {
        let tree = compile(json!({
            "any": [],
            "tags": ["Number"],
            "trimmed": [{ "type": "String", "trim": true }],
            "members": [{ "$ref": "users" }],
            "groups": [{ "schema": "groups" }],
            "points": [{ "x": "Number", "y": "Number" }],
            "matrix": [["Number"]],
        }))
        .unwrap();

        let embed = |name: &str| match tree.fields.get(name) {
            Some(SchemaNode::Array { embed, .. }) => embed.describe(),
            other => panic!("unexpected node {other:?}"),
        };
        assert_eq!(embed("any"), "untyped list");
        assert_eq!(embed("tags"), "scalar list");
        assert_eq!(embed("trimmed"), "scalar list");
        assert_eq!(embed("members"), "reference list");
        assert_eq!(embed("groups"), "document list");
        assert_eq!(embed("points"), "object list");
        assert_eq!(embed("matrix"), "list of lists");
    }

    #[test]
    fn test_references_nested_two_arrays_deep_are_rejected() {
        let err = compile(json!({ "deep": [[{ "$ref": "users" }]] })).unwrap_err();
        assert!(err.to_string().contains("one array level deep"));

        let err = compile(json!({ "deep": [[{ "owner": { "$ref": "users" } }]] })).unwrap_err();
        assert!(err.to_string().contains("one array level deep"));
    }

    #[test]
    fn test_object_list_may_hold_references() {
        let tree = compile(json!({ "items": [{ "owner": { "$ref": "users" } }] })).unwrap();
        match tree.fields.get("items") {
            Some(SchemaNode::Array { embed: ArrayEmbed::ObjectList { fields }, .. }) => {
                assert!(matches!(fields.get("owner"), Some(SchemaNode::Ref { .. })));
            }
            other => panic!("unexpected node {other:?}"),
        }
    }

    #[test]
    fn test_two_element_array_is_rejected() {
        let err = compile(json!({ "pair": ["Number", "String"] })).unwrap_err();
        assert!(err.to_string().contains("exactly one element type"));
    }

    #[test]
    fn test_id_types_only_on_id_field() {
        let err = compile(json!({ "serial": "$incr" })).unwrap_err();
        assert!(err.to_string().contains("only valid on the 'id' field"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = compile(json!({ "code": { "type": "String", "validate": "([a-z" } })).unwrap_err();
        assert!(err.to_string().contains("invalid 'validate' pattern"));
    }
}
