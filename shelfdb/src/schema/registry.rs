use super::compiler::{declared_id_kind, Compiler};
use super::types::{DatabaseConfig, IdKinds, SchemaFile, SchemaTree};
use crate::error::{Result, ShelfError};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Compiled schema trees of every collection, keyed by collection name.
///
/// Built once when the database is opened; trees are immutable afterwards. References
/// and embedded documents name their target collection and are resolved through the
/// registry, which makes self references and cycles between collections possible.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    trees: HashMap<String, SchemaTree>,
    config: DatabaseConfig,
}

impl SchemaRegistry {
    /// Compile every collection of a parsed schema file.
    pub fn compile(file: &SchemaFile) -> Result<Self> {
        let mut declarations = Vec::with_capacity(file.collections.len());
        for (name, definition) in &file.collections {
            let fields = serde_json::to_value(&definition.fields)?;
            let fields = match fields {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            declarations.push((name.clone(), definition.settings, fields));
        }

        // Pass one: id kinds, so any collection can be a reference target.
        let mut id_kinds = IdKinds::new();
        for (name, _, fields) in &declarations {
            id_kinds.insert(name.clone(), declared_id_kind(fields)?);
        }

        let compiler = Compiler::new(&id_kinds);
        let mut trees = HashMap::new();
        for (name, settings, fields) in &declarations {
            let tree = compiler.compile_tree(name, *settings, fields)?;
            log::debug!("compiled schema for '{name}' ({} fields)", tree.fields.len());
            trees.insert(name.clone(), tree);
        }

        Ok(SchemaRegistry {
            trees,
            config: file.database,
        })
    }

    pub fn tree(&self, collection: &str) -> Result<&SchemaTree> {
        self.trees
            .get(collection)
            .ok_or_else(|| ShelfError::UnknownCollection(collection.to_string()))
    }

    pub fn contains(&self, collection: &str) -> bool {
        self.trees.contains_key(collection)
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.trees.keys().map(String::as_str)
    }

    pub fn config(&self) -> DatabaseConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ShelfError;
    use crate::schema::{parse_schema_str, SchemaNode};

    #[test]
    fn test_forward_and_self_references() {
        let registry = parse_schema_str(
            r#"
collections:
  people:
    fields:
      name: String
      manager: { $ref: people }
      team: { schema: teams }
  teams:
    fields:
      title: String
"#,
        )
        .unwrap();

        let people = registry.tree("people").unwrap();
        assert!(matches!(people.fields.get("manager"), Some(SchemaNode::Ref { .. })));
        assert!(matches!(
            people.fields.get("team"),
            Some(SchemaNode::EmbeddedDocument { .. })
        ));
    }

    #[test]
    fn test_unknown_collection() {
        let registry = parse_schema_str("collections: {}").unwrap();
        assert!(matches!(
            registry.tree("ghosts"),
            Err(ShelfError::UnknownCollection(_))
        ));
    }

    #[test]
    fn test_compile_errors_surface_at_registration() {
        let err = parse_schema_str(
            r#"
collections:
  users:
    fields:
      age: { type: Number, minimum: 0 }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ShelfError::SchemaCompile { .. }));
    }
}
