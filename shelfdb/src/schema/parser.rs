use super::registry::SchemaRegistry;
use super::types::SchemaFile;
use crate::error::Result;
use std::path::Path;

/// Parse and compile a schema.yaml file.
pub fn parse_schema(path: &Path) -> Result<SchemaRegistry> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse and compile a schema YAML string.
pub fn parse_schema_str(content: &str) -> Result<SchemaRegistry> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    SchemaRegistry::compile(&file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{IdKind, SchemaNode};

    #[test]
    fn test_parse_full_schema_file() {
        let registry = parse_schema_str(
            r#"
database:
  shard_max_bytes: 4096
collections:
  users:
    settings: { strict: true, timestamps: { created_at: true, updated_at: true } }
    fields:
      name: { type: String, required: true }
      group: { $ref: groups }
  groups:
    fields:
      id: { type: $uid, minLength: 10, maxLength: 10 }
      title: String
"#,
        )
        .unwrap();

        assert_eq!(registry.config().shard_max_bytes, 4096);
        let users = registry.tree("users").unwrap();
        assert!(users.settings.strict);
        assert!(users.settings.timestamps.created_at);
        assert!(matches!(
            users.fields.get("group"),
            Some(SchemaNode::Ref { id_kind: IdKind::Uid, .. })
        ));
        assert_eq!(registry.tree("groups").unwrap().id_kind(), IdKind::Uid);
    }

    #[test]
    fn test_database_block_is_optional() {
        let registry = parse_schema_str(
            r#"
collections:
  notes:
    fields:
      body: String
"#,
        )
        .unwrap();
        assert_eq!(registry.config().shard_max_bytes, 1024 * 1024);
    }

    #[test]
    fn test_malformed_yaml_is_reported() {
        let err = parse_schema_str("collections: [").unwrap_err();
        assert!(err.to_string().starts_with("YAML error"));
    }
}
