//! Embedded, schema-validated JSON document database.
//!
//! A data directory holds a `schema.yaml` and one sharded set of JSON files per
//! collection. Documents are cast and validated against the compiled schema on every
//! write, references between collections are checked for existence, and reads go
//! through a small filter/sort/projection query engine.

pub mod array;
pub mod db;
pub mod document;
pub mod error;
pub mod query;
pub mod schema;
pub mod store;
pub mod validation;

pub use array::ArrayMatcher;
pub use db::{Collection, Database};
pub use document::{DocId, Document};
pub use error::{ErrorReport, Result, ShelfError};
pub use query::{Query, SortDirection};
pub use schema::{parse_schema, parse_schema_str, SchemaRegistry};
pub use store::{FileStore, MemoryStore, StoreBackend};
