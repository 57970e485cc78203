//! Schema language: type algebra, parser, metadata runtime, and codegen.

pub mod codegen;
pub mod meta;
pub mod parse;
pub mod site;
pub mod types;

pub use meta::{ClassDef, FieldDef, SchemaMeta};
pub use site::{SITE_SCHEMA, site_meta};
pub use types::Ty;
