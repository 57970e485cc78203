//! The document model: values, instances, and the per-branch arena.

pub mod document;
pub mod value;

pub use document::{Document, NodeCtx, deep_inst_eq, deep_value_eq};
pub use value::{Iid, Instance, Value};
