//! Schema compiler and three-way structural merge engine for branchable
//! design documents.
//!
//! A document is a tree of typed nodes described by a schema written in a
//! small indentation-based language. Branching copies the tree; merging
//! brings two branches back together against their common ancestor,
//! structurally, with a hand-authored policy saying what every divergence
//! means. The result either merges clean or reports conflicts as data —
//! the caller resolves them by supplying picks and running the same merge
//! again.
//!
//! ```
//! use sitemerge::policy::{site_policy_table, validate};
//! use sitemerge::schema::site_meta;
//!
//! let meta = site_meta().expect("embedded schema compiles");
//! let table = site_policy_table();
//! validate::check(&meta, &table).expect("policy table is sound");
//! ```

pub mod doc;
pub mod error;
pub mod merge;
pub mod policy;
pub mod schema;

pub use doc::{Document, Iid, Instance, NodeCtx, Value};
pub use error::{MergeFault, PolicyError, SchemaError};
pub use merge::{
    AutoReconciliation, BranchSide, DirectConflict, MergeStep, PickMap, try_merge,
};
pub use policy::{ArrayPolicy, ArrayType, FieldPolicy, PolicyTable, Reconcile, site_policy_table};
pub use schema::{SchemaMeta, Ty, site_meta};
