//! Three-way structural merging.
//!
//! - [`engine`] — the merge driver and list reconciliation.
//! - [`rename`] — duplicate-name auto-rename and reference rewriting.
//! - [`special`] — registered handlers for the few domain-specific fields.
//! - [`types`] — conflicts, reconciliations, and the merge outcome.

pub mod engine;
pub(crate) mod rename;
pub mod special;
pub mod types;

pub use engine::{FieldCx, Merger, try_merge};
pub use types::{AutoReconciliation, BranchSide, DirectConflict, MergeStep, PickMap};
