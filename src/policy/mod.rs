//! The merge policy table.
//!
//! Merge behavior is not guessed from shapes: every `(class, field)` pair
//! carries a hand-authored [`FieldPolicy`] saying what a divergence there
//! *means*. The table is pure data (plus function pointers for the few
//! spots that need domain smarts), validated up front by
//! [`validate`](crate::policy::validate), and consulted loudly at merge
//! time: a missing row is a fault, never a silent default.

pub mod site_policies;
pub mod validate;

use std::collections::BTreeMap;

use crate::doc::{Document, Value};
use crate::error::MergeFault;
use crate::merge::engine::{FieldCx, Merger};

pub use site_policies::site_policy_table;

// ---------------------------------------------------------------------------
// FieldPolicy
// ---------------------------------------------------------------------------

/// Derives a merge key for one list element. Returns `None` when the
/// element has no key, which the engine reports as a fault.
pub type KeyFn = fn(&Document, &Value) -> Option<String>;

/// A domain-specific merge routine for one field of a node triple.
/// Handlers append conflicts and reconciliations through the
/// [`Merger`]; most delegate back into the generic list merge with
/// field-specific keying.
pub type SpecialHandler = fn(&mut Merger<'_>, &FieldCx) -> Result<(), MergeFault>;

/// What a divergence on a field means.
#[derive(Clone, Copy, Debug)]
pub enum FieldPolicy {
    /// Either side's value is fine; the left branch wins, no conflict.
    Harmless,
    /// Divergence is impossible by construction; seeing one is a fault.
    Unexpected,
    /// A real user edit: both sides changed → conflict, one side → take it.
    Contents,
    /// Run a registered handler.
    Special(SpecialHandler),
    /// The field is a collection merged element-wise.
    Array(ArrayPolicy),
}

/// How a collection field merges.
#[derive(Clone, Copy, Debug)]
pub struct ArrayPolicy {
    pub array_type: ArrayType,
    pub reconcile: Reconcile,
}

/// Granularity and ordering semantics of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArrayType {
    /// The whole collection is one opaque value.
    Atomic,
    /// Element-wise; relative order is meaningful (left's order wins,
    /// right-only insertions append).
    Ordered,
    /// Element-wise; order carries no meaning.
    Unordered,
}

/// How list elements from different sides are matched up.
#[derive(Clone, Copy, Debug)]
pub enum Reconcile {
    /// Match by identity; colliding `name_key` values among insertions are
    /// auto-renamed rather than conflicted.
    Rename {
        /// Path (dot-separated fields) from the element to its name.
        name_key: &'static str,
        /// Also rename collisions among surviving pre-existing elements,
        /// not just fresh insertions.
        force: bool,
    },
    /// Match by the value at a path from the element.
    ByKeyPath { path: &'static str },
    /// Match by a computed key.
    ByKeyFn { key_fn: KeyFn },
    /// Match by element identity.
    ByIdentity,
}

impl FieldPolicy {
    /// An identity-matched list with name-collision auto-rename.
    #[must_use]
    pub const fn rename_list(array_type: ArrayType, name_key: &'static str) -> Self {
        Self::Array(ArrayPolicy {
            array_type,
            reconcile: Reconcile::Rename {
                name_key,
                force: false,
            },
        })
    }

    /// A list keyed by the value at `path`.
    #[must_use]
    pub const fn keyed_list(array_type: ArrayType, path: &'static str) -> Self {
        Self::Array(ArrayPolicy {
            array_type,
            reconcile: Reconcile::ByKeyPath { path },
        })
    }

    /// A list keyed by a computed key.
    #[must_use]
    pub const fn fn_keyed_list(array_type: ArrayType, key_fn: KeyFn) -> Self {
        Self::Array(ArrayPolicy {
            array_type,
            reconcile: Reconcile::ByKeyFn { key_fn },
        })
    }

    /// An identity-matched list.
    #[must_use]
    pub const fn identity_list(array_type: ArrayType) -> Self {
        Self::Array(ArrayPolicy {
            array_type,
            reconcile: Reconcile::ByIdentity,
        })
    }

    /// A collection merged as one opaque value.
    #[must_use]
    pub const fn atomic_list() -> Self {
        Self::Array(ArrayPolicy {
            array_type: ArrayType::Atomic,
            reconcile: Reconcile::ByIdentity,
        })
    }
}

// ---------------------------------------------------------------------------
// PolicyTable
// ---------------------------------------------------------------------------

/// The full policy table for one schema.
#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    rows: BTreeMap<(String, String), FieldPolicy>,
    code_fields: Vec<(String, String)>,
}

impl PolicyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style row insertion.
    #[must_use]
    pub fn row(mut self, class: &str, field: &str, policy: FieldPolicy) -> Self {
        self.rows
            .insert((class.to_owned(), field.to_owned()), policy);
        self
    }

    /// Declares a text field whose content embeds names by identifier, so
    /// auto-renames must rewrite it.
    #[must_use]
    pub fn code_field(mut self, class: &str, field: &str) -> Self {
        self.code_fields.push((class.to_owned(), field.to_owned()));
        self
    }

    /// The policy for a field.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFault::MissingPolicy`] when no row exists; the table
    /// never falls back to a default.
    pub fn policy_for(&self, class: &str, field: &str) -> Result<FieldPolicy, MergeFault> {
        self.rows
            .get(&(class.to_owned(), field.to_owned()))
            .copied()
            .ok_or_else(|| MergeFault::MissingPolicy {
                class: class.to_owned(),
                field: field.to_owned(),
            })
    }

    /// All rows, in (class, field) order.
    pub fn rows(&self) -> impl Iterator<Item = (&str, &str, &FieldPolicy)> {
        self.rows
            .iter()
            .map(|((c, f), p)| (c.as_str(), f.as_str(), p))
    }

    /// The declared name-embedding text fields.
    #[must_use]
    pub fn code_fields(&self) -> &[(String, String)] {
        &self.code_fields
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_is_a_fault_not_a_default() {
        let table = PolicyTable::new().row("Var", "name", FieldPolicy::Contents);
        assert!(table.policy_for("Var", "name").is_ok());
        assert_eq!(
            table.policy_for("Var", "uuid").unwrap_err(),
            MergeFault::MissingPolicy {
                class: "Var".to_owned(),
                field: "uuid".to_owned(),
            }
        );
    }

    #[test]
    fn rows_iterate_in_order() {
        let table = PolicyTable::new()
            .row("B", "y", FieldPolicy::Harmless)
            .row("A", "x", FieldPolicy::Contents);
        let keys: Vec<_> = table.rows().map(|(c, f, _)| format!("{c}.{f}")).collect();
        assert_eq!(keys, vec!["A.x", "B.y"]);
    }
}
