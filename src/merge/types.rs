//! Result types of a merge attempt.
//!
//! A merge that runs to completion is `Ok` even when humans still have
//! choices to make: [`DirectConflict`]s are ordinary data, not errors.
//! Only internal-consistency failures surface as
//! [`MergeFault`](crate::error::MergeFault).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::doc::{Document, Iid, Value};
use crate::error::SchemaError;
use crate::schema::meta::SchemaMeta;

// ---------------------------------------------------------------------------
// BranchSide / PickMap
// ---------------------------------------------------------------------------

/// Which branch a pick selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchSide {
    Left,
    Right,
}

/// Conflict resolutions supplied by the caller, keyed by conflict group.
///
/// Groups are stable path-derived strings, so a re-run after partial
/// resolution addresses the same conflicts by the same keys.
pub type PickMap = BTreeMap<String, BranchSide>;

// ---------------------------------------------------------------------------
// DirectConflict
// ---------------------------------------------------------------------------

/// A genuine divergence that needs a human choice.
///
/// Until a pick for `group` is supplied, the merged document retains the
/// ancestor's value at this position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirectConflict {
    /// Stable key for this conflict, e.g. `StyleToken#5.value` or
    /// `Site#1.styleTokens[primary]`.
    pub group: String,
    /// The class owning the conflicted field.
    pub class: String,
    /// The conflicted field.
    pub field: String,
    /// Snapshot of the ancestor's value.
    pub ancestor: serde_json::Value,
    /// Snapshot of the left branch's value.
    pub left: serde_json::Value,
    /// Snapshot of the right branch's value.
    pub right: serde_json::Value,
}

// ---------------------------------------------------------------------------
// AutoReconciliation
// ---------------------------------------------------------------------------

/// A divergence the engine resolved on its own, reported so nothing is
/// changed silently.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AutoReconciliation {
    /// Two insertions collided on a name; the right branch's was renamed
    /// and every name-dependent reference to it rewritten.
    DuplicateName {
        /// Class of the renamed instance.
        class: String,
        /// The name field.
        field: String,
        /// Identity of the renamed instance.
        iid: Iid,
        /// The colliding name.
        orig_name: String,
        /// The name it now carries.
        renamed_to: String,
    },
}

// ---------------------------------------------------------------------------
// MergeStep
// ---------------------------------------------------------------------------

/// Outcome of one merge attempt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MergeStep {
    /// Everything merged; the document is final.
    Merged {
        doc: Document,
        reconciliations: Vec<AutoReconciliation>,
    },
    /// The merge ran to completion but some positions await picks. The
    /// document holds ancestor values there; supply picks and re-run.
    NeedsResolution {
        doc: Document,
        conflicts: Vec<DirectConflict>,
        reconciliations: Vec<AutoReconciliation>,
    },
}

impl MergeStep {
    /// The merged document, whichever state it is in.
    #[must_use]
    pub fn doc(&self) -> &Document {
        match self {
            Self::Merged { doc, .. } | Self::NeedsResolution { doc, .. } => doc,
        }
    }

    /// The conflicts, empty when fully merged.
    #[must_use]
    pub fn conflicts(&self) -> &[DirectConflict] {
        match self {
            Self::Merged { .. } => &[],
            Self::NeedsResolution { conflicts, .. } => conflicts,
        }
    }

    /// The auto-reconciliations.
    #[must_use]
    pub fn reconciliations(&self) -> &[AutoReconciliation] {
        match self {
            Self::Merged {
                reconciliations, ..
            }
            | Self::NeedsResolution {
                reconciliations, ..
            } => reconciliations,
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Renders a value as display JSON for conflict reports: strong references
/// expand into their subtree, weak references stay as `{"ref": iid}`.
///
/// # Errors
///
/// Returns a [`SchemaError`] when an expanded class is not declared.
pub fn snapshot(
    meta: &SchemaMeta,
    doc: &Document,
    value: &Value,
    weak: bool,
) -> Result<serde_json::Value, SchemaError> {
    use serde_json::{Map, Value as Json, json};
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Num(n) => json!(n),
        Value::Str(s) => json!(s),
        Value::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(snapshot(meta, doc, item, weak)?);
            }
            Json::Array(out)
        }
        Value::Map(entries) => {
            let mut out = Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), snapshot(meta, doc, v, weak)?);
            }
            Json::Object(out)
        }
        Value::Ref(iid) => {
            if weak {
                json!({ "ref": iid.0 })
            } else if let Some(inst) = doc.get(*iid) {
                let mut fields = Map::new();
                for field in meta.all_fields(&inst.class)? {
                    if field.transient {
                        continue;
                    }
                    fields.insert(
                        field.name.clone(),
                        snapshot(meta, doc, inst.field(&field.name), field.weak_ref)?,
                    );
                }
                json!({ "class": inst.class, "iid": iid.0, "fields": fields })
            } else {
                json!({ "missing": iid.0 })
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
