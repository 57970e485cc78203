//! Registered special-case merge handlers.
//!
//! Each handler owns one field the generic policies cannot describe, and
//! each delegates straight back into the generic list merge with
//! field-specific keying, so the deletion-wins and conflict rules stay
//! uniform across the whole engine.

use crate::doc::{Document, NodeCtx, Value};
use crate::error::MergeFault;
use crate::merge::engine::{FieldCx, Merger};
use crate::policy::{ArrayType, Reconcile};

/// Child lists of template nodes (`TplTag.children`,
/// `TplSlot.defaultContents`, `RenderExpr.tpl`): identity-matched and
/// order-preserving, so subtree insertions from both branches combine and
/// recursive edits merge node by node.
pub fn merge_tpl_children(m: &mut Merger<'_>, cx: &FieldCx) -> Result<(), MergeFault> {
    m.merge_list_field(cx, ArrayType::Ordered, Reconcile::ByIdentity)
}

/// `Component.variants`: identity-matched with duplicate-name auto-rename,
/// since variants added on both branches routinely pick the same name.
pub fn merge_component_variants(m: &mut Merger<'_>, cx: &FieldCx) -> Result<(), MergeFault> {
    m.merge_list_field(
        cx,
        ArrayType::Unordered,
        Reconcile::Rename {
            name_key: "name",
            force: false,
        },
    )
}

/// `Site.globalContexts`: at most one instance per context component, so
/// elements are matched by the component they instantiate.
pub fn merge_global_contexts(m: &mut Merger<'_>, cx: &FieldCx) -> Result<(), MergeFault> {
    m.merge_list_field(
        cx,
        ArrayType::Unordered,
        Reconcile::ByKeyFn {
            key_fn: global_context_key,
        },
    )
}

fn global_context_key(doc: &Document, value: &Value) -> Option<String> {
    let node = NodeCtx {
        doc,
        iid: value.as_ref_iid()?,
    };
    let component = node.inst().ok()?.field("component").as_ref_iid()?;
    Some(format!("component={component}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
