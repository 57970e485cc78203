//! Duplicate-name reconciliation.
//!
//! Rename-policy lists promise that both branches can add and rename
//! entries freely: when two elements collide on a name, nothing is lost and
//! nothing is asked of the user. The collider is renamed deterministically
//! (`name`, `name-2`, `name-3`, ...), every name-dependent reference to it
//! is rewritten, and the whole affair is reported as an
//! [`AutoReconciliation`](crate::merge::types::AutoReconciliation). The one
//! collision left alone is a pair of elements that already shared the name
//! in the ancestor: that duplicate predates the merge, and repairing it
//! here would make a self-merge change the document.
//!
//! Identity references need no rewriting (a `Value::Ref` survives a rename
//! untouched); the fields that do are the code-bearing text fields the
//! policy table declares, where names appear as identifiers. Rewrites stay
//! within instances that came from the same branch as the renamed element,
//! since only that branch's code meant the renamed thing by that name.

use std::collections::{BTreeMap, BTreeSet};

use crate::doc::{Document, Iid, Value};
use crate::error::MergeFault;
use crate::merge::engine::{FieldCx, Merger};
use crate::merge::types::AutoReconciliation;

/// Detects and repairs name collisions among the merged elements of one
/// rename-policy list.
pub(crate) fn fix_name_collisions(
    m: &mut Merger<'_>,
    cx: &FieldCx,
    name_key: &'static str,
    force: bool,
    elems: &[Value],
) -> Result<(), MergeFault> {
    // (element, name-owning instance, name field, current name)
    let mut slots: Vec<(Iid, Iid, String, String)> = Vec::new();
    for elem in elems {
        let Some(iid) = elem.as_ref_iid() else {
            continue;
        };
        if let Some((owner, field, name)) = resolve_name_slot(m.merged_doc(), elem, name_key) {
            slots.push((iid, owner, field, name));
        }
    }

    let mut taken: BTreeSet<String> = slots.iter().map(|(_, _, _, n)| n.clone()).collect();
    let mut holders: BTreeMap<&str, Iid> = BTreeMap::new();
    let mut ops: Vec<(Iid, Iid, String, String, String)> = Vec::new();
    for (iid, owner, field, name) in &slots {
        let holder = match holders.get(name.as_str()) {
            Some(&holder) => holder,
            None => {
                holders.insert(name.as_str(), *iid);
                continue;
            }
        };
        // Only a pair of surviving elements that already shared this name
        // in the ancestor stays untouched; a collision the branches created
        // (fresh insertions, clones, or a survivor renamed into it) is
        // repaired so the merged document never gains a duplicate.
        let pre_existing = !force
            && ancestor_name(m, holder, name_key).as_deref() == Some(name.as_str())
            && ancestor_name(m, *iid, name_key).as_deref() == Some(name.as_str());
        if pre_existing {
            tracing::warn!(
                class = cx.class,
                field = cx.field,
                name,
                "pre-existing duplicate name left in place"
            );
            continue;
        }
        let renamed = unique_name(&taken, name);
        taken.insert(renamed.clone());
        ops.push((*iid, *owner, field.clone(), name.clone(), renamed));
    }

    for (iid, owner, field, orig, renamed) in ops {
        let class = m
            .merged_doc()
            .get(owner)
            .map(|inst| inst.class.clone())
            .unwrap_or_default();
        if let Some(inst) = m.merged.get_mut(owner) {
            inst.set(field.clone(), Value::Str(renamed.clone()));
        }
        rewrite_references(m, iid, &orig, &renamed);
        m.recons.push(AutoReconciliation::DuplicateName {
            class,
            field,
            iid,
            orig_name: orig,
            renamed_to: renamed,
        });
    }
    Ok(())
}

/// Rewrites identifier occurrences of `old` in the declared code-bearing
/// fields of every instance that shares the renamed element's branch of
/// origin.
fn rewrite_references(m: &mut Merger<'_>, renamed: Iid, old: &str, new: &str) {
    let from_right = m.right_origin.contains(&renamed);
    let mut edits: Vec<(Iid, String, String)> = Vec::new();
    for (class, field) in m.policy.code_fields() {
        for (iid, inst) in m.merged_doc().iter() {
            if &inst.class != class || m.right_origin.contains(&iid) != from_right {
                continue;
            }
            if let Value::Str(code) = inst.field(field) {
                let rewritten = rewrite_identifier(code, old, new);
                if &rewritten != code {
                    edits.push((iid, field.clone(), rewritten));
                }
            }
        }
    }
    for (iid, field, code) in edits {
        if let Some(inst) = m.merged.get_mut(iid) {
            inst.set(field, Value::Str(code));
        }
    }
}

/// The name an element carried in the ancestor document, or `None` when it
/// did not exist there (a fresh insertion or a clone).
fn ancestor_name(m: &Merger<'_>, iid: Iid, name_key: &str) -> Option<String> {
    resolve_name_slot(m.ancestor_doc(), &Value::Ref(iid), name_key).map(|(_, _, name)| name)
}

/// Walks all but the last segment of `name_key` through references, then
/// reads the final segment as the name. Returns the instance owning the
/// name field along with it, so the caller can write the field back.
fn resolve_name_slot(doc: &Document, elem: &Value, name_key: &str) -> Option<(Iid, String, String)> {
    let segs: Vec<&str> = name_key.split('.').collect();
    let (last, init) = segs.split_last()?;
    let mut cur = elem.clone();
    for seg in init {
        cur = match cur {
            Value::Ref(iid) => doc.get(iid)?.field(seg).clone(),
            _ => return None,
        };
    }
    let owner = cur.as_ref_iid()?;
    let name = doc.get(owner)?.field(last).as_str()?.to_owned();
    Some((owner, (*last).to_owned(), name))
}

/// The first of `base`, `base-2`, `base-3`, ... not yet taken.
pub(crate) fn unique_name(taken: &BTreeSet<String>, base: &str) -> String {
    if !taken.contains(base) {
        return base.to_owned();
    }
    let mut n: u64 = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Replaces whole-identifier occurrences of `old` with `new`, leaving
/// substrings of longer identifiers alone.
pub(crate) fn rewrite_identifier(code: &str, old: &str, new: &str) -> String {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let mut out = String::with_capacity(code.len());
    let chars: Vec<char> = code.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if is_word(chars[i]) {
            let start = i;
            while i < chars.len() && is_word(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if word == old {
                out.push_str(new);
            } else {
                out.push_str(&word);
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
