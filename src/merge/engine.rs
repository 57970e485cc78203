//! The three-way merge driver.
//!
//! [`try_merge`] merges two branch documents against their common ancestor.
//! The merged document starts as a copy of the ancestor with every identity
//! preserved, then the engine walks the shared tree and applies each
//! field's policy. Divergences either resolve (harmless fields, one-sided
//! edits, auto-renames) or surface as [`DirectConflict`]s; the merged
//! document keeps the ancestor's value at every unresolved position, so a
//! partially conflicted merge is still a well-formed document.
//!
//! Conflict resolution is re-entrant rather than interactive: the caller
//! supplies a [`PickMap`] keyed by conflict group and runs the merge again.
//!
//! # Determinism
//!
//! The merge is a pure function of `(ancestor, left, right, picks)`. All
//! iteration is over `BTreeMap`s or schema declaration order, imported
//! identities are preserved, and cloned identities come from a counter
//! seeded off the input documents. Two runs produce identical documents,
//! conflicts, and reconciliations, byte for byte.

use std::collections::{BTreeMap, BTreeSet};

use crate::doc::{Document, Iid, Instance, Value, deep_value_eq};
use crate::error::MergeFault;
use crate::merge::rename;
use crate::merge::types::{
    AutoReconciliation, BranchSide, DirectConflict, MergeStep, PickMap, snapshot,
};
use crate::policy::{ArrayType, FieldPolicy, PolicyTable, Reconcile};
use crate::schema::meta::{FieldDef, SchemaMeta};

// ---------------------------------------------------------------------------
// try_merge
// ---------------------------------------------------------------------------

/// Merges `left` and `right` against their common `ancestor`.
///
/// # Errors
///
/// Returns a [`MergeFault`] on internal inconsistency: mismatched roots,
/// divergence on an `Unexpected` field, a missing policy row, a pick for a
/// conflict group that never surfaced, or a merged document that fails the
/// tree invariant. Ordinary conflicts are *not* errors; they ride along in
/// the `Ok` result.
pub fn try_merge(
    meta: &SchemaMeta,
    policy: &PolicyTable,
    ancestor: &Document,
    left: &Document,
    right: &Document,
    picks: &PickMap,
) -> Result<MergeStep, MergeFault> {
    check_roots(ancestor, left, right)?;

    let mut merged = ancestor.clone();
    merged.set_iid_floor(left.iid_ceiling().max(right.iid_ceiling()));

    let mut merger = Merger {
        meta,
        policy,
        ancestor,
        left,
        right,
        picks,
        merged,
        conflicts: Vec::new(),
        recons: Vec::new(),
        used_picks: BTreeSet::new(),
        right_origin: BTreeSet::new(),
        visited: BTreeSet::new(),
    };

    let root = ancestor.root;
    tracing::debug!(root = root.0, "starting three-way merge");
    merger.merge_node(Some(root), root, root, root)?;

    let Merger {
        mut merged,
        conflicts,
        recons,
        used_picks,
        ..
    } = merger;

    for group in picks.keys() {
        if !used_picks.contains(group) {
            return Err(MergeFault::UnknownPickGroup {
                group: group.clone(),
            });
        }
    }

    merged.collect_garbage(meta)?;
    merged.prune_dangling_weak_refs(meta)?;
    let violations = merged.check_tree_invariant(meta)?;
    if !violations.is_empty() {
        return Err(MergeFault::BrokenInvariant {
            detail: violations.join("; "),
        });
    }

    tracing::debug!(
        conflicts = conflicts.len(),
        reconciliations = recons.len(),
        "merge complete"
    );
    if conflicts.is_empty() {
        Ok(MergeStep::Merged {
            doc: merged,
            reconciliations: recons,
        })
    } else {
        Ok(MergeStep::NeedsResolution {
            doc: merged,
            conflicts,
            reconciliations: recons,
        })
    }
}

fn check_roots(ancestor: &Document, left: &Document, right: &Document) -> Result<(), MergeFault> {
    if left.root != ancestor.root || right.root != ancestor.root {
        return Err(MergeFault::RootMismatch {
            detail: format!(
                "ancestor root {} vs left {} vs right {}",
                ancestor.root, left.root, right.root
            ),
        });
    }
    let classes: Vec<&str> = [ancestor, left, right]
        .iter()
        .filter_map(|d| d.get(d.root))
        .map(|i| i.class.as_str())
        .collect();
    if classes.len() != 3 {
        return Err(MergeFault::MissingInstance {
            iid: ancestor.root.0,
        });
    }
    if classes[0] != classes[1] || classes[0] != classes[2] {
        return Err(MergeFault::RootMismatch {
            detail: format!("root classes {classes:?} differ"),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// FieldCx
// ---------------------------------------------------------------------------

/// One field of one node triple, as seen by the engine and by special
/// handlers. The three identities usually coincide; they differ when an
/// element was added on both branches under the same key.
#[derive(Clone, Debug)]
pub struct FieldCx {
    /// The node in the ancestor document, when it exists there.
    pub anc: Option<Iid>,
    /// The node in the left document.
    pub left: Iid,
    /// The node in the right document.
    pub right: Iid,
    /// The node in the merged document.
    pub merged: Iid,
    /// The node's concrete class.
    pub class: String,
    /// The field under merge.
    pub field: String,
    /// Whether references in this field are weak.
    pub weak: bool,
}

impl FieldCx {
    /// The conflict group for this field position.
    #[must_use]
    pub fn group(&self) -> String {
        format!("{}#{}.{}", self.class, self.merged, self.field)
    }

    /// The conflict group for one keyed element of this field.
    #[must_use]
    pub fn element_group(&self, key: &str) -> String {
        format!("{}#{}.{}[{key}]", self.class, self.merged, self.field)
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

/// Mutable merge state threaded through the recursion.
pub struct Merger<'a> {
    meta: &'a SchemaMeta,
    pub(crate) policy: &'a PolicyTable,
    ancestor: &'a Document,
    left: &'a Document,
    right: &'a Document,
    picks: &'a PickMap,
    pub(crate) merged: Document,
    pub(crate) conflicts: Vec<DirectConflict>,
    pub(crate) recons: Vec<AutoReconciliation>,
    used_picks: BTreeSet<String>,
    pub(crate) right_origin: BTreeSet<Iid>,
    visited: BTreeSet<Iid>,
}

impl<'a> Merger<'a> {
    #[must_use]
    pub fn meta(&self) -> &'a SchemaMeta {
        self.meta
    }

    #[must_use]
    pub fn merged_doc(&self) -> &Document {
        &self.merged
    }

    pub(crate) fn ancestor_doc(&self) -> &'a Document {
        self.ancestor
    }

    fn side_doc(&self, side: BranchSide) -> &'a Document {
        match side {
            BranchSide::Left => self.left,
            BranchSide::Right => self.right,
        }
    }

    /// Merges every field of a node triple.
    pub(crate) fn merge_node(
        &mut self,
        anc: Option<Iid>,
        left: Iid,
        right: Iid,
        merged: Iid,
    ) -> Result<(), MergeFault> {
        if !self.visited.insert(merged) {
            return Ok(());
        }
        let l_class = self.left.expect(left)?.class.clone();
        let r_class = &self.right.expect(right)?.class;
        if &l_class != r_class {
            return Err(MergeFault::ClassMismatch {
                expected: l_class,
                got: r_class.clone(),
                iid: merged.0,
            });
        }
        if !self.merged.contains(merged) {
            self.merged
                .insert_with_iid(merged, Instance::new(l_class.clone()));
        }

        let fields: Vec<FieldDef> = self
            .meta
            .all_fields(&l_class)
            .map_err(MergeFault::Schema)?
            .into_iter()
            .cloned()
            .collect();

        for field in fields {
            if field.transient {
                continue;
            }
            let cx = FieldCx {
                anc,
                left,
                right,
                merged,
                class: l_class.clone(),
                field: field.name.clone(),
                weak: field.weak_ref,
            };
            match self.policy.policy_for(&cx.class, &cx.field)? {
                FieldPolicy::Harmless => self.merge_harmless(&cx)?,
                FieldPolicy::Unexpected => self.merge_unexpected(&cx)?,
                FieldPolicy::Contents => self.merge_contents(&cx)?,
                FieldPolicy::Special(handler) => handler(self, &cx)?,
                FieldPolicy::Array(ap) => {
                    self.merge_list_field(&cx, ap.array_type, ap.reconcile)?;
                }
            }
        }
        Ok(())
    }

    // -- field value plumbing ------------------------------------------------

    fn anc_value(&self, cx: &FieldCx) -> Value {
        cx.anc
            .and_then(|iid| self.ancestor.get(iid))
            .map_or(Value::Null, |inst| inst.field(&cx.field).clone())
    }

    fn side_value(&self, side: BranchSide, cx: &FieldCx) -> Result<Value, MergeFault> {
        let iid = match side {
            BranchSide::Left => cx.left,
            BranchSide::Right => cx.right,
        };
        Ok(self.side_doc(side).expect(iid)?.field(&cx.field).clone())
    }

    fn set_merged_field(&mut self, cx: &FieldCx, value: Value) -> Result<(), MergeFault> {
        self.merged.expect(cx.merged)?;
        if let Some(inst) = self.merged.get_mut(cx.merged) {
            inst.set(cx.field.clone(), value);
        }
        Ok(())
    }

    fn changed(&self, side: BranchSide, cx: &FieldCx) -> Result<bool, MergeFault> {
        let branch = self.side_value(side, cx)?;
        let anc = self.anc_value(cx);
        let eq = deep_value_eq(
            self.meta,
            self.side_doc(side),
            &branch,
            self.ancestor,
            &anc,
            cx.weak,
        )
        .map_err(MergeFault::Schema)?;
        Ok(!eq)
    }

    fn sides_equal(&self, cx: &FieldCx) -> Result<bool, MergeFault> {
        let l = self.side_value(BranchSide::Left, cx)?;
        let r = self.side_value(BranchSide::Right, cx)?;
        deep_value_eq(self.meta, self.left, &l, self.right, &r, cx.weak)
            .map_err(MergeFault::Schema)
    }

    /// Takes one side's value: strong subtrees are imported identity
    /// preserved, then the field is overwritten.
    fn take_side(&mut self, side: BranchSide, cx: &FieldCx) -> Result<(), MergeFault> {
        let value = self.side_value(side, cx)?;
        if !cx.weak {
            let mut refs = Vec::new();
            value.referenced_iids(&mut refs);
            for iid in refs {
                self.import_subtree(side, iid)?;
            }
        }
        self.set_merged_field(cx, value)
    }

    /// Copies the strong subtree under `start` from a branch into the
    /// merged document, identities preserved. Weak references come along
    /// verbatim; dangling ones are pruned at the end of the merge.
    pub(crate) fn import_subtree(&mut self, side: BranchSide, start: Iid) -> Result<(), MergeFault> {
        let doc = self.side_doc(side);
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(iid) = stack.pop() {
            if !seen.insert(iid) {
                continue;
            }
            let inst = doc.expect(iid)?.clone();
            self.merged.insert_with_iid(iid, inst);
            if side == BranchSide::Right {
                self.right_origin.insert(iid);
            }
            stack.extend(doc.strong_children(self.meta, iid).map_err(MergeFault::Schema)?);
        }
        Ok(())
    }

    /// Deep-clones a value's strong subtrees into the merged document under
    /// fresh identities, remapping internal references (weak ones included
    /// when they point inside the clone) and re-minting `uuid` fields.
    pub(crate) fn clone_contents(
        &mut self,
        side: BranchSide,
        value: &Value,
    ) -> Result<Value, MergeFault> {
        let doc = self.side_doc(side);
        let mut roots = Vec::new();
        value.referenced_iids(&mut roots);

        // Collect the whole strong closure first so internal weak refs can
        // be remapped consistently.
        let mut subtree = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = roots;
        while let Some(iid) = stack.pop() {
            if !seen.insert(iid) {
                continue;
            }
            subtree.push(iid);
            stack.extend(doc.strong_children(self.meta, iid).map_err(MergeFault::Schema)?);
        }
        subtree.sort_unstable();

        let mut remap: BTreeMap<Iid, Iid> = BTreeMap::new();
        for &old in &subtree {
            let class = doc.expect(old)?.class.clone();
            let new = self.merged.alloc(Instance::new(class));
            if side == BranchSide::Right {
                self.right_origin.insert(new);
            }
            remap.insert(old, new);
        }
        for (&old, &new) in &remap {
            let mut inst = doc.expect(old)?.clone();
            for v in inst.fields.values_mut() {
                remap_value(v, &remap);
            }
            // A clone is a new object; its uuid must not collide with the
            // original's.
            if let Ok(def) = self.meta.field(&inst.class, "uuid")
                && def.const_
                && matches!(inst.field("uuid"), Value::Str(_))
            {
                inst.set("uuid", Value::Str(format!("u{new}")));
            }
            if let Some(slot) = self.merged.get_mut(new) {
                *slot = inst;
            }
        }

        let mut out = value.clone();
        remap_value(&mut out, &remap);
        Ok(out)
    }

    // -- scalar policies -----------------------------------------------------

    fn merge_harmless(&mut self, cx: &FieldCx) -> Result<(), MergeFault> {
        if self.changed(BranchSide::Left, cx)? {
            self.take_side(BranchSide::Left, cx)
        } else if self.changed(BranchSide::Right, cx)? {
            self.take_side(BranchSide::Right, cx)
        } else {
            Ok(())
        }
    }

    fn merge_unexpected(&mut self, cx: &FieldCx) -> Result<(), MergeFault> {
        if !self.sides_equal(cx)? {
            return Err(MergeFault::UnexpectedDivergence {
                class: cx.class.clone(),
                field: cx.field.clone(),
                path: cx.group(),
            });
        }
        if self.changed(BranchSide::Left, cx)? {
            self.take_side(BranchSide::Left, cx)?;
        }
        Ok(())
    }

    pub(crate) fn merge_contents(&mut self, cx: &FieldCx) -> Result<(), MergeFault> {
        let l = self.side_value(BranchSide::Left, cx)?;
        let r = self.side_value(BranchSide::Right, cx)?;

        // Both sides hold the same strong child: there is nothing to decide
        // at this level, the divergence (if any) lives inside the child.
        if !cx.weak
            && let (Value::Ref(x), Value::Ref(y)) = (&l, &r)
            && x == y
        {
            let x = *x;
            if !self.merged.contains(x) {
                self.import_subtree(BranchSide::Left, x)?;
            }
            self.set_merged_field(cx, Value::Ref(x))?;
            let anc_child = if self.ancestor.contains(x) { Some(x) } else { None };
            return self.merge_node(anc_child, x, x, x);
        }

        let l_changed = self.changed(BranchSide::Left, cx)?;
        let r_changed = self.changed(BranchSide::Right, cx)?;
        match (l_changed, r_changed) {
            (false, false) => Ok(()),
            (true, false) => self.take_side(BranchSide::Left, cx),
            (false, true) => self.take_side(BranchSide::Right, cx),
            (true, true) => {
                if self.sides_equal(cx)? {
                    return self.take_side(BranchSide::Left, cx);
                }
                let group = cx.group();
                match self.pick_for(&group) {
                    Some(side) => self.take_side(side, cx),
                    None => {
                        let anc = self.anc_value(cx);
                        self.record_conflict(cx, group, &anc, &l, &r)?;
                        self.set_merged_field(cx, anc)
                    }
                }
            }
        }
    }

    fn pick_for(&mut self, group: &str) -> Option<BranchSide> {
        let side = self.picks.get(group).copied()?;
        self.used_picks.insert(group.to_owned());
        Some(side)
    }

    fn record_conflict(
        &mut self,
        cx: &FieldCx,
        group: String,
        anc: &Value,
        l: &Value,
        r: &Value,
    ) -> Result<(), MergeFault> {
        self.conflicts.push(DirectConflict {
            group,
            class: cx.class.clone(),
            field: cx.field.clone(),
            ancestor: snapshot(self.meta, self.ancestor, anc, cx.weak)
                .map_err(MergeFault::Schema)?,
            left: snapshot(self.meta, self.left, l, cx.weak).map_err(MergeFault::Schema)?,
            right: snapshot(self.meta, self.right, r, cx.weak).map_err(MergeFault::Schema)?,
        });
        Ok(())
    }

    // -- list merging ----------------------------------------------------

    /// Element-wise list merge. Public so special handlers can delegate to
    /// it with their own keying.
    ///
    /// # Errors
    ///
    /// Returns a [`MergeFault`] when an element's key cannot be computed or
    /// a recursive merge faults.
    pub fn merge_list_field(
        &mut self,
        cx: &FieldCx,
        array_type: ArrayType,
        reconcile: Reconcile,
    ) -> Result<(), MergeFault> {
        if array_type == ArrayType::Atomic {
            return self.merge_contents(cx);
        }

        let av = self.anc_value(cx);
        let lv = self.side_value(BranchSide::Left, cx)?;
        let rv = self.side_value(BranchSide::Right, cx)?;
        // A field nobody ever set stays unset.
        if matches!(av, Value::Null) && matches!(lv, Value::Null) && matches!(rv, Value::Null) {
            return Ok(());
        }

        let a_items = keyed_items(self, self.ancestor, &av, &reconcile, cx)?;
        let l_items = keyed_items(self, self.left, &lv, &reconcile, cx)?;
        let r_items = keyed_items(self, self.right, &rv, &reconcile, cx)?;
        let a_map: BTreeMap<&str, &Value> =
            a_items.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let r_map: BTreeMap<&str, &Value> =
            r_items.iter().map(|(k, v)| (k.as_str(), v)).collect();
        let l_keys: BTreeSet<&str> = l_items.iter().map(|(k, _)| k.as_str()).collect();

        let identity_keyed = matches!(
            reconcile,
            Reconcile::ByIdentity | Reconcile::Rename { .. }
        );

        let mut out: Vec<Value> = Vec::new();
        // Left order first, then right-only insertions appended; for
        // unordered lists order is meaningless anyway, this just keeps it
        // deterministic.
        for (key, lv) in &l_items {
            let in_a = a_map.contains_key(key.as_str());
            let rv = r_map.get(key.as_str()).copied();
            match rv {
                Some(rv) => {
                    let elem = self.merge_matched_element(
                        cx,
                        key,
                        a_map.get(key.as_str()).copied(),
                        lv,
                        rv,
                        identity_keyed,
                    )?;
                    out.extend(elem);
                }
                // Deleted on the right wins over any left edit.
                None if in_a => {}
                None => {
                    self.take_element(BranchSide::Left, lv)?;
                    out.push(lv.clone());
                }
            }
        }
        for (key, rv) in &r_items {
            if l_keys.contains(key.as_str()) || a_map.contains_key(key.as_str()) {
                continue;
            }
            self.take_element(BranchSide::Right, rv)?;
            out.push(rv.clone());
        }

        if let Reconcile::Rename { name_key, force } = reconcile {
            rename::fix_name_collisions(self, cx, name_key, force, &out)?;
        }
        self.set_merged_field(cx, Value::List(out))
    }

    /// Merges one element present on both sides. Returns the element to
    /// keep, or nothing while a both-added conflict awaits its pick.
    fn merge_matched_element(
        &mut self,
        cx: &FieldCx,
        key: &str,
        av: Option<&Value>,
        lv: &Value,
        rv: &Value,
        identity_keyed: bool,
    ) -> Result<Option<Value>, MergeFault> {
        if identity_keyed {
            // Identity keying: one logical node, never cloned.
            let Some(iid) = lv.as_ref_iid() else {
                return Err(self.bad_key(cx, "identity-keyed element is not a reference"));
            };
            if !self.merged.contains(iid) {
                self.import_subtree(BranchSide::Left, iid)?;
            }
            let anc_child = if self.ancestor.contains(iid) { Some(iid) } else { None };
            self.merge_node(anc_child, iid, iid, iid)?;
            return Ok(Some(Value::Ref(iid)));
        }

        // Key-matched: identities may differ when an element was recreated.
        let in_place = av == Some(lv) && av == Some(rv);
        if in_place
            && let Some(iid) = lv.as_ref_iid()
            && self.ancestor.contains(iid)
        {
            self.merge_node(Some(iid), iid, iid, iid)?;
            return Ok(Some(Value::Ref(iid)));
        }

        let l_eq_r = deep_value_eq(self.meta, self.left, lv, self.right, rv, cx.weak)
            .map_err(MergeFault::Schema)?;
        if l_eq_r {
            return Ok(Some(self.clone_contents(BranchSide::Left, lv)?));
        }
        if let Some(av) = av {
            let l_eq_a = deep_value_eq(self.meta, self.left, lv, self.ancestor, av, cx.weak)
                .map_err(MergeFault::Schema)?;
            if l_eq_a {
                return Ok(Some(self.clone_contents(BranchSide::Right, rv)?));
            }
            let r_eq_a = deep_value_eq(self.meta, self.right, rv, self.ancestor, av, cx.weak)
                .map_err(MergeFault::Schema)?;
            if r_eq_a {
                return Ok(Some(self.clone_contents(BranchSide::Left, lv)?));
            }
        }

        // Both sides changed the same keyed element, differently.
        let group = cx.element_group(key);
        match self.pick_for(&group) {
            Some(side) => {
                let v = match side {
                    BranchSide::Left => lv,
                    BranchSide::Right => rv,
                };
                Ok(Some(self.clone_contents(side, v)?))
            }
            None => {
                self.record_conflict(cx, group, av.unwrap_or(&Value::Null), lv, rv)?;
                // Ancestor's element (already in the merged copy) survives
                // until a pick arrives; both-added elements have none.
                Ok(av.cloned())
            }
        }
    }

    fn take_element(&mut self, side: BranchSide, value: &Value) -> Result<(), MergeFault> {
        let mut refs = Vec::new();
        value.referenced_iids(&mut refs);
        for iid in refs {
            self.import_subtree(side, iid)?;
        }
        Ok(())
    }

    fn bad_key(&self, cx: &FieldCx, detail: &str) -> MergeFault {
        MergeFault::BadKeyValue {
            class: cx.class.clone(),
            field: cx.field.clone(),
            detail: detail.to_owned(),
        }
    }
}

/// Remaps every reference in `value` that the clone map covers.
fn remap_value(value: &mut Value, remap: &BTreeMap<Iid, Iid>) {
    match value {
        Value::Ref(iid) => {
            if let Some(&new) = remap.get(iid) {
                *iid = new;
            }
        }
        Value::List(items) => {
            for item in items {
                remap_value(item, remap);
            }
        }
        Value::Map(entries) => {
            for item in entries.values_mut() {
                remap_value(item, remap);
            }
        }
        _ => {}
    }
}

/// Keys every element of a list value, first occurrence winning on
/// duplicate keys.
fn keyed_items(
    merger: &Merger<'_>,
    doc: &Document,
    value: &Value,
    reconcile: &Reconcile,
    cx: &FieldCx,
) -> Result<Vec<(String, Value)>, MergeFault> {
    let items: &[Value] = match value {
        Value::Null => &[],
        Value::List(items) => items.as_slice(),
        other => {
            return Err(merger.bad_key(cx, &format!("expected a list, found {other:?}")));
        }
    };
    let mut out: Vec<(String, Value)> = Vec::with_capacity(items.len());
    let mut seen = BTreeSet::new();
    for item in items {
        let key = element_key(merger, doc, item, reconcile, cx)?;
        if seen.insert(key.clone()) {
            out.push((key, item.clone()));
        } else {
            tracing::warn!(
                class = cx.class,
                field = cx.field,
                key,
                "duplicate merge key in list, keeping first occurrence"
            );
        }
    }
    Ok(out)
}

fn element_key(
    merger: &Merger<'_>,
    doc: &Document,
    item: &Value,
    reconcile: &Reconcile,
    cx: &FieldCx,
) -> Result<String, MergeFault> {
    match reconcile {
        Reconcile::ByIdentity | Reconcile::Rename { .. } => item
            .as_ref_iid()
            .map(|iid| format!("iid={iid}"))
            .ok_or_else(|| merger.bad_key(cx, "identity-keyed element is not a reference")),
        Reconcile::ByKeyPath { path } => eval_key_path(doc, item, path)
            .ok_or_else(|| merger.bad_key(cx, &format!("no value at key path {path:?}"))),
        Reconcile::ByKeyFn { key_fn } => key_fn(doc, item)
            .ok_or_else(|| merger.bad_key(cx, "key function returned nothing")),
    }
}

/// Walks a dot-separated field path from a list element and renders the
/// final value as a key string.
#[must_use]
pub fn eval_key_path(doc: &Document, item: &Value, path: &str) -> Option<String> {
    let mut cur = item.clone();
    for seg in path.split('.') {
        cur = match cur {
            Value::Ref(iid) => doc.get(iid)?.field(seg).clone(),
            Value::Map(entries) => entries.get(seg)?.clone(),
            _ => return None,
        };
    }
    key_string(&cur)
}

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::Str(s) => Some(s.clone()),
        Value::Num(n) => Some(format!("{n}")),
        Value::Bool(b) => Some(format!("{b}")),
        Value::Ref(iid) => Some(format!("iid={iid}")),
        Value::List(items) => {
            let parts: Option<Vec<String>> = items.iter().map(key_string).collect();
            Some(parts?.join(","))
        }
        Value::Null | Value::Map(_) => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_path_walks_refs_and_maps() {
        let mut doc = Document::new(Instance::new("P"));
        let v = doc.alloc(Instance::new("V").with("name", Value::str("width")));
        let root = doc.root;
        if let Some(inst) = doc.get_mut(root) {
            inst.set("v", Value::Ref(v));
        }
        assert_eq!(
            eval_key_path(&doc, &Value::Ref(doc.root), "v.name"),
            Some("width".to_owned())
        );
        assert_eq!(eval_key_path(&doc, &Value::Ref(doc.root), "v.ghost"), None);
    }

    #[test]
    fn key_strings_are_stable() {
        assert_eq!(key_string(&Value::str("a")), Some("a".to_owned()));
        assert_eq!(key_string(&Value::Num(2.0)), Some("2".to_owned()));
        assert_eq!(key_string(&Value::Ref(Iid(9))), Some("iid=9".to_owned()));
        assert_eq!(
            key_string(&Value::List(vec![Value::Ref(Iid(1)), Value::Ref(Iid(2))])),
            Some("iid=1,iid=2".to_owned())
        );
        assert_eq!(key_string(&Value::Null), None);
    }
}
