//! The document arena.
//!
//! A [`Document`] owns every instance of one branch's tree, addressed by
//! [`Iid`]. Structure lives in the values: strong reference fields form the
//! ownership tree rooted at [`Document::root`]; weak reference fields point
//! sideways into it. The arena itself is flat, so "address of" and
//! "register" are intrinsic operations rather than a separate bookkeeping
//! layer.
//!
//! # Determinism
//!
//! Instances are kept in a `BTreeMap`, walks visit strong fields in schema
//! declaration order, and identity allocation is a plain counter. Every
//! operation here is a pure function of the document content.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::doc::value::{Iid, Instance, Value};
use crate::error::{MergeFault, SchemaError};
use crate::schema::meta::SchemaMeta;

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// A branch's document: root identity plus the instance arena.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The root instance (a `Site` in the production schema).
    pub root: Iid,
    insts: BTreeMap<Iid, Instance>,
    next_iid: u64,
}

impl Document {
    /// Creates a document whose root is `root`, at identity 1.
    #[must_use]
    pub fn new(root: Instance) -> Self {
        let mut insts = BTreeMap::new();
        insts.insert(Iid(1), root);
        Self {
            root: Iid(1),
            insts,
            next_iid: 2,
        }
    }

    /// Registers a new instance, minting the next identity.
    pub fn alloc(&mut self, inst: Instance) -> Iid {
        let iid = Iid(self.next_iid);
        self.next_iid += 1;
        self.insts.insert(iid, inst);
        iid
    }

    /// Registers an instance under a caller-chosen identity, as when
    /// importing a node from another branch where it already has one.
    /// The allocator is bumped past it so future allocations never collide.
    pub fn insert_with_iid(&mut self, iid: Iid, inst: Instance) {
        self.next_iid = self.next_iid.max(iid.0 + 1);
        self.insts.insert(iid, inst);
    }

    /// Raises the allocator floor. Branches carve out disjoint identity
    /// ranges by floor-setting before they start editing.
    pub fn set_iid_floor(&mut self, floor: u64) {
        self.next_iid = self.next_iid.max(floor);
    }

    /// The lowest identity this document is guaranteed never to have used.
    #[must_use]
    pub const fn iid_ceiling(&self) -> u64 {
        self.next_iid
    }

    #[must_use]
    pub fn get(&self, iid: Iid) -> Option<&Instance> {
        self.insts.get(&iid)
    }

    #[must_use]
    pub fn get_mut(&mut self, iid: Iid) -> Option<&mut Instance> {
        self.insts.get_mut(&iid)
    }

    #[must_use]
    pub fn contains(&self, iid: Iid) -> bool {
        self.insts.contains_key(&iid)
    }

    pub fn remove(&mut self, iid: Iid) -> Option<Instance> {
        self.insts.remove(&iid)
    }

    /// All instances in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (Iid, &Instance)> {
        self.insts.iter().map(|(&iid, inst)| (iid, inst))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Like [`get`](Self::get) but a missing instance is a merge fault.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFault::MissingInstance`].
    pub fn expect(&self, iid: Iid) -> Result<&Instance, MergeFault> {
        self.insts
            .get(&iid)
            .ok_or(MergeFault::MissingInstance { iid: iid.0 })
    }

    /// Identities referenced through strong, non-transient fields of `iid`,
    /// in schema field order.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the instance's class is not declared.
    pub fn strong_children(&self, meta: &SchemaMeta, iid: Iid) -> Result<Vec<Iid>, SchemaError> {
        let Some(inst) = self.insts.get(&iid) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for field in meta.all_fields(&inst.class)? {
            if field.weak_ref || field.transient {
                continue;
            }
            inst.field(&field.name).referenced_iids(&mut out);
        }
        Ok(out)
    }

    /// Preorder walk of the strong tree: each identity once, at its first
    /// visit. A malformed document with a strong cycle still terminates.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when a visited class is not declared.
    pub fn walk_strong(&self, meta: &SchemaMeta) -> Result<Vec<Iid>, SchemaError> {
        let mut order = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.root];
        while let Some(iid) = stack.pop() {
            if !seen.insert(iid) || !self.insts.contains_key(&iid) {
                continue;
            }
            order.push(iid);
            let mut children = self.strong_children(meta, iid)?;
            children.reverse();
            stack.extend(children);
        }
        Ok(order)
    }

    /// Checks the tree invariant, returning violations instead of panicking.
    ///
    /// Holds when: the root exists; every instance is strongly reachable
    /// through exactly one path; every weak reference targets a strongly
    /// reachable instance.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when a visited class is not declared.
    pub fn check_tree_invariant(&self, meta: &SchemaMeta) -> Result<Vec<String>, SchemaError> {
        let mut violations = Vec::new();
        let mut seen = BTreeSet::new();

        if self.insts.contains_key(&self.root) {
            let mut stack = vec![self.root];
            while let Some(iid) = stack.pop() {
                if !seen.insert(iid) {
                    violations
                        .push(format!("instance {iid} has more than one strong path to it"));
                    continue;
                }
                if !self.insts.contains_key(&iid) {
                    violations.push(format!("strong reference to missing instance {iid}"));
                    continue;
                }
                let mut children = self.strong_children(meta, iid)?;
                children.reverse();
                stack.extend(children);
            }
        } else {
            violations.push(format!("root instance {} is missing", self.root));
        }

        for (&iid, inst) in &self.insts {
            if !seen.contains(&iid) {
                violations.push(format!(
                    "instance {iid} ({}) is not strongly reachable",
                    inst.class
                ));
            }
            for field in meta.all_fields(&inst.class)? {
                if !field.weak_ref {
                    continue;
                }
                let mut targets = Vec::new();
                inst.field(&field.name).referenced_iids(&mut targets);
                for target in targets {
                    if !seen.contains(&target) {
                        violations.push(format!(
                            "weak reference {}.{} -> {target} targets an unreachable instance",
                            inst.class, field.name
                        ));
                    }
                }
            }
        }

        Ok(violations)
    }

    /// Removes every instance the strong tree cannot reach, returning the
    /// removed identities in order.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when a visited class is not declared.
    pub fn collect_garbage(&mut self, meta: &SchemaMeta) -> Result<Vec<Iid>, SchemaError> {
        let reachable: BTreeSet<Iid> = self.walk_strong(meta)?.into_iter().collect();
        let dead: Vec<Iid> = self
            .insts
            .keys()
            .copied()
            .filter(|iid| !reachable.contains(iid))
            .collect();
        for iid in &dead {
            self.insts.remove(iid);
        }
        Ok(dead)
    }

    /// Nulls out (scalar position) or drops (list/map position) every weak
    /// reference whose target is gone or strongly unreachable.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when a visited class is not declared.
    pub fn prune_dangling_weak_refs(&mut self, meta: &SchemaMeta) -> Result<(), SchemaError> {
        let reachable: BTreeSet<Iid> = self.walk_strong(meta)?.into_iter().collect();
        let classes: Vec<(Iid, String)> = self
            .insts
            .iter()
            .map(|(&iid, inst)| (iid, inst.class.clone()))
            .collect();
        for (iid, class) in classes {
            let weak_fields: Vec<String> = meta
                .all_fields(&class)?
                .into_iter()
                .filter(|f| f.weak_ref)
                .map(|f| f.name.clone())
                .collect();
            let Some(inst) = self.insts.get_mut(&iid) else {
                continue;
            };
            for name in weak_fields {
                if let Some(value) = inst.fields.get_mut(&name) {
                    prune_value(value, &reachable);
                }
            }
        }
        Ok(())
    }
}

fn prune_value(value: &mut Value, reachable: &BTreeSet<Iid>) {
    match value {
        Value::Ref(iid) if !reachable.contains(iid) => *value = Value::Null,
        Value::List(items) => {
            for item in items.iter_mut() {
                prune_value(item, reachable);
            }
            items.retain(|item| !matches!(item, Value::Null));
        }
        Value::Map(entries) => {
            for item in entries.values_mut() {
                prune_value(item, reachable);
            }
            entries.retain(|_, item| !matches!(item, Value::Null));
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Deep equality
// ---------------------------------------------------------------------------

/// Structural equality of two values, possibly across documents.
///
/// Strong references compare by the subtree they own; weak references
/// compare by identity, since following them would walk out of the subtree
/// under comparison. `weak` says which kind the *enclosing field* is.
///
/// # Errors
///
/// Returns a [`SchemaError`] when a compared class is not declared.
pub fn deep_value_eq(
    meta: &SchemaMeta,
    a_doc: &Document,
    a: &Value,
    b_doc: &Document,
    b: &Value,
    weak: bool,
) -> Result<bool, SchemaError> {
    match (a, b) {
        (Value::Ref(x), Value::Ref(y)) => {
            if weak {
                Ok(x == y)
            } else {
                deep_inst_eq(meta, a_doc, *x, b_doc, *y)
            }
        }
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for (x, y) in xs.iter().zip(ys) {
                if !deep_value_eq(meta, a_doc, x, b_doc, y, weak)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Map(xs), Value::Map(ys)) => {
            if xs.len() != ys.len() {
                return Ok(false);
            }
            for ((xk, x), (yk, y)) in xs.iter().zip(ys) {
                if xk != yk || !deep_value_eq(meta, a_doc, x, b_doc, y, weak)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(a == b),
    }
}

/// Structural equality of two instances, possibly across documents.
///
/// # Errors
///
/// Returns a [`SchemaError`] when a compared class is not declared.
pub fn deep_inst_eq(
    meta: &SchemaMeta,
    a_doc: &Document,
    a: Iid,
    b_doc: &Document,
    b: Iid,
) -> Result<bool, SchemaError> {
    let (Some(ai), Some(bi)) = (a_doc.get(a), b_doc.get(b)) else {
        return Ok(false);
    };
    if ai.class != bi.class {
        return Ok(false);
    }
    for field in meta.all_fields(&ai.class)? {
        if field.transient {
            continue;
        }
        let eq = deep_value_eq(
            meta,
            a_doc,
            ai.field(&field.name),
            b_doc,
            bi.field(&field.name),
            field.weak_ref,
        )?;
        if !eq {
            return Ok(false);
        }
    }
    Ok(true)
}

// ---------------------------------------------------------------------------
// NodeCtx
// ---------------------------------------------------------------------------

/// A node in context: the document it lives in plus its identity. Handed to
/// merge handlers so they can look around the tree.
#[derive(Clone, Copy, Debug)]
pub struct NodeCtx<'a> {
    /// The owning document.
    pub doc: &'a Document,
    /// The node.
    pub iid: Iid,
}

impl<'a> NodeCtx<'a> {
    /// Resolves the node.
    ///
    /// # Errors
    ///
    /// Returns [`MergeFault::MissingInstance`] when the identity is gone.
    pub fn inst(&self) -> Result<&'a Instance, MergeFault> {
        self.doc.expect(self.iid)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "\
Root (concrete)
  kids: [Kid]
  @WeakRef favorite: Kid?

Kid (concrete)
  name: String
  kids: [Kid]
";

    fn meta() -> SchemaMeta {
        SchemaMeta::compile(TEXT).unwrap()
    }

    fn sample() -> Document {
        let mut doc = Document::new(Instance::new("Root"));
        let a = doc.alloc(Instance::new("Kid").with("name", Value::str("a")));
        let b = doc.alloc(Instance::new("Kid").with("name", Value::str("b")));
        let root = doc.root;
        if let Some(inst) = doc.get_mut(root) {
            inst.set("kids", Value::List(vec![Value::Ref(a), Value::Ref(b)]));
            inst.set("favorite", Value::Ref(b));
        }
        doc
    }

    #[test]
    fn alloc_is_monotonic_and_floor_respected() {
        let mut doc = Document::new(Instance::new("Root"));
        assert_eq!(doc.alloc(Instance::new("Kid")), Iid(2));
        doc.set_iid_floor(100);
        assert_eq!(doc.alloc(Instance::new("Kid")), Iid(100));
        doc.insert_with_iid(Iid(500), Instance::new("Kid"));
        assert_eq!(doc.alloc(Instance::new("Kid")), Iid(501));
    }

    #[test]
    fn walk_strong_is_preorder() {
        let doc = sample();
        assert_eq!(doc.walk_strong(&meta()).unwrap(), vec![Iid(1), Iid(2), Iid(3)]);
    }

    #[test]
    fn invariant_holds_for_sample() {
        assert!(sample().check_tree_invariant(&meta()).unwrap().is_empty());
    }

    #[test]
    fn invariant_flags_double_ownership() {
        let mut doc = sample();
        // Kid `a` now also strongly owns `b`.
        if let Some(inst) = doc.get_mut(Iid(2)) {
            inst.set("kids", Value::List(vec![Value::Ref(Iid(3))]));
        }
        let violations = doc.check_tree_invariant(&meta()).unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("more than one strong path"));
    }

    #[test]
    fn invariant_flags_orphans_and_dangling_weak_refs() {
        let mut doc = sample();
        let root = doc.root;
        if let Some(inst) = doc.get_mut(root) {
            inst.set("kids", Value::List(vec![Value::Ref(Iid(2))]));
        }
        // Kid 3 is now unreachable but still the weak `favorite`.
        let violations = doc.check_tree_invariant(&meta()).unwrap();
        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.contains("not strongly reachable")));
        assert!(violations.iter().any(|v| v.contains("Root.favorite")));
    }

    #[test]
    fn gc_and_prune_restore_the_invariant() {
        let mut doc = sample();
        let root = doc.root;
        if let Some(inst) = doc.get_mut(root) {
            inst.set("kids", Value::List(vec![Value::Ref(Iid(2))]));
        }
        let m = meta();
        assert_eq!(doc.collect_garbage(&m).unwrap(), vec![Iid(3)]);
        doc.prune_dangling_weak_refs(&m).unwrap();
        assert_eq!(doc.get(doc.root).map(|i| i.field("favorite")), Some(&Value::Null));
        assert!(doc.check_tree_invariant(&m).unwrap().is_empty());
    }

    #[test]
    fn deep_eq_strong_recurses_weak_compares_identity() {
        let m = meta();
        let a = sample();
        let mut b = sample();
        // Same shape, so equal across documents.
        assert!(deep_inst_eq(&m, &a, a.root, &b, b.root).unwrap());

        // Editing a strongly owned child is seen from the root.
        if let Some(inst) = b.get_mut(Iid(2)) {
            inst.set("name", Value::str("z"));
        }
        assert!(!deep_inst_eq(&m, &a, a.root, &b, b.root).unwrap());

        // A weak ref retargeted to a structurally identical node still
        // compares unequal: weak refs are identity.
        let mut c = sample();
        let root = c.root;
        if let Some(inst) = c.get_mut(root) {
            inst.set("favorite", Value::Ref(Iid(2)));
        }
        if let Some(inst) = c.get_mut(Iid(2)) {
            inst.set("name", Value::str("b"));
        }
        if let Some(inst) = c.get_mut(Iid(3)) {
            inst.set("name", Value::str("a"));
        }
        assert!(!deep_inst_eq(&m, &a, a.root, &c, c.root).unwrap());
    }
}
