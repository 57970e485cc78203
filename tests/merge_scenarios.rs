//! End-to-end merge behavior: clean merges, rename reconciliation,
//! contents conflicts with picks, deletion precedence, and the faults.

mod common;

use common::{
    add_group, add_item, add_note, base_doc, branch, group_names, init_tracing, set_field,
    test_meta, test_policies,
};
use sitemerge::policy::validate;
use sitemerge::policy::{ArrayType, FieldPolicy, PolicyTable};
use sitemerge::schema::meta::SchemaMeta;
use sitemerge::{
    AutoReconciliation, BranchSide, Document, Iid, Instance, MergeFault, MergeStep, PickMap,
    PolicyError, Value, try_merge,
};

fn merge(
    ancestor: &Document,
    left: &Document,
    right: &Document,
    picks: &PickMap,
) -> MergeStep {
    init_tracing();
    try_merge(&test_meta(), &test_policies(), ancestor, left, right, picks)
        .expect("merge must not fault")
}

fn assert_invariant(doc: &Document) {
    let violations = doc.check_tree_invariant(&test_meta()).unwrap();
    assert!(violations.is_empty(), "tree invariant broken: {violations:?}");
}

fn find_group(doc: &Document, name: &str) -> Iid {
    let Some(Value::List(items)) = doc.get(doc.root).map(|i| i.field("groups").clone()) else {
        panic!("no groups list");
    };
    items
        .iter()
        .filter_map(Value::as_ref_iid)
        .find(|&iid| doc.get(iid).is_some_and(|i| i.field("name").as_str() == Some(name)))
        .unwrap_or_else(|| panic!("no group named {name}"))
}

fn item_code(doc: &Document, group: Iid, item_name: &str) -> String {
    let Some(Value::List(items)) = doc.get(group).map(|i| i.field("items").clone()) else {
        panic!("no items list");
    };
    let item = items
        .iter()
        .filter_map(Value::as_ref_iid)
        .find(|&iid| doc.get(iid).is_some_and(|i| i.field("name").as_str() == Some(item_name)))
        .unwrap_or_else(|| panic!("no item named {item_name}"));
    let cc = doc
        .get(item)
        .and_then(|i| i.field("code").as_ref_iid())
        .expect("item has code");
    doc.get(cc)
        .and_then(|i| i.field("code").as_str())
        .expect("code is text")
        .to_owned()
}

// ---------------------------------------------------------------------------
// Idempotence and one-sided edits
// ---------------------------------------------------------------------------

#[test]
fn self_merge_yields_the_ancestor() {
    let ancestor = base_doc();
    let left = branch(&ancestor, 100);
    let right = branch(&ancestor, 200);
    let step = merge(&ancestor, &left, &right, &PickMap::new());
    let MergeStep::Merged {
        doc,
        reconciliations,
    } = step
    else {
        panic!("expected a clean merge");
    };
    assert!(reconciliations.is_empty());
    common::assert_same_tree(&doc, &ancestor);
    assert_invariant(&doc);
}

#[test]
fn one_sided_edit_is_taken_without_conflict() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let right = branch(&ancestor, 200);
    set_field(&mut left, Iid(2), "rating", Value::Num(10.0));

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    assert_eq!(step.doc().get(Iid(2)).unwrap().field("rating"), &Value::Num(10.0));
    assert_invariant(step.doc());
}

// ---------------------------------------------------------------------------
// Scenario A: colliding insertions auto-rename, nothing lost
// ---------------------------------------------------------------------------

#[test]
fn colliding_insertions_rename_and_rewrite_references() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);

    let lg = add_group(&mut left, "X");
    add_item(&mut left, lg, "disp", Some("X * 3"));
    let rg = add_group(&mut right, "X");
    add_item(&mut right, rg, "calc", Some("X + 1"));

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    let MergeStep::Merged {
        doc,
        reconciliations,
    } = step
    else {
        panic!("rename collisions must not conflict");
    };

    // Both insertions survive; the right one carries the fresh name.
    assert_eq!(group_names(&doc), vec!["hero", "X", "X-2"]);
    assert_eq!(
        reconciliations,
        vec![AutoReconciliation::DuplicateName {
            class: "Group".to_owned(),
            field: "name".to_owned(),
            iid: rg,
            orig_name: "X".to_owned(),
            renamed_to: "X-2".to_owned(),
        }]
    );

    // The right branch's code meant the renamed group; the left branch's
    // still means its own.
    let kept = find_group(&doc, "X");
    let renamed = find_group(&doc, "X-2");
    assert_eq!(item_code(&doc, kept, "disp"), "X * 3");
    assert_eq!(item_code(&doc, renamed, "calc"), "X-2 + 1");
    assert_invariant(&doc);
}

#[test]
fn triple_collision_counts_upward() {
    let mut ancestor = base_doc();
    add_group(&mut ancestor, "X");
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    add_group(&mut left, "X-2");
    add_group(&mut right, "X-2");

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    assert_eq!(
        group_names(step.doc()),
        vec!["hero", "X", "X-2", "X-2-2"]
    );
}

#[test]
fn insertion_colliding_with_a_renamed_survivor_is_renamed() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    // Left inserts a fresh "X"; right renames the surviving "hero" to "X".
    let lg = add_group(&mut left, "X");
    set_field(&mut right, Iid(2), "name", Value::str("X"));

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    assert_eq!(group_names(step.doc()), vec!["X", "X-2"]);
    assert_eq!(step.doc().get(lg).unwrap().field("name"), &Value::str("X-2"));
    assert_eq!(step.reconciliations().len(), 1);
    assert_invariant(step.doc());
}

#[test]
fn pre_existing_duplicate_names_survive_self_merge() {
    let mut ancestor = base_doc();
    add_group(&mut ancestor, "dup");
    add_group(&mut ancestor, "dup");
    let left = branch(&ancestor, 100);
    let right = branch(&ancestor, 200);

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    assert!(step.reconciliations().is_empty());
    common::assert_same_tree(step.doc(), &ancestor);
}

// ---------------------------------------------------------------------------
// Scenario B: a contents conflict holds the ancestor value until picked
// ---------------------------------------------------------------------------

#[test]
fn contents_conflict_retains_ancestor_until_picked() {
    let mut ancestor = base_doc();
    set_field(&mut ancestor, Iid(2), "rating", Value::Num(5.0));
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    set_field(&mut left, Iid(2), "rating", Value::Num(10.0));
    set_field(&mut right, Iid(2), "rating", Value::Num(20.0));

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    let MergeStep::NeedsResolution { doc, conflicts, .. } = step else {
        panic!("expected a conflict");
    };
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.group, "Group#2.rating");
    assert_eq!(conflict.class, "Group");
    assert_eq!(conflict.field, "rating");
    assert_eq!(conflict.ancestor, serde_json::json!(5.0));
    assert_eq!(conflict.left, serde_json::json!(10.0));
    assert_eq!(conflict.right, serde_json::json!(20.0));
    // Unpicked, the merged document still says 5.
    assert_eq!(doc.get(Iid(2)).unwrap().field("rating"), &Value::Num(5.0));
    assert_invariant(&doc);

    // Same merge, pick supplied: clean.
    let mut picks = PickMap::new();
    picks.insert("Group#2.rating".to_owned(), BranchSide::Left);
    let step = merge(&ancestor, &left, &right, &picks);
    assert!(matches!(step, MergeStep::Merged { .. }));
    assert_eq!(step.doc().get(Iid(2)).unwrap().field("rating"), &Value::Num(10.0));

    let mut picks = PickMap::new();
    picks.insert("Group#2.rating".to_owned(), BranchSide::Right);
    let step = merge(&ancestor, &left, &right, &picks);
    assert_eq!(step.doc().get(Iid(2)).unwrap().field("rating"), &Value::Num(20.0));
}

// ---------------------------------------------------------------------------
// Scenario C: deletion wins over a concurrent edit
// ---------------------------------------------------------------------------

#[test]
fn identity_keyed_delete_beats_edit() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    // Left deletes Item(3); right edits it.
    set_field(&mut left, Iid(2), "items", Value::List(Vec::new()));
    set_field(&mut right, Iid(3), "name", Value::str("logo-v2"));

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(
        step.conflicts().is_empty(),
        "delete-vs-edit resolves by deletion, not by conflict"
    );
    let doc = step.doc();
    assert_eq!(
        doc.get(Iid(2)).unwrap().field("items"),
        &Value::List(Vec::new())
    );
    assert!(!doc.contains(Iid(3)), "the deleted item must not survive");
    assert_invariant(doc);
}

#[test]
fn both_branches_insert_into_ordered_list() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    let li = add_item(&mut left, Iid(2), "left-item", None);
    let ri = add_item(&mut right, Iid(2), "right-item", None);

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    let items = step.doc().get(Iid(2)).unwrap().field("items").clone();
    assert_eq!(
        items,
        Value::List(vec![Value::Ref(Iid(3)), Value::Ref(li), Value::Ref(ri)])
    );
    assert_invariant(step.doc());
}

// ---------------------------------------------------------------------------
// Key-matched lists: recreation, both-added collisions
// ---------------------------------------------------------------------------

#[test]
fn recreated_keyed_element_gets_a_fresh_identity() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let right = branch(&ancestor, 200);
    // Left deletes Note(4) and recreates the same label with new text.
    set_field(&mut left, Iid(1), "notes", Value::List(Vec::new()));
    let recreated = add_note(&mut left, "n1", "tl");

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    assert!(step.conflicts().is_empty());
    let doc = step.doc();
    let Some(Value::List(notes)) = doc.get(doc.root).map(|i| i.field("notes").clone()) else {
        panic!("no notes");
    };
    assert_eq!(notes.len(), 1);
    let merged_note = notes[0].as_ref_iid().unwrap();
    assert_ne!(merged_note, Iid(4));
    assert_ne!(merged_note, recreated);
    assert_eq!(
        doc.get(merged_note).unwrap().field("text"),
        &Value::str("tl")
    );
    assert_invariant(doc);
}

#[test]
fn both_added_keyed_elements_conflict_until_picked() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    add_note(&mut left, "z", "a");
    add_note(&mut right, "z", "b");

    let step = merge(&ancestor, &left, &right, &PickMap::new());
    let conflicts = step.conflicts();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].group, "Root#1.notes[z]");
    // With no pick and no ancestor element there is nothing to retain.
    assert_eq!(
        common::list_field_strs(step.doc(), step.doc().root, "notes", "label"),
        vec!["n1"]
    );

    let mut picks = PickMap::new();
    picks.insert("Root#1.notes[z]".to_owned(), BranchSide::Right);
    let step = merge(&ancestor, &left, &right, &picks);
    assert!(step.conflicts().is_empty());
    assert_eq!(
        common::list_field_strs(step.doc(), step.doc().root, "notes", "label"),
        vec!["n1", "z"]
    );
    let doc = step.doc();
    let z = doc
        .iter()
        .find(|(_, inst)| inst.field("label").as_str() == Some("z"))
        .map(|(iid, _)| iid)
        .unwrap();
    assert_eq!(doc.get(z).unwrap().field("text"), &Value::str("b"));
    assert_invariant(doc);
}

// ---------------------------------------------------------------------------
// Faults
// ---------------------------------------------------------------------------

#[test]
fn pick_for_unknown_group_is_a_fault() {
    let ancestor = base_doc();
    let left = branch(&ancestor, 100);
    let right = branch(&ancestor, 200);
    let mut picks = PickMap::new();
    picks.insert("Group#2.rating".to_owned(), BranchSide::Left);

    let err = try_merge(&test_meta(), &test_policies(), &ancestor, &left, &right, &picks)
        .unwrap_err();
    assert_eq!(
        err,
        MergeFault::UnknownPickGroup {
            group: "Group#2.rating".to_owned()
        }
    );
}

#[test]
fn divergence_on_an_unexpected_field_is_a_fault() {
    let ancestor = base_doc();
    let mut left = branch(&ancestor, 100);
    let mut right = branch(&ancestor, 200);
    set_field(&mut left, Iid(2), "rating", Value::Num(10.0));
    set_field(&mut right, Iid(2), "rating", Value::Num(20.0));

    let strict = test_policies().row("Group", "rating", FieldPolicy::Unexpected);
    let err = try_merge(&test_meta(), &strict, &ancestor, &left, &right, &PickMap::new())
        .unwrap_err();
    assert!(matches!(
        err,
        MergeFault::UnexpectedDivergence { ref class, ref field, .. }
            if class == "Group" && field == "rating"
    ));
}

#[test]
fn mismatched_roots_are_a_fault() {
    let ancestor = base_doc();
    let left = branch(&ancestor, 100);
    let right = Document::new(Instance::new("Group"));
    let err = try_merge(&test_meta(), &test_policies(), &ancestor, &left, &right, &PickMap::new())
        .unwrap_err();
    assert!(matches!(err, MergeFault::RootMismatch { .. }));
}

// ---------------------------------------------------------------------------
// Startup validation
// ---------------------------------------------------------------------------

#[test]
fn weak_ref_merge_keys_are_rejected_at_startup() {
    let schema = "\
Root (concrete)
  entries: [Entry]

Entry (concrete)
  @WeakRef target: Target?
  note: String

Target (concrete)
  name: String
";
    let meta = SchemaMeta::compile(schema).unwrap();
    let table = PolicyTable::new()
        .row(
            "Root",
            "entries",
            FieldPolicy::keyed_list(ArrayType::Unordered, "target.name"),
        )
        .row("Entry", "target", FieldPolicy::Harmless)
        .row("Entry", "note", FieldPolicy::Contents)
        .row("Target", "name", FieldPolicy::Contents);
    let err = validate::check(&meta, &table).unwrap_err();
    assert_eq!(
        err,
        PolicyError::WeakRefKey {
            class: "Root".to_owned(),
            field: "entries".to_owned(),
            key_path: "target.name".to_owned(),
            segment: "target".to_owned(),
        }
    );
}

#[test]
fn test_fixtures_validate_clean() {
    validate::check(&test_meta(), &test_policies()).unwrap();
}
