//! Shared fixtures: a small schema with every merge-relevant shape (rename
//! lists, key-path lists, identity lists, weak refs, code fields) plus
//! builders for ancestor/branch documents.

#![allow(dead_code)]

use std::sync::Once;

use sitemerge::policy::{ArrayType, FieldPolicy, PolicyTable};
use sitemerge::schema::meta::SchemaMeta;
use sitemerge::{Document, Iid, Instance, Value};

pub const TEST_SCHEMA: &str = "\
Root (concrete)
  groups: [Group]
  notes: [Note]

Group (concrete)
  name: String
  @Const uuid: String
  rating: Num
  items: [Item]

Item (concrete)
  name: String
  code: CustomCode?

CustomCode (concrete)
  code: String

Note (concrete)
  label: String
  text: String
";

pub fn test_meta() -> SchemaMeta {
    SchemaMeta::compile(TEST_SCHEMA).expect("test schema compiles")
}

pub fn test_policies() -> PolicyTable {
    PolicyTable::new()
        .row(
            "Root",
            "groups",
            FieldPolicy::rename_list(ArrayType::Unordered, "name"),
        )
        .row(
            "Root",
            "notes",
            FieldPolicy::keyed_list(ArrayType::Unordered, "label"),
        )
        .row("Group", "name", FieldPolicy::Contents)
        .row("Group", "uuid", FieldPolicy::Harmless)
        .row("Group", "rating", FieldPolicy::Contents)
        .row(
            "Group",
            "items",
            FieldPolicy::identity_list(ArrayType::Ordered),
        )
        .row("Item", "name", FieldPolicy::Contents)
        .row("Item", "code", FieldPolicy::Contents)
        .row("CustomCode", "code", FieldPolicy::Contents)
        .row("Note", "label", FieldPolicy::Contents)
        .row("Note", "text", FieldPolicy::Contents)
        .code_field("CustomCode", "code")
}

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Root(1) { groups: [Group(2) "hero" { items: [Item(3) "logo"] }],
/// notes: [Note(4) "n1"] }.
pub fn base_doc() -> Document {
    let mut doc = Document::new(Instance::new("Root"));
    let group = add_group(&mut doc, "hero");
    let _item = add_item(&mut doc, group, "logo", None);
    let _note = add_note(&mut doc, "n1", "t");
    doc
}

/// Clones the ancestor and gives the branch its own identity range.
pub fn branch(ancestor: &Document, floor: u64) -> Document {
    let mut doc = ancestor.clone();
    doc.set_iid_floor(floor);
    doc
}

pub fn push_ref(doc: &mut Document, owner: Iid, field: &str, target: Iid) {
    let inst = doc.get_mut(owner).expect("owner exists");
    let mut items = match inst.field(field) {
        Value::List(items) => items.clone(),
        Value::Null => Vec::new(),
        other => panic!("{field} is not a list: {other:?}"),
    };
    items.push(Value::Ref(target));
    inst.set(field, Value::List(items));
}

pub fn add_group(doc: &mut Document, name: &str) -> Iid {
    let iid = doc.alloc(
        Instance::new("Group")
            .with("name", Value::str(name))
            .with("rating", Value::Num(1.0))
            .with("items", Value::List(Vec::new())),
    );
    if let Some(inst) = doc.get_mut(iid) {
        inst.set("uuid", Value::str(format!("u{iid}")));
    }
    let root = doc.root;
    push_ref(doc, root, "groups", iid);
    iid
}

pub fn add_item(doc: &mut Document, group: Iid, name: &str, code: Option<&str>) -> Iid {
    let code_value = match code {
        Some(src) => {
            let cc = doc.alloc(Instance::new("CustomCode").with("code", Value::str(src)));
            Value::Ref(cc)
        }
        None => Value::Null,
    };
    let iid = doc.alloc(
        Instance::new("Item")
            .with("name", Value::str(name))
            .with("code", code_value),
    );
    push_ref(doc, group, "items", iid);
    iid
}

pub fn add_note(doc: &mut Document, label: &str, text: &str) -> Iid {
    let iid = doc.alloc(
        Instance::new("Note")
            .with("label", Value::str(label))
            .with("text", Value::str(text)),
    );
    let root = doc.root;
    push_ref(doc, root, "notes", iid);
    iid
}

pub fn set_field(doc: &mut Document, iid: Iid, field: &str, value: Value) {
    doc.get_mut(iid).expect("instance exists").set(field, value);
}

/// Group names in list order at the root.
pub fn group_names(doc: &Document) -> Vec<String> {
    list_field_strs(doc, doc.root, "groups", "name")
}

pub fn list_field_strs(doc: &Document, owner: Iid, field: &str, name_field: &str) -> Vec<String> {
    let Some(Value::List(items)) = doc.get(owner).map(|i| i.field(field).clone()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_ref_iid)
        .filter_map(|iid| doc.get(iid))
        .filter_map(|inst| inst.field(name_field).as_str().map(str::to_owned))
        .collect()
}

/// Same instances under the same identities with the same root; allocator
/// positions may differ.
pub fn assert_same_tree(a: &Document, b: &Document) {
    assert_eq!(a.root, b.root);
    let av: Vec<_> = a.iter().collect();
    let bv: Vec<_> = b.iter().collect();
    assert_eq!(av, bv);
}
