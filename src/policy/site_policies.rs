//! The hand-authored policy table for the site document model.
//!
//! Every field of every concrete class in the embedded site schema gets an
//! explicit row. The broad strokes:
//!
//! - Top-level named collections (components, tokens, mixins, arenas,
//!   image assets) auto-rename insertion collisions instead of conflicting.
//! - `uuid` fields and machinery-maintained backpointers are harmless.
//! - Creation-time wiring (`Arg.param`, `VariantGroup.param`,
//!   `TplComponent.component`) never changes after the fact, so divergence
//!   there is a fault, not a conflict.
//! - Everything a user actually edits is `Contents`.
//! - Lists of value-carriers keyed by variant combination or parameter use
//!   computed keys, since their natural key crosses weak references that a
//!   declarative path is not allowed to traverse.

use crate::doc::{Document, NodeCtx, Value};
use crate::merge::special::{merge_component_variants, merge_global_contexts, merge_tpl_children};
use crate::policy::{ArrayType, FieldPolicy, PolicyTable};

use FieldPolicy::{Contents, Harmless, Special, Unexpected};

/// The variant combination an override applies to, as a stable key.
/// Elements with no variants key as `base`.
fn variant_combo_key(doc: &Document, value: &Value) -> Option<String> {
    let node = NodeCtx {
        doc,
        iid: value.as_ref_iid()?,
    };
    let inst = node.inst().ok()?;
    let mut iids: Vec<u64> = match inst.field("variants") {
        Value::List(items) => items.iter().filter_map(|v| v.as_ref_iid()).map(|i| i.0).collect(),
        Value::Null => Vec::new(),
        _ => return None,
    };
    iids.sort_unstable();
    if iids.is_empty() {
        return Some("base".to_owned());
    }
    Some(
        iids.iter()
            .map(|i| format!("v{i}"))
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Args are one-per-parameter.
fn arg_key(doc: &Document, value: &Value) -> Option<String> {
    let node = NodeCtx {
        doc,
        iid: value.as_ref_iid()?,
    };
    let param = node.inst().ok()?.field("param").as_ref_iid()?;
    Some(format!("param={param}"))
}

/// Builds the full table for the site schema.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn site_policy_table() -> PolicyTable {
    let rename = |field: &'static str| FieldPolicy::rename_list(ArrayType::Unordered, field);
    let by_variants = FieldPolicy::fn_keyed_list(ArrayType::Unordered, variant_combo_key);
    let by_identity = FieldPolicy::identity_list(ArrayType::Unordered);

    let mut table = PolicyTable::new()
        // Site
        .row("Site", "components", rename("name"))
        .row("Site", "arenas", rename("name"))
        .row("Site", "styleTokens", rename("name"))
        .row("Site", "mixins", rename("name"))
        .row("Site", "themes", by_identity)
        .row("Site", "imageAssets", rename("name"))
        .row("Site", "globalVariantGroups", by_identity)
        .row("Site", "globalContexts", Special(merge_global_contexts))
        .row("Site", "activeTheme", Harmless)
        .row("Site", "pageWrapper", Harmless)
        .row("Site", "flags", Contents)
        // StyleToken
        .row("StyleToken", "name", Contents)
        .row("StyleToken", "uuid", Harmless)
        .row("StyleToken", "type", Contents)
        .row("StyleToken", "value", Contents)
        .row("StyleToken", "variantedValues", by_variants)
        .row("StyleToken", "isRegistered", Harmless)
        // VariantedValue
        .row("VariantedValue", "variants", Unexpected)
        .row("VariantedValue", "value", Contents)
        // Mixin
        .row("Mixin", "name", Contents)
        .row("Mixin", "uuid", Harmless)
        .row("Mixin", "rs", Contents)
        .row("Mixin", "preview", Harmless)
        .row("Mixin", "forTheme", Unexpected)
        // RuleSet
        .row("RuleSet", "values", Contents)
        .row("RuleSet", "mixins", Contents)
        // Theme
        .row("Theme", "defaultStyle", Contents)
        .row("Theme", "active", Harmless)
        // ImageAsset
        .row("ImageAsset", "name", Contents)
        .row("ImageAsset", "uuid", Harmless)
        .row("ImageAsset", "type", Unexpected)
        .row("ImageAsset", "dataUri", Contents)
        .row("ImageAsset", "width", Contents)
        .row("ImageAsset", "height", Contents)
        .row("ImageAsset", "aspectRatio", Harmless)
        // Arena
        .row("Arena", "name", Contents)
        .row(
            "Arena",
            "children",
            FieldPolicy::rename_list(ArrayType::Ordered, "name"),
        )
        // ArenaFrame
        .row("ArenaFrame", "name", Contents)
        .row("ArenaFrame", "uuid", Harmless)
        .row("ArenaFrame", "container", Contents)
        .row("ArenaFrame", "width", Contents)
        .row("ArenaFrame", "height", Contents)
        .row("ArenaFrame", "top", Harmless)
        .row("ArenaFrame", "left", Harmless)
        .row("ArenaFrame", "viewMode", Contents)
        // Component
        .row("Component", "name", Contents)
        .row("Component", "uuid", Harmless)
        .row("Component", "type", Unexpected)
        .row(
            "Component",
            "params",
            FieldPolicy::keyed_list(ArrayType::Unordered, "variable.name"),
        )
        .row("Component", "variants", Special(merge_component_variants))
        .row("Component", "variantGroups", by_identity)
        .row("Component", "tplTree", Contents)
        .row("Component", "superComp", Unexpected)
        .row("Component", "subComps", Contents)
        // Param
        .row("Param", "uuid", Harmless)
        .row("Param", "variable", Contents)
        .row("Param", "defaultExpr", Contents)
        .row("Param", "description", Harmless)
        // Var
        .row("Var", "name", Contents)
        .row("Var", "uuid", Harmless)
        // VariantGroup
        .row("VariantGroup", "uuid", Harmless)
        .row("VariantGroup", "param", Unexpected)
        .row("VariantGroup", "variants", by_identity)
        .row("VariantGroup", "multi", Contents)
        // Variant
        .row("Variant", "uuid", Harmless)
        .row("Variant", "name", Contents)
        .row("Variant", "selectors", Contents)
        .row("Variant", "parent", Unexpected)
        .row("Variant", "mediaQuery", Contents);

    // The three TplNode subclasses share the inherited base fields.
    for class in ["TplTag", "TplComponent", "TplSlot"] {
        table = table
            .row(class, "uuid", Harmless)
            .row(class, "parent", Harmless)
            .row(class, "locked", Harmless)
            .row(
                class,
                "vsettings",
                FieldPolicy::fn_keyed_list(ArrayType::Unordered, variant_combo_key),
            );
    }

    table
        .row("TplTag", "tag", Contents)
        .row("TplTag", "name", Contents)
        .row("TplTag", "children", Special(merge_tpl_children))
        .row("TplTag", "type", Unexpected)
        .row("TplTag", "condExpr", Contents)
        .row("TplComponent", "name", Contents)
        .row("TplComponent", "component", Unexpected)
        .row("TplSlot", "param", Unexpected)
        .row("TplSlot", "defaultContents", Special(merge_tpl_children))
        // VariantSetting
        .row("VariantSetting", "variants", Unexpected)
        .row(
            "VariantSetting",
            "args",
            FieldPolicy::fn_keyed_list(ArrayType::Unordered, arg_key),
        )
        .row("VariantSetting", "attrs", Contents)
        .row("VariantSetting", "rs", Contents)
        .row("VariantSetting", "dataCond", Contents)
        .row("VariantSetting", "text", Contents)
        // Arg
        .row("Arg", "param", Unexpected)
        .row("Arg", "expr", Contents)
        // Expr subclasses
        .row("CustomCode", "code", Contents)
        .row("CustomCode", "fallback", Contents)
        .row("VarRef", "variable", Contents)
        .row("RenderExpr", "tpl", Special(merge_tpl_children))
        // Token and variable names appear as identifiers in code.
        .code_field("CustomCode", "code")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::{Iid, Instance};

    #[test]
    fn table_has_the_expected_shape() {
        let table = site_policy_table();
        assert!(matches!(
            table.policy_for("Site", "components").unwrap(),
            FieldPolicy::Array(_)
        ));
        assert!(matches!(
            table.policy_for("TplTag", "children").unwrap(),
            FieldPolicy::Special(_)
        ));
        assert!(table.policy_for("Site", "nonesuch").is_err());
        assert_eq!(table.code_fields(), &[("CustomCode".to_owned(), "code".to_owned())]);
    }

    #[test]
    fn variant_combo_key_sorts_and_defaults_to_base() {
        let mut doc = Document::new(Instance::new("Site"));
        let vs = doc.alloc(Instance::new("VariantSetting").with(
            "variants",
            Value::List(vec![Value::Ref(Iid(9)), Value::Ref(Iid(3))]),
        ));
        assert_eq!(
            variant_combo_key(&doc, &Value::Ref(vs)),
            Some("v3,v9".to_owned())
        );
        let bare = doc.alloc(Instance::new("VariantSetting"));
        assert_eq!(variant_combo_key(&doc, &Value::Ref(bare)), Some("base".to_owned()));
    }

    #[test]
    fn arg_key_names_the_param() {
        let mut doc = Document::new(Instance::new("Site"));
        let arg = doc.alloc(Instance::new("Arg").with("param", Value::Ref(Iid(5))));
        assert_eq!(arg_key(&doc, &Value::Ref(arg)), Some("param=5".to_owned()));
    }
}
