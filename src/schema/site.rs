//! The embedded production schema for the site document model.
//!
//! One schema-language document describing the whole design-document tree:
//! the site root, reusable components with their parameters and variants,
//! the template-node tree, style tokens and mixins, arenas, and the
//! expression classes. [`site_meta`] compiles it once into a
//! [`SchemaMeta`](super::meta::SchemaMeta).

use crate::error::SchemaError;
use crate::schema::meta::SchemaMeta;

/// Schema text for the site document model.
pub const SITE_SCHEMA: &str = "\
# The root of a design document.
Site (concrete)
  components: [Component]
  arenas: [Arena]
  styleTokens: [StyleToken]
  mixins: [Mixin]
  themes: [Theme]
  imageAssets: [ImageAsset]
  globalVariantGroups: [VariantGroup]
  globalContexts: [TplComponent]
  @WeakRef activeTheme: Theme?
  @WeakRef pageWrapper: Component?
  flags: Map[String, Any]

StyleToken (concrete)
  name: String
  @Const uuid: String
  type: String
  value: String
  variantedValues: [VariantedValue]
  isRegistered: Bool

# A token value override active under specific global variants.
VariantedValue (concrete)
  @WeakRef variants: [Variant]
  value: String

Mixin (concrete)
  name: String
  @Const uuid: String
  rs: RuleSet
  preview: String?
  forTheme: Bool

RuleSet (concrete)
  values: Map[String, String]
  @WeakRef mixins: [Mixin]

Theme (concrete)
  defaultStyle: Mixin
  active: Bool

ImageAsset (concrete)
  name: String
  @Const uuid: String
  type: 'picture' | 'icon'
  dataUri: String?
  width: Num?
  height: Num?
  aspectRatio: Num?

Arena (concrete)
  name: String
  children: [ArenaFrame]
  @Transient @WeakRef focusedFrame: ArenaFrame?

ArenaFrame (concrete)
  name: String
  @Const uuid: String
  container: TplComponent
  width: Num
  height: Num
  top: Num?
  left: Num?
  viewMode: 'stretch' | 'centered'

Component (concrete)
  name: String
  @Const uuid: String
  type: 'plain' | 'page' | 'frame'
  params: [Param]
  variants: [Variant]
  variantGroups: [VariantGroup]
  tplTree: TplNode
  @WeakRef superComp: Component?
  @WeakRef subComps: [Component]

Param (concrete)
  @Const uuid: String
  variable: Var
  defaultExpr: Expr?
  description: String?

Var (concrete)
  name: String
  @Const uuid: String

VariantGroup (concrete)
  @Const uuid: String
  @WeakRef param: Param
  variants: [Variant]
  multi: Bool

Variant (concrete)
  @Const uuid: String
  name: String
  selectors: [String]?
  @WeakRef parent: VariantGroup?
  mediaQuery: String?

# The template tree: what a component renders.
TplNode
  @Const uuid: String
  @WeakRef parent: TplNode?
  locked: Bool?

  TplTag (concrete)
    tag: String
    name: String?
    children: [TplNode]
    vsettings: [VariantSetting]
    type: 'text' | 'image' | 'other'
    condExpr: Expr?

  TplComponent (concrete)
    name: String?
    @WeakRef component: Component
    vsettings: [VariantSetting]

  TplSlot (concrete)
    @WeakRef param: Param
    defaultContents: [TplNode]
    vsettings: [VariantSetting]

# Per-variant-combination settings on a template node.
VariantSetting (concrete)
  @WeakRef variants: [Variant]
  args: [Arg]
  attrs: Map[String, String]
  rs: RuleSet
  dataCond: Expr?
  text: String?

Arg (concrete)
  @WeakRef param: Param
  expr: Expr

Expr
  CustomCode (concrete)
    code: String
    fallback: Expr?

  VarRef (concrete)
    @WeakRef variable: Var

  RenderExpr (concrete)
    tpl: [TplNode]
";

/// Compiles the embedded site schema.
///
/// # Errors
///
/// Returns a [`SchemaError`] only if the embedded text is itself broken,
/// which the unit tests rule out.
pub fn site_meta() -> Result<SchemaMeta, SchemaError> {
    SchemaMeta::compile(SITE_SCHEMA)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::types::Ty;

    #[test]
    fn embedded_schema_compiles() {
        let meta = site_meta().unwrap();
        assert!(meta.is_abstract("TplNode").unwrap());
        assert!(meta.is_abstract("Expr").unwrap());
        assert!(!meta.is_abstract("Site").unwrap());
        assert_eq!(meta.concrete_classes().count(), 22);
    }

    #[test]
    fn tpl_nodes_inherit_uuid_and_parent() {
        let meta = site_meta().unwrap();
        let names: Vec<_> = meta
            .all_fields("TplTag")
            .unwrap()
            .iter()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(names[..3], ["uuid", "parent", "locked"]);
        assert!(meta.field("TplSlot", "parent").unwrap().weak_ref);
        assert!(meta.field("TplComponent", "uuid").unwrap().const_);
    }

    #[test]
    fn weak_and_transient_annotations_land() {
        let meta = site_meta().unwrap();
        assert!(meta.field("Site", "activeTheme").unwrap().weak_ref);
        assert!(!meta.field("Site", "themes").unwrap().weak_ref);
        let focused = meta.field("Arena", "focusedFrame").unwrap();
        assert!(focused.transient);
        assert!(focused.weak_ref);
    }

    #[test]
    fn literal_unions_parse() {
        let meta = site_meta().unwrap();
        assert_eq!(
            meta.field("ImageAsset", "type").unwrap().ty,
            Ty::Union {
                alts: vec![
                    Ty::StringLiteral {
                        value: "picture".to_owned()
                    },
                    Ty::StringLiteral {
                        value: "icon".to_owned()
                    },
                ]
            }
        );
    }
}
