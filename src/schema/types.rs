//! The type algebra for schema field types.
//!
//! A small expression language shared by the schema compiler and the merge
//! engine: primitives, optionals, lists, sets, maps, labeled unions (string
//! literal tags), and references to other node classes. Values are immutable
//! and structurally compared.
//!
//! The concrete grammar ([`Display`] renders it back):
//!
//! ```text
//! Bool | Num | String | Any      primitives
//! 'tag'                          string literal (union label)
//! T?                             optional
//! [T]                            list
//! {T}                            set
//! Map[K, V]                      map
//! A | B | C                      union
//! SomeClass                      reference to a declared node class
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ty
// ---------------------------------------------------------------------------

/// A field type expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ty {
    /// Boolean primitive.
    Bool,
    /// Numeric primitive (`Num` / `Number` in schema text).
    Num,
    /// Textual primitive (`String` / `Text` in schema text).
    Text,
    /// Unconstrained value.
    Any,
    /// A string-literal tag, e.g. `'picture'` — labels a union branch.
    StringLiteral {
        /// The literal text (without quotes).
        value: String,
    },
    /// `T?` — the value may be absent.
    Optional {
        /// The wrapped type.
        inner: Box<Ty>,
    },
    /// `[T]` — an ordered list.
    List {
        /// The element type.
        elem: Box<Ty>,
    },
    /// `{T}` — an unordered set.
    Set {
        /// The element type.
        elem: Box<Ty>,
    },
    /// `Map[K, V]`.
    Map {
        /// The key type.
        key: Box<Ty>,
        /// The value type.
        value: Box<Ty>,
    },
    /// `A | B | ...` — at least two alternatives.
    Union {
        /// The alternatives, in declaration order.
        alts: Vec<Ty>,
    },
    /// A reference to another declared node class.
    Instance {
        /// The referenced class name.
        class: String,
    },
}

impl Ty {
    /// Convenience constructor for an optional type.
    #[must_use]
    pub fn optional(inner: Self) -> Self {
        Self::Optional {
            inner: Box::new(inner),
        }
    }

    /// Convenience constructor for a list type.
    #[must_use]
    pub fn list(elem: Self) -> Self {
        Self::List {
            elem: Box::new(elem),
        }
    }

    /// Convenience constructor for an instance reference.
    #[must_use]
    pub fn instance(class: impl Into<String>) -> Self {
        Self::Instance {
            class: class.into(),
        }
    }

    /// Returns `true` if any part of this type references a node class.
    #[must_use]
    pub fn contains_instance(&self) -> bool {
        match self {
            Self::Instance { .. } => true,
            Self::Optional { inner } => inner.contains_instance(),
            Self::List { elem } | Self::Set { elem } => elem.contains_instance(),
            Self::Map { key, value } => key.contains_instance() || value.contains_instance(),
            Self::Union { alts } => alts.iter().any(Self::contains_instance),
            _ => false,
        }
    }

    /// All class names referenced anywhere in this type, in source order.
    #[must_use]
    pub fn referenced_classes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_classes(&mut out);
        out
    }

    fn collect_classes<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Instance { class } => out.push(class),
            Self::Optional { inner } => inner.collect_classes(out),
            Self::List { elem } | Self::Set { elem } => elem.collect_classes(out),
            Self::Map { key, value } => {
                key.collect_classes(out);
                value.collect_classes(out);
            }
            Self::Union { alts } => {
                for alt in alts {
                    alt.collect_classes(out);
                }
            }
            _ => {}
        }
    }

    /// The class names a key path can step *into* from a field of this type.
    ///
    /// Strips one level of optionality and one container (list/set) boundary,
    /// then collects the instance alternatives. This mirrors how a rename or
    /// merge key path descends: `items: [Item]` with key `name` steps into
    /// `Item` and resolves `name` there.
    #[must_use]
    pub fn core_instances(&self) -> Vec<&str> {
        match self {
            Self::Optional { inner } => inner.core_instances(),
            Self::List { elem } | Self::Set { elem } => elem.core_instances(),
            Self::Union { alts } => alts.iter().flat_map(Self::core_instances).collect(),
            Self::Instance { class } => vec![class],
            _ => Vec::new(),
        }
    }

    /// Returns `true` if the outermost shape (through optionality) is a list
    /// or a set.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        match self {
            Self::List { .. } | Self::Set { .. } => true,
            Self::Optional { inner } => inner.is_collection(),
            Self::Union { alts } => alts.iter().all(Self::is_collection),
            _ => false,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "Bool"),
            Self::Num => write!(f, "Num"),
            Self::Text => write!(f, "String"),
            Self::Any => write!(f, "Any"),
            Self::StringLiteral { value } => write!(f, "'{value}'"),
            Self::Optional { inner } => match inner.as_ref() {
                // Unions bind looser than `?`, so parenthesize via re-render.
                Ty::Union { .. } => write!(f, "({inner})?"),
                _ => write!(f, "{inner}?"),
            },
            Self::List { elem } => write!(f, "[{elem}]"),
            Self::Set { elem } => write!(f, "{{{elem}}}"),
            Self::Map { key, value } => write!(f, "Map[{key}, {value}]"),
            Self::Union { alts } => {
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{alt}")?;
                }
                Ok(())
            }
            Self::Instance { class } => write!(f, "{class}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_roundtrips_grammar() {
        let ty = Ty::Map {
            key: Box::new(Ty::Text),
            value: Box::new(Ty::Union {
                alts: vec![Ty::Text, Ty::Bool, Ty::optional(Ty::Num)],
            }),
        };
        assert_eq!(format!("{ty}"), "Map[String, String | Bool | Num?]");
    }

    #[test]
    fn contains_instance_sees_through_containers() {
        let ty = Ty::list(Ty::optional(Ty::instance("Variant")));
        assert!(ty.contains_instance());
        assert!(!Ty::list(Ty::Text).contains_instance());
    }

    #[test]
    fn referenced_classes_in_source_order() {
        let ty = Ty::Union {
            alts: vec![
                Ty::instance("TplTag"),
                Ty::instance("TplComponent"),
                Ty::optional(Ty::instance("TplSlot")),
            ],
        };
        assert_eq!(
            ty.referenced_classes(),
            vec!["TplTag", "TplComponent", "TplSlot"]
        );
    }

    #[test]
    fn core_instances_steps_into_list_element() {
        let ty = Ty::list(Ty::instance("Item"));
        assert_eq!(ty.core_instances(), vec!["Item"]);

        let ty = Ty::optional(Ty::list(Ty::Union {
            alts: vec![Ty::instance("A"), Ty::instance("B")],
        }));
        assert_eq!(ty.core_instances(), vec!["A", "B"]);
    }

    #[test]
    fn core_instances_empty_for_scalars() {
        assert!(Ty::Text.core_instances().is_empty());
        assert!(Ty::list(Ty::Num).core_instances().is_empty());
    }

    #[test]
    fn is_collection_through_optional() {
        assert!(Ty::list(Ty::Text).is_collection());
        assert!(Ty::optional(Ty::list(Ty::Text)).is_collection());
        assert!(!Ty::Text.is_collection());
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Ty::list(Ty::instance("X")), Ty::list(Ty::instance("X")));
        assert_ne!(Ty::list(Ty::instance("X")), Ty::list(Ty::instance("Y")));
    }

    #[test]
    fn serde_tagged() {
        let json = serde_json::to_string(&Ty::instance("Component")).unwrap();
        assert!(json.contains("\"kind\":\"instance\""));
        assert!(json.contains("\"class\":\"Component\""));
    }
}
