//! Runtime values and instances.
//!
//! Documents are arenas of [`Instance`]s addressed by [`Iid`]. Field values
//! are the small dynamic [`Value`] type; references between instances are
//! always `Value::Ref` — whether an edge is owning (strong) or not (weak)
//! is a property of the schema field holding it, never of the value itself.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Iid
// ---------------------------------------------------------------------------

/// An instance identity: stable across branches, clones excepted.
///
/// The same logical node carries the same `Iid` in the ancestor and in both
/// branches, which is what lets the merge engine line up edits without any
/// heuristics.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Iid(pub u64);

impl fmt::Display for Iid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A field value.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Absent / unset.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number. Compared bitwise, so `NaN == NaN` and `-0.0 != 0.0`; what
    /// matters here is a stable equivalence, not IEEE semantics.
    Num(f64),
    /// Text.
    Str(String),
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed mapping, in key order.
    Map(BTreeMap<String, Value>),
    /// Reference to another instance in the same document.
    Ref(Iid),
}

impl Value {
    /// Shorthand for a string value.
    #[must_use]
    pub fn str(s: impl Into<String>) -> Self {
        Self::Str(s.into())
    }

    /// The string inside `Str`, if that is what this is.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The identity inside `Ref`, if that is what this is.
    #[must_use]
    pub const fn as_ref_iid(&self) -> Option<Iid> {
        match self {
            Self::Ref(iid) => Some(*iid),
            _ => None,
        }
    }

    /// The elements inside `List`, if that is what this is.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// All identities referenced directly by this value (not through other
    /// instances), in encounter order.
    pub fn referenced_iids(&self, out: &mut Vec<Iid>) {
        match self {
            Self::Ref(iid) => out.push(*iid),
            Self::List(items) => {
                for item in items {
                    item.referenced_iids(out);
                }
            }
            Self::Map(entries) => {
                for item in entries.values() {
                    item.referenced_iids(out);
                }
            }
            _ => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Num(a), Self::Num(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

// ---------------------------------------------------------------------------
// Instance
// ---------------------------------------------------------------------------

/// One node: a concrete class name plus its field values.
///
/// Fields not present in the map read as [`Value::Null`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// The concrete class of this node.
    pub class: String,
    /// Field values, in field-name order.
    pub fields: BTreeMap<String, Value>,
}

impl Instance {
    /// An instance of `class` with all fields unset.
    #[must_use]
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Reads a field, treating absence as null.
    #[must_use]
    pub fn field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&Value::Null)
    }

    /// Writes a field.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
