//! The schema metadata runtime.
//!
//! [`SchemaMeta`] is the compiled, queryable form of a schema: classes with
//! resolved inheritance, fields in base-to-derived order, abstractness, and
//! a content hash. It is an explicit value passed to everything that needs
//! it; there is no process-wide schema singleton, so two schemas (say, a
//! production one and a test one) coexist without ceremony.
//!
//! # Determinism
//!
//! Classes are stored in a `BTreeMap` and every enumeration (`classes()`,
//! `concrete_classes()`, `strict_subclasses()`) iterates in name order.
//! `schema_hash` is a SHA-256 over normalized schema text, so two runtimes
//! with equal hashes agree on every class, field, and type.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use crate::error::SchemaError;
use crate::schema::parse::parse_schema;
use crate::schema::types::Ty;

// ---------------------------------------------------------------------------
// FieldDef / ClassDef
// ---------------------------------------------------------------------------

/// A resolved field definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Field type.
    pub ty: Ty,
    /// `@Const` — immutable after construction.
    pub const_: bool,
    /// `@Transient` — excluded from persistence and merging.
    pub transient: bool,
    /// `@WeakRef` — references through this field do not own their target.
    pub weak_ref: bool,
}

/// A resolved class definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassDef {
    /// Class name.
    pub name: String,
    /// Direct base class, if any.
    pub base: Option<String>,
    /// Fields declared on this class itself (not inherited).
    pub own_fields: Vec<FieldDef>,
    /// Whether instances of this exact class may exist.
    pub concrete: bool,
    /// Direct subclasses, in name order.
    pub subclasses: Vec<String>,
}

// ---------------------------------------------------------------------------
// SchemaMeta
// ---------------------------------------------------------------------------

/// Compiled schema metadata.
#[derive(Clone, Debug)]
pub struct SchemaMeta {
    classes: BTreeMap<String, ClassDef>,
    hash: [u8; 32],
}

impl SchemaMeta {
    /// Compiles schema text into a metadata runtime.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for any parse failure, or
    /// [`SchemaError::UnknownClass`] when a field type references a class the
    /// schema never declares.
    pub fn compile(text: &str) -> Result<Self, SchemaError> {
        let raw = parse_schema(text)?;
        let mut classes: BTreeMap<String, ClassDef> = BTreeMap::new();
        let mut children: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for rc in &raw {
            if let Some(parent) = &rc.parent {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(rc.name.clone());
            }
        }

        for rc in raw {
            let subclasses = children.remove(&rc.name).unwrap_or_default();
            // Leaves are concrete even without the marker; branches need it.
            let concrete = rc.concrete_marker || subclasses.is_empty();
            let def = ClassDef {
                name: rc.name.clone(),
                base: rc.parent,
                own_fields: rc
                    .fields
                    .into_iter()
                    .map(|f| FieldDef {
                        name: f.name,
                        ty: f.ty,
                        const_: f.const_,
                        transient: f.transient,
                        weak_ref: f.weak_ref,
                    })
                    .collect(),
                concrete,
                subclasses,
            };
            classes.insert(rc.name, def);
        }

        let meta = Self {
            classes,
            hash: hash_schema_text(text),
        };
        meta.validate_references()?;
        Ok(meta)
    }

    /// Every `Instance` type must name a declared class.
    fn validate_references(&self) -> Result<(), SchemaError> {
        for def in self.classes.values() {
            for field in &def.own_fields {
                for class in field.ty.referenced_classes() {
                    if !self.classes.contains_key(class) {
                        return Err(SchemaError::UnknownClass {
                            class: class.to_owned(),
                            referenced_by: format!("{}.{}", def.name, field.name),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up a class definition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] when the class is not declared.
    pub fn class(&self, name: &str) -> Result<&ClassDef, SchemaError> {
        self.classes.get(name).ok_or_else(|| SchemaError::NoSuchClass {
            class: name.to_owned(),
        })
    }

    /// All class names, in name order.
    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// All concrete class names, in name order.
    pub fn concrete_classes(&self) -> impl Iterator<Item = &str> {
        self.classes
            .values()
            .filter(|d| d.concrete)
            .map(|d| d.name.as_str())
    }

    /// Whether instances of this exact class are forbidden.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] when the class is not declared.
    pub fn is_abstract(&self, class: &str) -> Result<bool, SchemaError> {
        Ok(!self.class(class)?.concrete)
    }

    /// Every class transitively derived from `class`, in name order, not
    /// including `class` itself.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] when the class is not declared.
    pub fn strict_subclasses(&self, class: &str) -> Result<Vec<&str>, SchemaError> {
        let def = self.class(class)?;
        let mut out = Vec::new();
        let mut queue: Vec<&str> = def.subclasses.iter().map(String::as_str).collect();
        while let Some(name) = queue.pop() {
            let sub = self.class(name)?;
            out.push(sub.name.as_str());
            queue.extend(sub.subclasses.iter().map(String::as_str));
        }
        out.sort_unstable();
        Ok(out)
    }

    /// Whether `class` is `ancestor` or derives from it.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] when either class is missing.
    pub fn is_subclass_of(&self, class: &str, ancestor: &str) -> Result<bool, SchemaError> {
        self.class(ancestor)?;
        let mut cur = Some(self.class(class)?);
        while let Some(def) = cur {
            if def.name == ancestor {
                return Ok(true);
            }
            cur = match &def.base {
                Some(base) => Some(self.class(base)?),
                None => None,
            };
        }
        Ok(false)
    }

    /// Own plus inherited fields, base-first; a derived field shadows a base
    /// field of the same name in place.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] when the class is not declared.
    pub fn all_fields(&self, class: &str) -> Result<Vec<&FieldDef>, SchemaError> {
        let mut chain = Vec::new();
        let mut cur = Some(self.class(class)?);
        while let Some(def) = cur {
            chain.push(def);
            cur = match &def.base {
                Some(base) => Some(self.class(base)?),
                None => None,
            };
        }
        let mut out: Vec<&FieldDef> = Vec::new();
        for def in chain.into_iter().rev() {
            for field in &def.own_fields {
                if let Some(slot) = out.iter_mut().find(|f| f.name == field.name) {
                    *slot = field;
                } else {
                    out.push(field);
                }
            }
        }
        Ok(out)
    }

    /// Resolves a field by name, searching the inheritance chain.
    ///
    /// Fails loudly rather than returning an option: a missing field here is
    /// always an authoring mistake (a typo in a policy key path, a stale
    /// handler), never a normal condition.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::NoSuchClass`] or [`SchemaError::UnknownField`].
    pub fn field(&self, class: &str, name: &str) -> Result<&FieldDef, SchemaError> {
        self.all_fields(class)?
            .into_iter()
            .find(|f| f.name == name)
            .ok_or_else(|| SchemaError::UnknownField {
                class: class.to_owned(),
                field: name.to_owned(),
            })
    }

    /// SHA-256 over the normalized schema text.
    #[must_use]
    pub fn schema_hash(&self) -> [u8; 32] {
        self.hash
    }

    /// The schema hash as lowercase hex.
    #[must_use]
    pub fn schema_hash_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.hash {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }
}

/// Normalizes schema text (drop comments and blank lines, trim trailing
/// whitespace) and hashes it. Formatting-only edits keep the hash stable;
/// any semantic edit changes it.
fn hash_schema_text(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for line in text.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim_start().is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }
        hasher.update(trimmed.as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().into()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
