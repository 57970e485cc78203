//! Deterministic Rust source generation from compiled schema metadata.
//!
//! [`generate`] emits one self-contained module of plain Rust: a closed
//! `ClassTag` enum over every concrete class, a tag-name round trip, and for
//! every class a constant listing its concrete members (itself plus strict
//! subclasses), an `is_known_*` predicate, and an `assert_known_*` check
//! returning a typed error that names the expected classes.
//!
//! The tag enum is closed on purpose: matching on it is exhaustive, so
//! adding a class to the schema breaks every match that has not considered
//! it yet, at compile time.
//!
//! # Determinism
//!
//! Output depends only on the schema content. Classes are emitted in name
//! order and the header carries the schema hash, so identical schema text
//! yields byte-identical output and a regenerated file diffs clean.

use std::fmt::Write as _;

use crate::error::SchemaError;
use crate::schema::meta::SchemaMeta;

/// Generates Rust source for the class-tag module.
///
/// # Errors
///
/// Returns a [`SchemaError`] only when the metadata is internally
/// inconsistent (a subclass link to an undeclared class), which
/// [`SchemaMeta::compile`](SchemaMeta::compile) already prevents.
pub fn generate(meta: &SchemaMeta) -> Result<String, SchemaError> {
    let mut out = String::new();
    let concrete: Vec<&str> = meta.concrete_classes().collect();

    let _ = writeln!(out, "// @generated from schema {}", meta.schema_hash_hex());
    let _ = writeln!(out, "// Do not edit; regenerate instead.");
    let _ = writeln!(out);
    let _ = writeln!(out, "/// Tag of a concrete node class.");
    let _ = writeln!(
        out,
        "#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]"
    );
    let _ = writeln!(out, "pub enum ClassTag {{");
    for name in &concrete {
        let _ = writeln!(out, "    {name},");
    }
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    let _ = writeln!(out, "impl ClassTag {{");
    let _ = writeln!(out, "    /// The class name this tag stands for.");
    let _ = writeln!(out, "    #[must_use]");
    let _ = writeln!(out, "    pub const fn type_tag(self) -> &'static str {{");
    let _ = writeln!(out, "        match self {{");
    for name in &concrete {
        let _ = writeln!(out, "            Self::{name} => \"{name}\",");
    }
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out);
    let _ = writeln!(out, "    /// Parses a class name back into its tag.");
    let _ = writeln!(out, "    #[must_use]");
    let _ = writeln!(
        out,
        "    pub fn from_type_tag(name: &str) -> Option<Self> {{"
    );
    let _ = writeln!(out, "        match name {{");
    for name in &concrete {
        let _ = writeln!(out, "            \"{name}\" => Some(Self::{name}),");
    }
    let _ = writeln!(out, "            _ => None,");
    let _ = writeln!(out, "        }}");
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);

    let _ = writeln!(out, "/// A tag that failed an `assert_known_*` check.");
    let _ = writeln!(out, "#[derive(Clone, Debug, PartialEq, Eq)]");
    let _ = writeln!(out, "pub struct WrongClassTag {{");
    let _ = writeln!(out, "    pub expected: &'static [ClassTag],");
    let _ = writeln!(out, "    pub got: ClassTag,");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "impl std::fmt::Display for WrongClassTag {{");
    let _ = writeln!(
        out,
        "    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {{"
    );
    let _ = writeln!(
        out,
        "        write!(f, \"expected one of {{:?}}, got {{:?}}\", self.expected, self.got)"
    );
    let _ = writeln!(out, "    }}");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "impl std::error::Error for WrongClassTag {{}}");

    for name in meta.classes() {
        let mut members: Vec<&str> = Vec::new();
        if !meta.is_abstract(name)? {
            members.push(name);
        }
        for sub in meta.strict_subclasses(name)? {
            if !meta.is_abstract(sub)? {
                members.push(sub);
            }
        }
        members.sort_unstable();

        let upper = upper_snake(name);
        let lower = lower_snake(name);

        let _ = writeln!(out);
        let _ = writeln!(out, "/// Concrete classes assignable to `{name}`.");
        let _ = writeln!(out, "pub const KNOWN_{upper}: &[ClassTag] = &[");
        for member in &members {
            let _ = writeln!(out, "    ClassTag::{member},");
        }
        let _ = writeln!(out, "];");
        let _ = writeln!(out);
        let _ = writeln!(out, "#[must_use]");
        let _ = writeln!(out, "pub fn is_known_{lower}(tag: ClassTag) -> bool {{");
        let _ = writeln!(out, "    KNOWN_{upper}.contains(&tag)");
        let _ = writeln!(out, "}}");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "/// # Errors\n///\n/// Returns the offending tag when it is not a `{name}`."
        );
        let _ = writeln!(
            out,
            "pub fn assert_known_{lower}(tag: ClassTag) -> Result<(), WrongClassTag> {{"
        );
        let _ = writeln!(out, "    if is_known_{lower}(tag) {{");
        let _ = writeln!(out, "        Ok(())");
        let _ = writeln!(out, "    }} else {{");
        let _ = writeln!(
            out,
            "        Err(WrongClassTag {{ expected: KNOWN_{upper}, got: tag }})"
        );
        let _ = writeln!(out, "    }}");
        let _ = writeln!(out, "}}");
    }

    Ok(out)
}

/// `TplNode` → `TPL_NODE`.
fn upper_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

/// `TplNode` → `tpl_node`.
fn lower_snake(name: &str) -> String {
    upper_snake(name).to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
