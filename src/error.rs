//! Error types for schema compilation, policy validation, and merging.
//!
//! Three severities, kept as three separate types so callers can't confuse
//! them:
//!
//! - [`SchemaError`] — schema-authoring faults raised while compiling schema
//!   text. Fatal at process start; never reachable from a merge.
//! - [`PolicyError`] — merge-policy authoring faults raised by the invariant
//!   checker before any merge runs.
//! - [`MergeFault`] — internal-consistency failures raised *during* a merge.
//!   A fault means the whole merge must be discarded; it is never a user
//!   conflict (those are ordinary [`DirectConflict`] values in the result).
//!
//! [`DirectConflict`]: crate::merge::DirectConflict

use std::fmt;

// ---------------------------------------------------------------------------
// SchemaError
// ---------------------------------------------------------------------------

/// A fault in the schema text itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaError {
    /// An annotation token that the compiler does not recognize.
    UnknownAnnotation {
        /// The offending token, including the leading `@`.
        annotation: String,
        /// 1-based line number in the schema text.
        line: usize,
    },

    /// A field type references a class that is never declared.
    UnknownClass {
        /// The undeclared class name.
        class: String,
        /// `Class.field` that referenced it.
        referenced_by: String,
    },

    /// A field lookup named a field that does not exist on the class or any
    /// of its ancestors.
    UnknownField {
        /// The class the lookup started from.
        class: String,
        /// The missing field name.
        field: String,
    },

    /// A class name lookup failed.
    NoSuchClass {
        /// The missing class name.
        class: String,
    },

    /// The same class name was declared twice.
    DuplicateClass {
        /// The duplicated class name.
        class: String,
    },

    /// A line's indentation does not fit the two-space grid, or jumps more
    /// than one level deeper than its parent.
    BadIndent {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        detail: String,
    },

    /// A field declaration's type expression could not be parsed.
    BadTypeExpr {
        /// 1-based line number.
        line: usize,
        /// The unparsable text.
        text: String,
        /// What was wrong.
        detail: String,
    },

    /// A field line appeared before any class was declared.
    FieldOutsideClass {
        /// 1-based line number.
        line: usize,
    },
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownAnnotation { annotation, line } => {
                write!(f, "line {line}: unknown annotation {annotation}")
            }
            Self::UnknownClass {
                class,
                referenced_by,
            } => {
                write!(f, "{referenced_by} references undeclared class {class}")
            }
            Self::UnknownField { class, field } => {
                write!(f, "class {class} has no field named {field}")
            }
            Self::NoSuchClass { class } => write!(f, "no class named {class}"),
            Self::DuplicateClass { class } => write!(f, "class {class} declared twice"),
            Self::BadIndent { line, detail } => write!(f, "line {line}: bad indentation: {detail}"),
            Self::BadTypeExpr { line, text, detail } => {
                write!(f, "line {line}: cannot parse type {text:?}: {detail}")
            }
            Self::FieldOutsideClass { line } => {
                write!(f, "line {line}: field declared outside any class")
            }
        }
    }
}

impl std::error::Error for SchemaError {}

// ---------------------------------------------------------------------------
// PolicyError
// ---------------------------------------------------------------------------

/// A fault in the hand-authored merge policy table, detected by the
/// invariant checker before any merge runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// A rename/merge key path steps through a `@WeakRef` field.
    ///
    /// A key that dereferences a non-owning reference could select a value
    /// belonging to an object with a different owner, silently coupling
    /// unrelated subtrees.
    WeakRefKey {
        /// The class owning the list field.
        class: String,
        /// The list field whose key is invalid.
        field: String,
        /// The full declared key path.
        key_path: String,
        /// The path segment that is a weak reference.
        segment: String,
    },

    /// A key path segment could not be resolved through the metadata.
    KeyPathUnresolvable {
        /// The class owning the list field.
        class: String,
        /// The list field.
        field: String,
        /// The segment that failed to resolve, or a description of why.
        detail: String,
    },

    /// A policy row names a class the schema does not declare, or an
    /// abstract class (policies are authored per concrete class).
    UnknownPolicyClass {
        /// The offending class name.
        class: String,
    },

    /// A policy row names a field the class does not have.
    UnknownPolicyField {
        /// The class name.
        class: String,
        /// The offending field name.
        field: String,
    },

    /// A concrete class field has no policy row at all.
    MissingPolicy {
        /// The class name.
        class: String,
        /// The uncovered field name.
        field: String,
    },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WeakRefKey {
                class,
                field,
                key_path,
                segment,
            } => write!(
                f,
                "merge key for {class}.{field} ({key_path:?}) traverses weak-reference \
                 field {segment:?}; keys must never cross non-owning references"
            ),
            Self::KeyPathUnresolvable {
                class,
                field,
                detail,
            } => write!(f, "merge key for {class}.{field} cannot be resolved: {detail}"),
            Self::UnknownPolicyClass { class } => {
                write!(f, "policy table names unknown or abstract class {class}")
            }
            Self::UnknownPolicyField { class, field } => {
                write!(f, "policy table names unknown field {class}.{field}")
            }
            Self::MissingPolicy { class, field } => {
                write!(f, "no merge policy declared for {class}.{field}")
            }
        }
    }
}

impl std::error::Error for PolicyError {}

// ---------------------------------------------------------------------------
// MergeFault
// ---------------------------------------------------------------------------

/// An internal-consistency failure during a merge call.
///
/// Faults mean "this should never happen" — a programming error or corrupted
/// input, as opposed to a [`DirectConflict`], which means "a human must
/// choose". The caller must treat the whole merge as failed.
///
/// [`DirectConflict`]: crate::merge::DirectConflict
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MergeFault {
    /// An `unexpected`-policy field actually diverged between branches.
    UnexpectedDivergence {
        /// The class owning the field.
        class: String,
        /// The diverged field.
        field: String,
        /// Conflict-group path for locating the divergence.
        path: String,
    },

    /// The pick map references a conflict group that never surfaced.
    UnknownPickGroup {
        /// The unmatched group key.
        group: String,
    },

    /// The three root nodes do not share class and identity.
    RootMismatch {
        /// What differed.
        detail: String,
    },

    /// Two documents disagree on the class of the same identity.
    ClassMismatch {
        /// Expected class name.
        expected: String,
        /// Actual class name.
        got: String,
        /// The identity in question.
        iid: u64,
    },

    /// A reference pointed at an identity missing from its document.
    MissingInstance {
        /// The dangling identity.
        iid: u64,
    },

    /// No policy row exists for a class/field encountered mid-merge.
    MissingPolicy {
        /// The class name.
        class: String,
        /// The field name.
        field: String,
    },

    /// A merge key could not be computed for a list element.
    BadKeyValue {
        /// The class owning the list field.
        class: String,
        /// The list field.
        field: String,
        /// Why the key was uncomputable.
        detail: String,
    },

    /// The schema metadata rejected a lookup mid-merge (corrupt document).
    Schema(SchemaError),

    /// The merged document failed its tree invariant after the merge.
    BrokenInvariant {
        /// Description of the violation.
        detail: String,
    },
}

impl fmt::Display for MergeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedDivergence { class, field, path } => write!(
                f,
                "field {class}.{field} (at {path}) diverged between branches but is \
                 declared divergence-impossible"
            ),
            Self::UnknownPickGroup { group } => {
                write!(f, "pick map references unknown conflict group {group:?}")
            }
            Self::RootMismatch { detail } => write!(f, "root nodes do not match: {detail}"),
            Self::ClassMismatch { expected, got, iid } => {
                write!(f, "identity {iid} is {got} but expected {expected}")
            }
            Self::MissingInstance { iid } => write!(f, "identity {iid} not found in document"),
            Self::MissingPolicy { class, field } => {
                write!(f, "no merge policy for {class}.{field}")
            }
            Self::BadKeyValue {
                class,
                field,
                detail,
            } => write!(f, "cannot compute merge key for {class}.{field}: {detail}"),
            Self::Schema(err) => write!(f, "schema metadata fault during merge: {err}"),
            Self::BrokenInvariant { detail } => {
                write!(f, "merged document violates tree invariant: {detail}")
            }
        }
    }
}

impl std::error::Error for MergeFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SchemaError> for MergeFault {
    fn from(err: SchemaError) -> Self {
        Self::Schema(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
