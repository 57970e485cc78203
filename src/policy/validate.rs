//! Startup validation of a policy table against its schema.
//!
//! Runs once, before any merge. Two kinds of authoring mistakes are caught
//! here so they can never surface mid-merge:
//!
//! - Shape mistakes: rows naming unknown or abstract classes, rows naming
//!   fields a class does not have, and concrete-class fields with no row
//!   at all.
//! - Key paths that cross weak references. A merge key derived through a
//!   non-owning reference could read state belonging to a different owner,
//!   silently coupling unrelated subtrees; such a path is rejected at the
//!   offending segment no matter how plausible it looks.

use crate::error::PolicyError;
use crate::policy::{FieldPolicy, PolicyTable, Reconcile};
use crate::schema::meta::SchemaMeta;

/// Validates `table` against `meta`.
///
/// # Errors
///
/// Returns the first [`PolicyError`] found, in deterministic (class, field)
/// order.
pub fn check(meta: &SchemaMeta, table: &PolicyTable) -> Result<(), PolicyError> {
    for (class, field, policy) in table.rows() {
        let Ok(concrete) = meta.is_abstract(class).map(|a| !a) else {
            return Err(PolicyError::UnknownPolicyClass {
                class: class.to_owned(),
            });
        };
        if !concrete {
            return Err(PolicyError::UnknownPolicyClass {
                class: class.to_owned(),
            });
        }
        let Ok(def) = meta.field(class, field) else {
            return Err(PolicyError::UnknownPolicyField {
                class: class.to_owned(),
                field: field.to_owned(),
            });
        };

        let key_path = match policy {
            FieldPolicy::Array(ap) => match ap.reconcile {
                Reconcile::Rename { name_key, .. } => Some(name_key),
                Reconcile::ByKeyPath { path } => Some(path),
                Reconcile::ByKeyFn { .. } | Reconcile::ByIdentity => None,
            },
            _ => None,
        };
        if let Some(path) = key_path {
            check_key_path(meta, class, field, &def.ty, path)?;
        }
    }

    for class in meta.concrete_classes() {
        let fields = meta
            .all_fields(class)
            .map_err(|_| PolicyError::UnknownPolicyClass {
                class: class.to_owned(),
            })?;
        for field in fields {
            if field.transient {
                continue;
            }
            if table.policy_for(class, &field.name).is_err() {
                return Err(PolicyError::MissingPolicy {
                    class: class.to_owned(),
                    field: field.name.clone(),
                });
            }
        }
    }

    for (class, field) in table.code_fields() {
        if meta.field(class, field).is_err() {
            return Err(PolicyError::UnknownPolicyField {
                class: class.clone(),
                field: field.clone(),
            });
        }
    }

    Ok(())
}

/// Walks a declared key path one field at a time from the list's element
/// classes, rejecting any step through a weak reference.
fn check_key_path(
    meta: &SchemaMeta,
    class: &str,
    field: &str,
    list_ty: &crate::schema::types::Ty,
    path: &str,
) -> Result<(), PolicyError> {
    let unresolvable = |detail: String| PolicyError::KeyPathUnresolvable {
        class: class.to_owned(),
        field: field.to_owned(),
        detail,
    };

    let mut classes: Vec<String> = list_ty
        .core_instances()
        .into_iter()
        .map(str::to_owned)
        .collect();
    if classes.is_empty() {
        return Err(unresolvable(format!(
            "list elements of type {list_ty} are not instances"
        )));
    }

    let segs: Vec<&str> = path.split('.').collect();
    for (i, seg) in segs.iter().enumerate() {
        let mut next: Vec<String> = Vec::new();
        for cur in &classes {
            let def = meta
                .field(cur, seg)
                .map_err(|err| unresolvable(err.to_string()))?;
            if def.weak_ref {
                return Err(PolicyError::WeakRefKey {
                    class: class.to_owned(),
                    field: field.to_owned(),
                    key_path: path.to_owned(),
                    segment: (*seg).to_owned(),
                });
            }
            next.extend(def.ty.core_instances().into_iter().map(str::to_owned));
        }
        let is_last = i + 1 == segs.len();
        if !is_last && next.is_empty() {
            return Err(unresolvable(format!(
                "segment {seg:?} is a scalar but the path continues"
            )));
        }
        next.sort_unstable();
        next.dedup();
        classes = next;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{ArrayType, site_policy_table};
    use crate::schema::site::site_meta;

    #[test]
    fn production_table_validates_clean() {
        check(&site_meta().unwrap(), &site_policy_table()).unwrap();
    }

    const SMALL: &str = "\
Root (concrete)
  groups: [Group]

Group (concrete)
  name: String
  @WeakRef owner: Owner?
  tag: Tag

Owner (concrete)
  name: String

Tag (concrete)
  label: String
";

    fn small_meta() -> SchemaMeta {
        SchemaMeta::compile(SMALL).unwrap()
    }

    fn small_rows() -> PolicyTable {
        PolicyTable::new()
            .row("Group", "name", FieldPolicy::Contents)
            .row("Group", "owner", FieldPolicy::Harmless)
            .row("Group", "tag", FieldPolicy::Contents)
            .row("Owner", "name", FieldPolicy::Contents)
            .row("Tag", "label", FieldPolicy::Contents)
    }

    #[test]
    fn weak_ref_key_path_rejected_at_its_segment() {
        let table = small_rows().row(
            "Root",
            "groups",
            FieldPolicy::keyed_list(ArrayType::Unordered, "owner.name"),
        );
        let err = check(&small_meta(), &table).unwrap_err();
        assert_eq!(
            err,
            PolicyError::WeakRefKey {
                class: "Root".to_owned(),
                field: "groups".to_owned(),
                key_path: "owner.name".to_owned(),
                segment: "owner".to_owned(),
            }
        );
    }

    #[test]
    fn strong_key_path_accepted() {
        let table = small_rows().row(
            "Root",
            "groups",
            FieldPolicy::keyed_list(ArrayType::Unordered, "tag.label"),
        );
        check(&small_meta(), &table).unwrap();
    }

    #[test]
    fn scalar_mid_path_rejected() {
        let table = small_rows().row(
            "Root",
            "groups",
            FieldPolicy::keyed_list(ArrayType::Unordered, "name.inner"),
        );
        assert!(matches!(
            check(&small_meta(), &table).unwrap_err(),
            PolicyError::KeyPathUnresolvable { .. }
        ));
    }

    #[test]
    fn missing_row_reported() {
        let table = small_rows().row(
            "Root",
            "groups",
            FieldPolicy::rename_list(ArrayType::Unordered, "name"),
        );
        // Drop one required row.
        let incomplete = PolicyTable::new().row("Root", "groups", table.policy_for("Root", "groups").unwrap());
        let err = check(&small_meta(), &incomplete).unwrap_err();
        assert!(matches!(err, PolicyError::MissingPolicy { .. }));
    }

    #[test]
    fn unknown_class_and_field_rows_rejected() {
        let err = check(
            &small_meta(),
            &small_rows()
                .row("Root", "groups", FieldPolicy::Contents)
                .row("Ghost", "x", FieldPolicy::Contents),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownPolicyClass {
                class: "Ghost".to_owned()
            }
        );

        let err = check(
            &small_meta(),
            &small_rows()
                .row("Root", "groups", FieldPolicy::Contents)
                .row("Tag", "ghost", FieldPolicy::Contents),
        )
        .unwrap_err();
        assert_eq!(
            err,
            PolicyError::UnknownPolicyField {
                class: "Tag".to_owned(),
                field: "ghost".to_owned(),
            }
        );
    }
}
