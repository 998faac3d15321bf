//! Schema change actions.
//!
//! An [`Action`] is one atomic schema mutation. Each variant carries a
//! [`Changed`] payload: absence of `old` means the value was added,
//! absence of `new` means it was removed, and both present means it was
//! altered or renamed.

use serde::{Deserialize, Serialize};

use crate::table::{Column, Index, ModelTable};

/// A pair of optional before/after values describing one change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changed<T> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<T>,
}

impl<T> Changed<T> {
    #[must_use]
    pub fn added(new: T) -> Self {
        Self {
            old: None,
            new: Some(new),
        }
    }

    #[must_use]
    pub fn removed(old: T) -> Self {
        Self {
            old: Some(old),
            new: None,
        }
    }

    #[must_use]
    pub fn altered(old: T, new: T) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }
}

/// One atomic schema mutation.
///
/// Serialized with an `action_type` tag and a `table`, `field` or
/// `index` payload, which is the stable on-disk representation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action_type")]
pub enum Action {
    CreateTable { table: Changed<ModelTable> },
    DropTable { table: Changed<ModelTable> },
    RenameTable { table: Changed<ModelTable> },
    AddField { field: Changed<Column> },
    AlterField { field: Changed<Column> },
    RemoveField { field: Changed<Column> },
    AddIndex { index: Changed<Index> },
    DropIndex { index: Changed<Index> },
    RenameIndex { index: Changed<Index> },
}

impl Action {
    /// The serialized name of this action's type.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "CreateTable",
            Self::DropTable { .. } => "DropTable",
            Self::RenameTable { .. } => "RenameTable",
            Self::AddField { .. } => "AddField",
            Self::AlterField { .. } => "AlterField",
            Self::RemoveField { .. } => "RemoveField",
            Self::AddIndex { .. } => "AddIndex",
            Self::DropIndex { .. } => "DropIndex",
            Self::RenameIndex { .. } => "RenameIndex",
        }
    }

    /// Derives the filename slug fragment for this action.
    ///
    /// `table_name` is the name of the table the owning migration file
    /// targets; it only participates in the `drop_idx` form.
    #[must_use]
    pub fn slug(&self, table_name: &str) -> String {
        match self {
            Self::CreateTable { .. } => "create_table".to_string(),
            Self::DropTable { .. } => "drop_table".to_string(),
            Self::RenameTable {
                table:
                    Changed {
                        old: Some(old),
                        new: Some(new),
                    },
            } => format!("rename_table_{}_to_{}", old.table_name, new.table_name),
            Self::RenameTable { .. } => "rename_table".to_string(),
            Self::AddField {
                field: Changed { new: Some(new), .. },
            } => format!("add_field_{}", new.column),
            Self::AddField { .. } => "add_field".to_string(),
            Self::AlterField {
                field: Changed { new: Some(new), .. },
            } => format!("alter_field_{}", new.column),
            Self::AlterField { .. } => "alter_field".to_string(),
            Self::RemoveField {
                field: Changed { old: Some(old), .. },
            } => format!("remove_field_{}", old.column),
            Self::RemoveField { .. } => "remove_field".to_string(),
            Self::AddIndex {
                index: Changed { new: Some(new), .. },
            } => format!("add_idx_{}", new.name),
            Self::AddIndex { .. } => "add_idx".to_string(),
            Self::DropIndex {
                index: Changed { old: Some(old), .. },
            } => format!("drop_idx_{table_name}_on_{}", old.name),
            Self::DropIndex { .. } => "drop_idx".to_string(),
            Self::RenameIndex {
                index:
                    Changed {
                        old: Some(old),
                        new: Some(new),
                    },
            } => format!("rename_idx_{}_to_{}", old.name, new.name),
            Self::RenameIndex { .. } => "rename_idx".to_string(),
        }
    }
}

/// The raw, forward-compatible form an action is deserialized through.
///
/// Keeping the tag a plain string lets an unrecognized `action_type`
/// surface as a dedicated error instead of a generic parse failure.
#[derive(Debug, Deserialize)]
pub(crate) struct RawAction {
    pub(crate) action_type: String,
    #[serde(default)]
    pub(crate) table: Option<Changed<ModelTable>>,
    #[serde(default)]
    pub(crate) field: Option<Changed<Column>>,
    #[serde(default)]
    pub(crate) index: Option<Changed<Index>>,
}

#[derive(Debug)]
pub(crate) enum RawActionError {
    Unknown {
        action_type: String,
    },
    Malformed {
        action_type: &'static str,
        detail: &'static str,
    },
}

impl Action {
    pub(crate) fn from_raw(raw: RawAction) -> Result<Self, RawActionError> {
        fn payload<T>(
            payload: Option<Changed<T>>,
            action_type: &'static str,
            key: &'static str,
            want_old: bool,
            want_new: bool,
        ) -> Result<Changed<T>, RawActionError> {
            let changed = payload.ok_or(RawActionError::Malformed {
                action_type,
                detail: key,
            })?;
            if (want_old && changed.old.is_none()) || (want_new && changed.new.is_none()) {
                return Err(RawActionError::Malformed {
                    action_type,
                    detail: key,
                });
            }
            Ok(changed)
        }

        let action = match raw.action_type.as_str() {
            "CreateTable" => Self::CreateTable {
                table: payload(raw.table, "CreateTable", "table", false, true)?,
            },
            "DropTable" => Self::DropTable {
                table: payload(raw.table, "DropTable", "table", true, false)?,
            },
            "RenameTable" => Self::RenameTable {
                table: payload(raw.table, "RenameTable", "table", true, true)?,
            },
            "AddField" => Self::AddField {
                field: payload(raw.field, "AddField", "field", false, true)?,
            },
            "AlterField" => Self::AlterField {
                field: payload(raw.field, "AlterField", "field", true, true)?,
            },
            "RemoveField" => Self::RemoveField {
                field: payload(raw.field, "RemoveField", "field", true, false)?,
            },
            "AddIndex" => Self::AddIndex {
                index: payload(raw.index, "AddIndex", "index", false, true)?,
            },
            "DropIndex" => Self::DropIndex {
                index: payload(raw.index, "DropIndex", "index", true, false)?,
            },
            "RenameIndex" => Self::RenameIndex {
                index: payload(raw.index, "RenameIndex", "index", true, true)?,
            },
            _ => {
                return Err(RawActionError::Unknown {
                    action_type: raw.action_type,
                })
            }
        };
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FieldKind;

    #[test]
    fn slugs_follow_the_filename_grammar() {
        let create = Action::CreateTable {
            table: Changed::added(ModelTable::new("users", "test_sql.User")),
        };
        assert_eq!(create.slug("users"), "create_table");

        let add = Action::AddField {
            field: Changed::added(Column::new("first_name", FieldKind::String)),
        };
        assert_eq!(add.slug("users"), "add_field_first_name");

        let drop_idx = Action::DropIndex {
            index: Changed::removed(Index::new("idx_users_email", vec!["email".to_string()])),
        };
        assert_eq!(drop_idx.slug("users"), "drop_idx_users_on_idx_users_email");

        let rename_idx = Action::RenameIndex {
            index: Changed::altered(
                Index::new("idx_users_email", vec!["email".to_string()]),
                Index::new("ix_email", vec!["email".to_string()]),
            ),
        };
        assert_eq!(rename_idx.slug("users"), "rename_idx_idx_users_email_to_ix_email");
    }

    #[test]
    fn action_round_trips_through_raw_form() {
        let action = Action::AddField {
            field: Changed::added(Column::new("age", FieldKind::Int32)),
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action_type\":\"AddField\""));

        let raw: RawAction = serde_json::from_str(&json).unwrap();
        let parsed = Action::from_raw(raw).unwrap();
        assert_eq!(parsed, action);
    }

    #[test]
    fn unknown_action_types_are_rejected() {
        let raw: RawAction =
            serde_json::from_str(r#"{"action_type": "TruncateTable"}"#).unwrap();
        let err = Action::from_raw(raw).unwrap_err();
        assert!(matches!(err, RawActionError::Unknown { action_type } if action_type == "TruncateTable"));
    }

    #[test]
    fn actions_with_missing_payloads_are_rejected() {
        let raw: RawAction = serde_json::from_str(r#"{"action_type": "CreateTable"}"#).unwrap();
        assert!(matches!(
            Action::from_raw(raw),
            Err(RawActionError::Malformed { .. })
        ));

        let raw: RawAction = serde_json::from_str(
            r#"{"action_type": "RenameTable", "table": {"new": {"table_name": "t", "model_identity": "a.T", "columns": []}}}"#,
        )
        .unwrap();
        assert!(matches!(
            Action::from_raw(raw),
            Err(RawActionError::Malformed { .. })
        ));
    }
}
