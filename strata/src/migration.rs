//! The migration file model.
//!
//! A migration file is an ordered, versioned document describing the
//! delta from the previous known state of one model to the next. On
//! disk it lives at `root/<app>/<model>/NNNN_<slug>.mig`; `app_name`,
//! `model_name`, `order` and `name` are not part of the body and are
//! reconstructed from the path on read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::action::Action;
use crate::error::Error;
use crate::table::ModelTable;

/// The file suffix of migration files.
pub const MIGRATION_SUFFIX: &str = ".mig";

/// A reference to another migration file that must be applied first.
///
/// Serialized as `<app>:<model>:<file_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Dependency {
    pub app: String,
    pub model: String,
    pub file: String,
}

impl Dependency {
    #[must_use]
    pub fn new(
        app: impl Into<String>,
        model: impl Into<String>,
        file: impl Into<String>,
    ) -> Self {
        Self {
            app: app.into(),
            model: model.into(),
            file: file.into(),
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.app, self.model, self.file)
    }
}

/// The error returned when a dependency reference does not follow the
/// `app:model:file` form.
#[derive(Debug, Clone, Error)]
#[error("invalid dependency reference {0:?}, expected app:model:file")]
pub struct InvalidDependency(String);

impl FromStr for Dependency {
    type Err = InvalidDependency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(app), Some(model), Some(file))
                if !app.is_empty() && !model.is_empty() && !file.is_empty() =>
            {
                Ok(Self::new(app, model, file))
            }
            _ => Err(InvalidDependency(s.to_string())),
        }
    }
}

impl TryFrom<String> for Dependency {
    type Error = InvalidDependency;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dependency> for String {
    fn from(value: Dependency) -> Self {
        value.to_string()
    }
}

/// A single migration file.
///
/// The persistent identity of a migration is
/// `(app_name, model_name, order, name)`; `table` is the target state
/// of the model after this file is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationFile {
    pub app_name: String,
    pub model_name: String,
    pub name: String,
    pub order: u32,
    pub table: ModelTable,
    pub actions: Vec<Action>,
    pub dependencies: Vec<Dependency>,
}

impl MigrationFile {
    /// The file name this migration is stored under, e.g.
    /// `0001_create_table.mig`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("{:04}_{}{MIGRATION_SUFFIX}", self.order, self.name)
    }

    /// The node key used by the dependency resolver, in the same
    /// `app:model:file` form as serialized dependencies.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}:{}:{}", self.app_name, self.model_name, self.file_name())
    }

    /// Parses `order` and `name` out of a `NNNN_slug.mig` basename.
    pub(crate) fn parse_file_name(file_name: &str) -> Result<(u32, String), Error> {
        let invalid = || Error::InvalidFilename {
            name: file_name.to_string(),
        };

        let stem = file_name.strip_suffix(MIGRATION_SUFFIX).ok_or_else(invalid)?;
        let (order, name) = stem.split_once('_').ok_or_else(invalid)?;
        if order.is_empty() || !order.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if name.is_empty() || name.contains('.') {
            return Err(invalid());
        }
        let order: u32 = order.parse().map_err(|_| invalid())?;
        Ok((order, name.to_string()))
    }
}

/// Derives the migration file slug from its action list.
#[must_use]
pub(crate) fn slug(actions: &[Action], table_name: &str) -> String {
    let Some(first) = actions.first() else {
        return "auto_generated".to_string();
    };
    let mut slug = first.slug(table_name);
    if actions.len() > 1 {
        slug.push_str(&format!("_and_{}_more", actions.len() - 1));
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Changed;
    use crate::table::{Column, FieldKind};

    #[test]
    fn dependency_round_trips_as_string() {
        let dep = Dependency::new("test_sql", "User", "0001_create_table.mig");
        assert_eq!(dep.to_string(), "test_sql:User:0001_create_table.mig");
        assert_eq!(
            "test_sql:User:0001_create_table.mig"
                .parse::<Dependency>()
                .unwrap(),
            dep
        );
        assert!("not-a-dependency".parse::<Dependency>().is_err());
        assert!("a:b:".parse::<Dependency>().is_err());
    }

    #[test]
    fn file_names_are_zero_padded() {
        let migration = MigrationFile {
            app_name: "test_sql".to_string(),
            model_name: "User".to_string(),
            name: "create_table".to_string(),
            order: 1,
            table: ModelTable::new("users", "test_sql.User"),
            actions: Vec::new(),
            dependencies: Vec::new(),
        };
        assert_eq!(migration.file_name(), "0001_create_table.mig");
        assert_eq!(migration.key(), "test_sql:User:0001_create_table.mig");
    }

    #[test]
    fn parse_file_name_accepts_the_grammar() {
        assert_eq!(
            MigrationFile::parse_file_name("0001_create_table.mig").unwrap(),
            (1, "create_table".to_string())
        );
        assert_eq!(
            MigrationFile::parse_file_name("12_add_field_age.mig").unwrap(),
            (12, "add_field_age".to_string())
        );
    }

    #[test]
    fn parse_file_name_rejects_everything_else() {
        for name in [
            "create_table.mig",
            "0001.mig",
            "0001_.mig",
            "_x.mig",
            "0001_create.table.mig",
            "0001_create_table",
            "0001_create_table.sql",
            "x001_create_table.mig",
        ] {
            assert!(
                MigrationFile::parse_file_name(name).is_err(),
                "expected {name:?} to be rejected"
            );
        }
    }

    #[test]
    fn slug_describes_the_first_action() {
        assert_eq!(slug(&[], "users"), "auto_generated");

        let add_first = Action::AddField {
            field: Changed::added(Column::new("first_name", FieldKind::String)),
        };
        let add_last = Action::AddField {
            field: Changed::added(Column::new("last_name", FieldKind::String)),
        };
        assert_eq!(
            slug(&[add_first.clone()], "users"),
            "add_field_first_name"
        );
        assert_eq!(
            slug(&[add_first, add_last], "users"),
            "add_field_first_name_and_1_more"
        );
    }
}
