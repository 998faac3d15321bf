//! The durable migration file store.
//!
//! Migration files live under `root/<app>/<model>/NNNN_<slug>.mig` as
//! pretty-printed JSON. The body holds only `dependencies`, `table` and
//! `actions`; everything else is reconstructed from the path. Reads are
//! pure, writes refuse to overwrite.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::action::{Action, RawAction, RawActionError};
use crate::error::{Error, Result};
use crate::migration::{Dependency, MigrationFile, MIGRATION_SUFFIX};
use crate::registry::Registry;
use crate::table::ModelTable;

/// The complete, globally ordered migration history loaded from disk.
///
/// Files are sorted by `order` ascending; at equal orders, the
/// app/model/file name decides, so the order is stable across runs and
/// platforms.
#[derive(Debug, Clone, Default)]
pub struct History {
    files: Vec<MigrationFile>,
}

impl History {
    #[must_use]
    pub(crate) fn new(files: Vec<MigrationFile>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[MigrationFile] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The last migration recorded for a model, if any.
    #[must_use]
    pub fn last(&self, app_name: &str, model_name: &str) -> Option<&MigrationFile> {
        self.files
            .iter()
            .rev()
            .find(|file| file.app_name == app_name && file.model_name == model_name)
    }

    /// Every `(app, model)` pair present in the history, in history
    /// order and without duplicates.
    #[must_use]
    pub fn model_keys(&self) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = Vec::new();
        for file in &self.files {
            let key = (file.app_name.clone(), file.model_name.clone());
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

#[derive(Serialize)]
struct WriteBody<'a> {
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    dependencies: &'a [Dependency],
    table: &'a ModelTable,
    actions: &'a [Action],
}

#[derive(Deserialize)]
struct ReadBody {
    #[serde(default)]
    dependencies: Vec<Dependency>,
    table: ModelTable,
    actions: Vec<RawAction>,
}

/// A migration store rooted at a directory.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    root: PathBuf,
}

impl MigrationStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory if it does not exist yet.
    pub fn ensure_root(&self) -> Result<()> {
        create_dir_all(&self.root)
    }

    /// Serializes a migration to `root/<app>/<model>/NNNN_<slug>.mig`.
    ///
    /// Parent directories are created as needed. Fails with
    /// [`Error::AlreadyExists`] if the target path exists; an existing
    /// file is never overwritten.
    pub fn write(&self, migration: &MigrationFile) -> Result<PathBuf> {
        let dir = self
            .root
            .join(&migration.app_name)
            .join(&migration.model_name);
        create_dir_all(&dir)?;

        let path = dir.join(migration.file_name());
        let body = WriteBody {
            dependencies: &migration.dependencies,
            table: &migration.table,
            actions: &migration.actions,
        };
        let mut content =
            serde_json::to_string_pretty(&body).map_err(|source| Error::Serialize {
                path: path.clone(),
                source,
            })?;
        content.push('\n');

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        use std::io::Write;
        let mut file = options.open(&path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AlreadyExists {
                Error::AlreadyExists { path: path.clone() }
            } else {
                Error::Write {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        file.write_all(content.as_bytes())
            .map_err(|source| Error::Write {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }

    /// Loads the complete migration history.
    ///
    /// Walks `root/*/*/*.mig`, ignoring stray files and non-directory
    /// entries. An app directory that is not part of `registry` is a
    /// hard error: it means the store contains history for an app the
    /// process no longer knows about.
    pub fn load(&self, registry: &Registry) -> Result<History> {
        let mut files = Vec::new();
        if !self.root.is_dir() {
            return Ok(History::new(files));
        }

        for app_dir in sorted_entries(&self.root)? {
            if !app_dir.is_dir() {
                continue;
            }
            let app_name = file_name_string(&app_dir);
            if !registry.contains_app(&app_name) {
                return Err(Error::StaleAppDirectory { app: app_name });
            }

            for model_dir in sorted_entries(&app_dir)? {
                if !model_dir.is_dir() {
                    continue;
                }
                let model_name = file_name_string(&model_dir);

                for path in sorted_entries(&model_dir)? {
                    if !path.is_file() || !file_name_string(&path).ends_with(MIGRATION_SUFFIX)
                    {
                        continue;
                    }
                    files.push(read_migration(&path, &app_name, &model_name)?);
                }
            }
        }

        // Stable, so the app/model/file name collection order above
        // decides ties between equal orders.
        files.sort_by_key(|file| file.order);

        Ok(History::new(files))
    }
}

fn read_migration(path: &Path, app_name: &str, model_name: &str) -> Result<MigrationFile> {
    let file_name = file_name_string(path);
    let (order, name) = MigrationFile::parse_file_name(&file_name)?;

    let content = fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let body: ReadBody = serde_json::from_str(&content).map_err(|source| Error::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut actions = Vec::with_capacity(body.actions.len());
    for raw in body.actions {
        let action = Action::from_raw(raw).map_err(|err| match err {
            RawActionError::Unknown { action_type } => Error::UnknownAction {
                file: path.display().to_string(),
                action_type,
            },
            RawActionError::Malformed {
                action_type,
                detail,
            } => Error::MalformedAction {
                file: path.display().to_string(),
                action_type: action_type.to_string(),
                detail: format!("missing or incomplete `{detail}` payload"),
            },
        })?;
        actions.push(action);
    }

    Ok(MigrationFile {
        app_name: app_name.to_string(),
        model_name: model_name.to_string(),
        name,
        order,
        table: body.table,
        actions,
        dependencies: body.dependencies,
    })
}

fn create_dir_all(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(path).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = fs::read_dir(dir).map_err(|source| Error::Read {
        path: dir.to_path_buf(),
        source,
    })?;
    let mut entries = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| Error::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

fn file_name_string(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Changed;
    use crate::registry::AppDef;
    use crate::table::{Column, FieldKind};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_app(AppDef::new("test_sql", vec![]));
        registry
    }

    fn user_table() -> ModelTable {
        let mut table = ModelTable::new("users", "test_sql.User");
        table.columns = vec![
            Column::new("ID", FieldKind::Int64)
                .db_column("id")
                .primary()
                .auto(),
            Column::new("Email", FieldKind::String)
                .db_column("email")
                .max_length(255),
        ];
        table
    }

    fn create_user_migration() -> MigrationFile {
        let table = user_table();
        MigrationFile {
            app_name: "test_sql".to_string(),
            model_name: "User".to_string(),
            name: "create_table".to_string(),
            order: 1,
            actions: vec![Action::CreateTable {
                table: Changed::added(table.clone()),
            }],
            dependencies: vec![Dependency::new(
                "test_sql",
                "Group",
                "0001_create_table.mig",
            )],
            table,
        }
    }

    #[test]
    fn migrations_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let mut registry = registry();
        registry.register_app(AppDef::new("test_sql", vec![]));

        let migration = create_user_migration();
        let path = store.write(&migration).unwrap();
        assert!(path.ends_with("test_sql/User/0001_create_table.mig"));

        let history = store.load(&registry).unwrap();
        assert_eq!(history.files(), &[migration]);
    }

    #[test]
    fn empty_dependencies_are_omitted_from_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());

        let mut migration = create_user_migration();
        migration.dependencies.clear();
        let path = store.write(&migration).unwrap();

        let content = fs::read_to_string(path).unwrap();
        assert!(!content.contains("dependencies"));
        assert!(content.contains("\"action_type\": \"CreateTable\""));
    }

    #[test]
    fn writes_refuse_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());

        let migration = create_user_migration();
        store.write(&migration).unwrap();
        let err = store.write(&migration).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[test]
    fn stray_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        store.write(&create_user_migration()).unwrap();

        fs::write(dir.path().join("README"), "not an app").unwrap();
        fs::write(dir.path().join("test_sql").join("notes.txt"), "hi").unwrap();
        fs::write(
            dir.path().join("test_sql").join("User").join("draft.json"),
            "{}",
        )
        .unwrap();

        let history = store.load(&registry()).unwrap();
        assert_eq!(history.files().len(), 1);
    }

    #[test]
    fn invalid_file_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let model_dir = dir.path().join("test_sql").join("User");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(model_dir.join("initial.mig"), "{}").unwrap();

        let err = store.load(&registry()).unwrap_err();
        assert!(matches!(err, Error::InvalidFilename { .. }));
    }

    #[test]
    fn stale_app_directories_are_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        fs::create_dir_all(dir.path().join("legacy_app")).unwrap();

        let err = store.load(&registry()).unwrap_err();
        assert!(matches!(err, Error::StaleAppDirectory { app } if app == "legacy_app"));
    }

    #[test]
    fn unknown_actions_surface_as_their_own_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let model_dir = dir.path().join("test_sql").join("User");
        fs::create_dir_all(&model_dir).unwrap();
        fs::write(
            model_dir.join("0001_auto_generated.mig"),
            r#"{
  "table": {"table_name": "users", "model_identity": "test_sql.User", "columns": []},
  "actions": [{"action_type": "TruncateTable"}]
}"#,
        )
        .unwrap();

        let err = store.load(&registry()).unwrap_err();
        assert!(matches!(err, Error::UnknownAction { action_type, .. } if action_type == "TruncateTable"));
    }

    #[test]
    fn history_is_ordered_and_answers_last() {
        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());

        let first = create_user_migration();
        let mut second = create_user_migration();
        second.order = 2;
        second.name = "add_field_age".to_string();
        second.actions = vec![Action::AddField {
            field: Changed::added(Column::new("Age", FieldKind::Int32).db_column("age")),
        }];
        second.dependencies.clear();
        store.write(&second).unwrap();
        store.write(&first).unwrap();

        let history = store.load(&registry()).unwrap();
        let names: Vec<_> = history.files().iter().map(MigrationFile::file_name).collect();
        assert_eq!(
            names,
            vec!["0001_create_table.mig", "0002_add_field_age.mig"]
        );
        assert_eq!(
            history.last("test_sql", "User").map(|m| m.order),
            Some(2)
        );
        assert!(history.last("test_sql", "Group").is_none());
        assert_eq!(
            history.model_keys(),
            vec![("test_sql".to_string(), "User".to_string())]
        );
    }
}
