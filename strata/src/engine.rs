//! The migration engine.
//!
//! Orchestrates the whole pipeline: build the desired table snapshots,
//! diff them against the recorded history, write new migration files,
//! and apply unapplied migrations through a schema editor in dependency
//! order.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use crate::action::Action;
use crate::diff::diff;
use crate::editor::{EditorError, SchemaEditor};
use crate::error::{Error, Result};
use crate::log::{ActionEvent, ActionLog, ActionPhase, TracingActionLog};
use crate::migration::{self, Dependency, MigrationFile};
use crate::registry::Registry;
use crate::sorter::MigrationSorter;
use crate::store::MigrationStore;

/// A migration engine bound to a registry, a file store and a schema
/// editor.
///
/// All operations run synchronously on the caller's task; the only
/// suspension points are the editor's database calls.
pub struct MigrationEngine {
    registry: Registry,
    store: MigrationStore,
    editor: Box<dyn SchemaEditor>,
    log: Option<Box<dyn ActionLog>>,
}

impl std::fmt::Debug for MigrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationEngine")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl MigrationEngine {
    #[must_use]
    pub fn new(
        registry: Registry,
        store: MigrationStore,
        editor: Box<dyn SchemaEditor>,
    ) -> Self {
        Self {
            registry,
            store,
            editor,
            log: Some(Box::new(TracingActionLog)),
        }
    }

    /// Replaces the action log sink. `None` disables action logging;
    /// that is not an error.
    #[must_use]
    pub fn with_action_log(mut self, log: Option<Box<dyn ActionLog>>) -> Self {
        self.log = log;
        self
    }

    /// Returns the identities of all models with pending schema
    /// changes, without writing anything.
    ///
    /// # Errors
    ///
    /// Fails for the same reasons as [`MigrationEngine::make_migrations`],
    /// short of writing files.
    pub async fn needs_to_migrate(&self) -> Result<Vec<String>> {
        let pending = self.plan().await?;
        Ok(pending
            .iter()
            .map(|migration| format!("{}.{}", migration.app_name, migration.model_name))
            .collect())
    }

    /// Generates and writes a migration file for every registered model
    /// whose current shape differs from its last recorded state.
    ///
    /// Re-running without model changes writes nothing. If a write
    /// fails the operation aborts; files written so far stay on disk,
    /// and re-running is safe because filenames are deterministic and
    /// never overwritten.
    ///
    /// # Errors
    ///
    /// Fails on editor setup problems, an unreadable or stale store, an
    /// invalid model declaration, or a failed write.
    pub async fn make_migrations(&self) -> Result<()> {
        let pending = self.plan().await?;
        if pending.is_empty() {
            info!("no schema changes detected");
            return Ok(());
        }

        for migration in &pending {
            for action in &migration.actions {
                self.emit(ActionPhase::Planned, migration, action);
            }
            let path = self.store.write(migration)?;
            info!("wrote migration {}", path.display());
        }
        Ok(())
    }

    /// Applies all unapplied migration files in dependency order.
    ///
    /// Each migration's actions are applied in stored order and the
    /// migration is recorded through the editor afterwards; the two
    /// steps are not transactional, so a crash in between leaves a
    /// migration that will be re-attempted on the next run (which the
    /// editor must tolerate in `store_migration`).
    ///
    /// # Errors
    ///
    /// Aborts on the first editor failure, annotated with the
    /// migration it came from.
    pub async fn migrate(&self) -> Result<()> {
        self.editor.setup().await.map_err(Error::Setup)?;
        let history = self.store.load(&self.registry)?;

        let mut unapplied = Vec::new();
        let mut applied = HashSet::new();
        for migration in history.files() {
            let is_applied = self
                .editor
                .has_migration(
                    &migration.app_name,
                    &migration.model_name,
                    &migration.file_name(),
                )
                .await
                .map_err(|source| editor_error(migration, "HasMigration", source))?;
            if is_applied {
                applied.insert(migration.key());
            } else {
                unapplied.push(migration.clone());
            }
        }

        if unapplied.is_empty() {
            info!("no migrations to apply");
            return Ok(());
        }

        MigrationSorter::new(&mut unapplied).sort_with_applied(&applied)?;

        for migration in &unapplied {
            info!(
                "applying migration {} for model {}.{}",
                migration.file_name(),
                migration.app_name,
                migration.model_name
            );
            for action in &migration.actions {
                self.apply_action(migration, action).await?;
                self.emit(ActionPhase::Applied, migration, action);
            }
            self.editor
                .store_migration(
                    &migration.app_name,
                    &migration.model_name,
                    &migration.file_name(),
                )
                .await
                .map_err(|source| editor_error(migration, "StoreMigration", source))?;
        }
        Ok(())
    }

    /// Runs the planning half of make-migrations: load history, diff
    /// every model and allocate new migration files with resolved
    /// dependencies, without writing anything.
    async fn plan(&self) -> Result<Vec<MigrationFile>> {
        self.store.ensure_root()?;
        self.editor.setup().await.map_err(Error::Setup)?;
        let history = self.store.load(&self.registry)?;

        let mut pending = Vec::new();
        for app in self.registry.apps() {
            for model in &app.models {
                let table = model.build_table(&app.name, &self.registry)?;
                let last = history.last(&app.name, &model.name);
                let actions = diff(last.map(|m| &m.table), Some(&table));
                if actions.is_empty() {
                    debug!("model {}.{} is up to date", app.name, model.name);
                    continue;
                }
                let name = migration::slug(&actions, &table.table_name);
                pending.push(MigrationFile {
                    app_name: app.name.clone(),
                    model_name: model.name.clone(),
                    name,
                    order: last.map_or(1, |m| m.order + 1),
                    table,
                    actions,
                    dependencies: Vec::new(),
                });
            }
        }

        // Models that are still in history but no longer registered get
        // a final migration dropping their table. A whole missing app
        // is a hard error and was already caught while loading.
        for (app_name, model_name) in history.model_keys() {
            let registered = self
                .registry
                .app(&app_name)
                .is_some_and(|app| app.model(&model_name).is_some());
            if registered {
                continue;
            }
            let Some(last) = history.last(&app_name, &model_name) else {
                continue;
            };
            let actions = diff(Some(&last.table), None);
            if actions.is_empty() {
                continue;
            }
            let name = migration::slug(&actions, &last.table.table_name);
            // The target state after a drop is "no table": an empty
            // snapshot, so a later re-run diffs to nothing and a
            // re-registered model diffs to a fresh create.
            let target = crate::table::ModelTable::new("", last.table.model_identity.clone());
            pending.push(MigrationFile {
                app_name,
                model_name,
                name,
                order: last.order + 1,
                table: target,
                actions,
                dependencies: Vec::new(),
            });
        }

        self.infer_dependencies(&mut pending);
        Ok(pending)
    }

    /// Fills in cross-model dependencies: if a relation target is being
    /// migrated in this same pass, the target's new file must be
    /// applied first. Cross-app references are allowed.
    fn infer_dependencies(&self, pending: &mut [MigrationFile]) {
        let by_model: HashMap<(String, String), String> = pending
            .iter()
            .map(|migration| {
                (
                    (migration.app_name.clone(), migration.model_name.clone()),
                    migration.file_name(),
                )
            })
            .collect();

        for migration in pending.iter_mut() {
            let mut dependencies = Vec::new();
            for column in &migration.table.columns {
                let Some(rel) = &column.rel else { continue };
                let Some((app, model)) = rel.target_model.split_once('.') else {
                    continue;
                };
                if app == migration.app_name && model == migration.model_name {
                    continue;
                }
                let Some(file) = by_model.get(&(app.to_string(), model.to_string())) else {
                    continue;
                };
                let dependency = Dependency::new(app, model, file.clone());
                if !dependencies.contains(&dependency) {
                    dependencies.push(dependency);
                }
            }
            migration.dependencies = dependencies;
        }
    }

    async fn apply_action(&self, migration: &MigrationFile, action: &Action) -> Result<()> {
        let editor = self.editor.as_ref();
        let table = &migration.table;
        let malformed = |detail: &str| Error::MalformedAction {
            file: format!(
                "{}/{}/{}",
                migration.app_name,
                migration.model_name,
                migration.file_name()
            ),
            action_type: action.kind().to_string(),
            detail: detail.to_string(),
        };

        let result = match action {
            Action::CreateTable { table: change } => {
                let new = change.new.as_ref().ok_or_else(|| malformed("no new table"))?;
                editor.create_table(new).await
            }
            Action::DropTable { table: change } => {
                let old = change.old.as_ref().ok_or_else(|| malformed("no old table"))?;
                editor.drop_table(old).await
            }
            Action::RenameTable { table: change } => {
                let old = change.old.as_ref().ok_or_else(|| malformed("no old table"))?;
                let new = change.new.as_ref().ok_or_else(|| malformed("no new table"))?;
                editor.rename_table(old, &new.table_name).await
            }
            Action::AddField { field } => {
                let new = field.new.as_ref().ok_or_else(|| malformed("no new field"))?;
                editor.add_field(table, new).await
            }
            Action::AlterField { field } => {
                let old = field.old.as_ref().ok_or_else(|| malformed("no old field"))?;
                let new = field.new.as_ref().ok_or_else(|| malformed("no new field"))?;
                editor.alter_field(table, old, new).await
            }
            Action::RemoveField { field } => {
                let old = field.old.as_ref().ok_or_else(|| malformed("no old field"))?;
                editor.remove_field(table, old).await
            }
            Action::AddIndex { index } => {
                let new = index.new.as_ref().ok_or_else(|| malformed("no new index"))?;
                editor.add_index(table, new).await
            }
            Action::DropIndex { index } => {
                let old = index.old.as_ref().ok_or_else(|| malformed("no old index"))?;
                editor.drop_index(table, old).await
            }
            Action::RenameIndex { index } => {
                let old = index.old.as_ref().ok_or_else(|| malformed("no old index"))?;
                let new = index.new.as_ref().ok_or_else(|| malformed("no new index"))?;
                editor.rename_index(table, &old.name, &new.name).await
            }
        };

        result.map_err(|source| editor_error(migration, action.kind(), source))
    }

    fn emit(&self, phase: ActionPhase, migration: &MigrationFile, action: &Action) {
        if let Some(log) = &self.log {
            log.record(&ActionEvent {
                phase,
                app_name: &migration.app_name,
                model_name: &migration.model_name,
                file_name: migration.file_name(),
                action,
            });
        }
    }
}

fn editor_error(migration: &MigrationFile, operation: &str, source: EditorError) -> Error {
    Error::Editor {
        app: migration.app_name.clone(),
        model: migration.model_name.clone(),
        file: migration.file_name(),
        operation: operation.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::MockSchemaEditor;
    use crate::registry::{AppDef, FieldDef, ModelDef};
    use crate::table::FieldKind;

    fn registry() -> Registry {
        let mut field = FieldDef::new("ID", FieldKind::Int64);
        field.primary = true;
        field.auto = true;
        let model = ModelDef {
            name: "User".to_string(),
            table_name: None,
            keyless: false,
            fields: vec![field],
            indexes: vec![],
        };
        let mut registry = Registry::new();
        registry.register_app(AppDef::new("test_sql", vec![model]));
        registry
    }

    #[tokio::test]
    async fn setup_failures_are_reported_as_setup_errors() {
        let mut editor = MockSchemaEditor::new();
        editor.expect_setup().returning(|| {
            Err(EditorError::Unsupported("no database".to_string()))
        });

        let dir = tempfile::tempdir().unwrap();
        let engine = MigrationEngine::new(
            registry(),
            MigrationStore::new(dir.path()),
            Box::new(editor),
        );
        let err = engine.needs_to_migrate().await.unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[tokio::test]
    async fn needs_to_migrate_reports_identities_without_writing() {
        let mut editor = MockSchemaEditor::new();
        editor.expect_setup().returning(|| Ok(()));

        let dir = tempfile::tempdir().unwrap();
        let engine = MigrationEngine::new(
            registry(),
            MigrationStore::new(dir.path()),
            Box::new(editor),
        );
        let pending = engine.needs_to_migrate().await.unwrap();
        assert_eq!(pending, vec!["test_sql.User".to_string()]);
        assert!(!dir.path().join("test_sql").exists());
    }

    #[tokio::test]
    async fn editor_failures_carry_the_migration_context() {
        let mut editor = MockSchemaEditor::new();
        editor.expect_setup().returning(|| Ok(()));
        editor.expect_has_migration().returning(|_, _, _| Ok(false));
        editor.expect_create_table().returning(|_| {
            Err(EditorError::Unsupported("nope".to_string()))
        });

        let dir = tempfile::tempdir().unwrap();
        let store = MigrationStore::new(dir.path());
        let engine = MigrationEngine::new(registry(), store, Box::new(editor));
        engine.make_migrations().await.unwrap();

        let err = engine.migrate().await.unwrap_err();
        match err {
            Error::Editor {
                app,
                model,
                file,
                operation,
                ..
            } => {
                assert_eq!(app, "test_sql");
                assert_eq!(model, "User");
                assert_eq!(file, "0001_create_table.mig");
                assert_eq!(operation, "CreateTable");
            }
            other => panic!("expected an editor error, got {other:?}"),
        }
    }
}
