//! The dialect-neutral schema editor contract.
//!
//! A schema editor applies abstract schema operations to a live
//! database and records applied migrations in a tracking table. The
//! engine only ever talks to this trait; implementations for each
//! dialect are independent capability sets, not an inheritance
//! hierarchy.

use async_trait::async_trait;
use thiserror::Error;

use crate::table::{Column, Index, ModelTable, ReferentialAction};

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// An error returned by a schema editor.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EditorError {
    #[error("database error")]
    Database(#[from] sqlx::Error),
    /// The dialect cannot express the requested operation.
    #[error("unsupported schema operation: {0}")]
    Unsupported(String),
    /// An error raised by an external editor implementation.
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

/// The set of operations the migration engine drives.
///
/// `setup` must be idempotent and create the tracking table if it is
/// missing. `store_migration` must be safely re-invokable for the same
/// key, so that a crash between DDL and the history write can be
/// recovered by re-running the migration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaEditor: Send + Sync {
    async fn setup(&self) -> Result<(), EditorError>;

    async fn has_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<bool, EditorError>;
    async fn store_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<(), EditorError>;
    async fn remove_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<(), EditorError>;

    async fn create_table(&self, table: &ModelTable) -> Result<(), EditorError>;
    async fn drop_table(&self, table: &ModelTable) -> Result<(), EditorError>;
    async fn rename_table(&self, table: &ModelTable, new_name: &str) -> Result<(), EditorError>;

    async fn add_field(&self, table: &ModelTable, column: &Column) -> Result<(), EditorError>;
    async fn alter_field(
        &self,
        table: &ModelTable,
        old: &Column,
        new: &Column,
    ) -> Result<(), EditorError>;
    async fn remove_field(&self, table: &ModelTable, column: &Column)
        -> Result<(), EditorError>;

    async fn add_index(&self, table: &ModelTable, index: &Index) -> Result<(), EditorError>;
    async fn drop_index(&self, table: &ModelTable, index: &Index) -> Result<(), EditorError>;
    async fn rename_index(
        &self,
        table: &ModelTable,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), EditorError>;

    /// Escape hatch for custom SQL. Returns the number of affected
    /// rows. Cancellation is ambient: dropping the returned future
    /// abandons the statement.
    async fn execute(
        &self,
        query: &str,
        values: Vec<sea_query::Value>,
    ) -> Result<u64, EditorError>;
}

impl From<ReferentialAction> for sea_query::ForeignKeyAction {
    fn from(value: ReferentialAction) -> Self {
        match value {
            ReferentialAction::NoAction => Self::NoAction,
            ReferentialAction::Restrict => Self::Restrict,
            ReferentialAction::Cascade => Self::Cascade,
            ReferentialAction::SetNull => Self::SetNull,
            ReferentialAction::SetDefault => Self::SetDefault,
        }
    }
}
