//! The SQLite schema editor.
//!
//! Renders schema statements with sea-query's SQLite builder and runs
//! them on an [`sqlx::SqlitePool`]. Applied migrations are tracked in
//! the `strata_migrations` table.
//!
//! SQLite cannot alter a column in place; [`SchemaEditor::alter_field`]
//! reports the operation as unsupported rather than emitting SQL the
//! database would reject. Index renames are expressed as drop plus
//! recreate from the target table state.

use async_trait::async_trait;
use sea_query::{
    Alias, ColumnDef, ColumnType, Expr, OnConflict, Query, SeaRc, SimpleExpr,
    SqliteQueryBuilder, Value,
};
use sea_query_binder::SqlxValues;
use serde_json::Value as JsonValue;
use sqlx::SqlitePool;
use tracing::debug;

use crate::editor::{EditorError, SchemaEditor};
use crate::table::{Column, Index, ModelTable, RelationKind};
use crate::types::{Dialect, TypeRegistry};

const TRACKING_TABLE: &str = "strata_migrations";
const TRACKING_INDEX: &str = "unq_strata_migrations";

/// A schema editor for SQLite databases.
#[derive(Debug, Clone)]
pub struct SqliteEditor {
    pool: SqlitePool,
    types: TypeRegistry,
}

impl SqliteEditor {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_types(pool, TypeRegistry::with_defaults())
    }

    /// Creates an editor with a custom column type registry.
    #[must_use]
    pub fn with_types(pool: SqlitePool, types: TypeRegistry) -> Self {
        Self { pool, types }
    }

    async fn run(&self, sql: &str) -> Result<(), EditorError> {
        debug!("executing schema statement: {sql}");
        sqlx::query(sql).execute(&self.pool).await?;
        Ok(())
    }

    fn column_def(&self, column: &Column) -> ColumnDef {
        // SQLite only autoincrements an INTEGER PRIMARY KEY column;
        // any other type name there is a syntax error.
        let ddl = if column.auto && column.primary {
            "INTEGER".to_string()
        } else {
            self.types.column_type(Dialect::Sqlite, column)
        };
        let ty = ColumnType::Custom(SeaRc::new(Alias::new(ddl)));
        let mut def = ColumnDef::new_with_type(Alias::new(&column.column), ty);
        if column.primary {
            def.primary_key();
        }
        if column.auto {
            def.auto_increment();
        }
        if column.nullable {
            def.null();
        } else {
            def.not_null();
        }
        if column.unique {
            def.unique_key();
        }
        if let Some(default) = column.default.as_ref().and_then(default_value) {
            def.default(default);
        }
        def
    }
}

/// Maps a serialized scalar default onto a bindable value. Composite
/// defaults have no DDL rendering and are skipped.
fn default_value(value: &JsonValue) -> Option<Value> {
    match value {
        JsonValue::Bool(value) => Some((*value).into()),
        JsonValue::Number(number) => number
            .as_i64()
            .map(Value::from)
            .or_else(|| number.as_f64().map(Value::from)),
        JsonValue::String(value) => Some(value.clone().into()),
        JsonValue::Null | JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

#[async_trait]
impl SchemaEditor for SqliteEditor {
    async fn setup(&self) -> Result<(), EditorError> {
        let mut table = sea_query::Table::create();
        table
            .table(Alias::new(TRACKING_TABLE))
            .if_not_exists()
            .col(
                ColumnDef::new_with_type(Alias::new("id"), ColumnType::Integer)
                    .not_null()
                    .primary_key()
                    .auto_increment(),
            )
            .col(ColumnDef::new_with_type(Alias::new("app_name"), ColumnType::Text).not_null())
            .col(ColumnDef::new_with_type(Alias::new("model_name"), ColumnType::Text).not_null())
            .col(
                ColumnDef::new_with_type(Alias::new("migration_name"), ColumnType::Text)
                    .not_null(),
            )
            .col(
                ColumnDef::new_with_type(Alias::new("created_at"), ColumnType::DateTime)
                    .not_null()
                    .default(Expr::current_timestamp()),
            );
        self.run(&table.build(SqliteQueryBuilder)).await?;

        let mut index = sea_query::Index::create();
        index
            .name(TRACKING_INDEX)
            .table(Alias::new(TRACKING_TABLE))
            .col(Alias::new("app_name"))
            .col(Alias::new("model_name"))
            .col(Alias::new("migration_name"))
            .unique()
            .if_not_exists();
        self.run(&index.build(SqliteQueryBuilder)).await
    }

    async fn has_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<bool, EditorError> {
        let sql = Query::select()
            .column(Alias::new("id"))
            .from(Alias::new(TRACKING_TABLE))
            .and_where(Expr::col(Alias::new("app_name")).eq(app_name))
            .and_where(Expr::col(Alias::new("model_name")).eq(model_name))
            .and_where(Expr::col(Alias::new("migration_name")).eq(migration_name))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        Ok(row.is_some())
    }

    async fn store_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<(), EditorError> {
        let values: [SimpleExpr; 4] = [
            app_name.into(),
            model_name.into(),
            migration_name.into(),
            chrono::Utc::now().into(),
        ];
        let sql = Query::insert()
            .into_table(Alias::new(TRACKING_TABLE))
            .columns([
                Alias::new("app_name"),
                Alias::new("model_name"),
                Alias::new("migration_name"),
                Alias::new("created_at"),
            ])
            .values_panic(values)
            .on_conflict(
                OnConflict::columns([
                    Alias::new("app_name"),
                    Alias::new("model_name"),
                    Alias::new("migration_name"),
                ])
                .do_nothing()
                .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        self.run(&sql).await
    }

    async fn remove_migration(
        &self,
        app_name: &str,
        model_name: &str,
        migration_name: &str,
    ) -> Result<(), EditorError> {
        let sql = Query::delete()
            .from_table(Alias::new(TRACKING_TABLE))
            .and_where(Expr::col(Alias::new("app_name")).eq(app_name))
            .and_where(Expr::col(Alias::new("model_name")).eq(model_name))
            .and_where(Expr::col(Alias::new("migration_name")).eq(migration_name))
            .to_string(SqliteQueryBuilder);
        self.run(&sql).await
    }

    async fn create_table(&self, table: &ModelTable) -> Result<(), EditorError> {
        let mut statement = sea_query::Table::create();
        statement.table(Alias::new(&table.table_name));
        for column in &table.columns {
            statement.col(self.column_def(column));

            let Some(rel) = &column.rel else { continue };
            // Join tables for many-to-many relations are modelled as
            // their own tables; no column-level constraint applies.
            if rel.kind == RelationKind::ManyToMany {
                continue;
            }
            let (Some(target_table), Some(target_field)) =
                (&rel.target_table, &rel.target_field)
            else {
                continue;
            };
            statement.foreign_key(
                sea_query::ForeignKey::create()
                    .name(format!("fk_{}_{}", table.table_name, column.column))
                    .from(Alias::new(&table.table_name), Alias::new(&column.column))
                    .to(Alias::new(target_table), Alias::new(target_field))
                    .on_delete(rel.on_delete.into())
                    .on_update(rel.on_update.into()),
            );
        }
        self.run(&statement.build(SqliteQueryBuilder)).await?;

        for index in &table.indexes {
            self.add_index(table, index).await?;
        }
        Ok(())
    }

    async fn drop_table(&self, table: &ModelTable) -> Result<(), EditorError> {
        let mut statement = sea_query::Table::drop();
        statement.table(Alias::new(&table.table_name));
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn rename_table(&self, table: &ModelTable, new_name: &str) -> Result<(), EditorError> {
        let mut statement = sea_query::Table::rename();
        statement.table(Alias::new(&table.table_name), Alias::new(new_name));
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn add_field(&self, table: &ModelTable, column: &Column) -> Result<(), EditorError> {
        let mut statement = sea_query::Table::alter();
        statement
            .table(Alias::new(&table.table_name))
            .add_column(self.column_def(column));
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn alter_field(
        &self,
        table: &ModelTable,
        old: &Column,
        new: &Column,
    ) -> Result<(), EditorError> {
        Err(EditorError::Unsupported(format!(
            "SQLite cannot alter column {}.{} in place (changing {} requires a table rebuild)",
            table.table_name, old.column, new.column
        )))
    }

    async fn remove_field(
        &self,
        table: &ModelTable,
        column: &Column,
    ) -> Result<(), EditorError> {
        let mut statement = sea_query::Table::alter();
        statement
            .table(Alias::new(&table.table_name))
            .drop_column(Alias::new(&column.column));
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn add_index(&self, table: &ModelTable, index: &Index) -> Result<(), EditorError> {
        let mut statement = sea_query::Index::create();
        statement
            .name(&index.name)
            .table(Alias::new(&table.table_name));
        for column in &index.columns {
            statement.col(Alias::new(column));
        }
        if index.unique {
            statement.unique();
        }
        // `index.index_type` is an opaque method hint; SQLite has a
        // single index implementation and ignores it.
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn drop_index(&self, table: &ModelTable, index: &Index) -> Result<(), EditorError> {
        let mut statement = sea_query::Index::drop();
        statement
            .name(&index.name)
            .table(Alias::new(&table.table_name));
        self.run(&statement.build(SqliteQueryBuilder)).await
    }

    async fn rename_index(
        &self,
        table: &ModelTable,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), EditorError> {
        // SQLite has no ALTER INDEX RENAME; drop the old index and
        // recreate it from the target table state.
        let index = table.index(new_name).ok_or_else(|| {
            EditorError::Unsupported(format!(
                "cannot rename index {old_name} to {new_name}: the target state of table {} does not define it",
                table.table_name
            ))
        })?;

        let mut statement = sea_query::Index::drop();
        statement
            .name(old_name)
            .table(Alias::new(&table.table_name));
        self.run(&statement.build(SqliteQueryBuilder)).await?;

        self.add_index(table, index).await
    }

    async fn execute(&self, query: &str, values: Vec<Value>) -> Result<u64, EditorError> {
        let result = sqlx::query_with(query, SqlxValues(sea_query::Values(values)))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
