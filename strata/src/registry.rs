//! Model registration and the model table builder.
//!
//! The engine does not reflect over live types; callers describe their
//! apps and models as data and register them with a [`Registry`]. The
//! registry is an engine-scoped handle filled once at startup, and
//! [`ModelDef::build_table`] turns a declaration into the
//! [`ModelTable`] snapshot the diff engine consumes.

use heck::ToSnakeCase;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::table::{
    Column, FieldKind, Index, ModelTable, ReferentialAction, Relation, RelationKind,
};

/// An insertion-ordered set of registered apps.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    apps: IndexMap<String, AppDef>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an app. Registering an app under an existing name
    /// replaces the previous definition.
    pub fn register_app(&mut self, app: AppDef) {
        self.apps.insert(app.name.clone(), app);
    }

    #[must_use]
    pub fn app(&self, name: &str) -> Option<&AppDef> {
        self.apps.get(name)
    }

    #[must_use]
    pub fn contains_app(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    /// Iterates apps in registration order.
    pub fn apps(&self) -> impl Iterator<Item = &AppDef> {
        self.apps.values()
    }

    /// Resolves a model identity in `app.Model` form.
    #[must_use]
    pub fn resolve(&self, identity: &str) -> Option<(&AppDef, &ModelDef)> {
        let (app_name, model_name) = identity.split_once('.')?;
        let app = self.app(app_name)?;
        let model = app.model(model_name)?;
        Some((app, model))
    }
}

/// A logical grouping of models with a stable name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDef {
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelDef>,
}

impl AppDef {
    #[must_use]
    pub fn new(name: impl Into<String>, models: Vec<ModelDef>) -> Self {
        Self {
            name: name.into(),
            models,
        }
    }

    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelDef> {
        self.models.iter().find(|model| model.name == name)
    }
}

/// A declared model: a named record type mapping to exactly one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    /// The stable model identity within its app, e.g. `User`.
    pub name: String,
    /// Explicit table name; defaults to the snake_case model name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// Set for models explicitly declared without a primary key.
    #[serde(default)]
    pub keyless: bool,
    pub fields: Vec<FieldDef>,
    /// Model-level composite index declarations.
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl ModelDef {
    /// The database table name this model maps to.
    #[must_use]
    pub fn table_name(&self) -> String {
        self.table_name
            .clone()
            .unwrap_or_else(|| self.name.to_snake_case())
    }

    /// The model identity in `app.Model` form.
    #[must_use]
    pub fn identity(&self, app_name: &str) -> String {
        format!("{app_name}.{}", self.name)
    }

    /// Builds the [`ModelTable`] snapshot for this model.
    ///
    /// This is a pure function of the declaration and the registry:
    /// the same input always produces an equal snapshot. Relation
    /// targets registered in `registry` are resolved to their table
    /// name and primary key column; unregistered targets are left
    /// unresolved.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidModel`] unless exactly one field is
    /// marked primary, or none for a keyless model.
    pub fn build_table(&self, app_name: &str, registry: &Registry) -> Result<ModelTable> {
        let table_name = self.table_name();
        let mut table = ModelTable::new(table_name.clone(), self.identity(app_name));
        table.keyless = self.keyless;

        for field in &self.fields {
            table.columns.push(field.as_column(registry));
        }

        let primary_count = table.columns.iter().filter(|c| c.primary).count();
        let invalid = |reason: &str| Error::InvalidModel {
            app: app_name.to_string(),
            model: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.keyless {
            if primary_count != 0 {
                return Err(invalid("keyless models must not declare a primary key"));
            }
        } else if primary_count != 1 {
            return Err(invalid("models must have exactly one primary key field"));
        }

        for field in &self.fields {
            let column = field.column_name();
            if field.index {
                table
                    .indexes
                    .push(Index::new(format!("idx_{table_name}_{column}"), vec![column.clone()]));
            }
            if field.unique {
                table.indexes.push(
                    Index::new(format!("unq_{table_name}_{column}"), vec![column]).unique(),
                );
            }
        }
        for index in &self.indexes {
            table.indexes.push(index.as_index(&table_name));
        }

        Ok(table)
    }
}

/// A declared field of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Explicit column name; defaults to the snake_case field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_type: Option<String>,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub auto: bool,
    /// Field-level marker requesting a single-column index.
    #[serde(default)]
    pub index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rel: Option<RelationDef>,
}

impl FieldDef {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            column: None,
            kind,
            type_name: None,
            db_type: None,
            nullable: false,
            primary: false,
            unique: false,
            auto: false,
            index: false,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            default: None,
            rel: None,
        }
    }

    #[must_use]
    pub fn column_name(&self) -> String {
        self.column
            .clone()
            .unwrap_or_else(|| self.name.to_snake_case())
    }

    fn as_column(&self, registry: &Registry) -> Column {
        Column {
            name: self.name.clone(),
            column: self.column_name(),
            kind: self.kind,
            type_name: self.type_name.clone(),
            db_type: self.db_type.clone(),
            nullable: self.nullable,
            primary: self.primary,
            unique: self.unique,
            auto: self.auto,
            min_length: self.min_length,
            max_length: self.max_length,
            min_value: self.min_value,
            max_value: self.max_value,
            default: self.default.clone(),
            rel: self.rel.as_ref().map(|rel| rel.resolve(registry)),
        }
    }
}

/// A declared relation to another model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDef {
    pub kind: RelationKind,
    /// The target model identity in `app.Model` form.
    pub to: String,
    /// The target field; defaults to the target's primary key column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_delete: Option<ReferentialAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_update: Option<ReferentialAction>,
}

impl RelationDef {
    fn resolve(&self, registry: &Registry) -> Relation {
        let target = registry.resolve(&self.to);
        let target_table = target.map(|(_, model)| model.table_name());
        let target_pk = target.and_then(|(_, model)| {
            model
                .fields
                .iter()
                .find(|field| field.primary)
                .map(FieldDef::column_name)
        });

        Relation {
            kind: self.kind,
            target_model: self.to.clone(),
            target_table,
            target_field: self.field.clone().or(target_pk),
            on_delete: self.on_delete.unwrap_or_default(),
            on_update: self.on_update.unwrap_or(ReferentialAction::Cascade),
        }
    }
}

/// A model-level composite index declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Explicit index name; defaults to `idx_<table>_on_<columns>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
}

impl IndexDef {
    fn as_index(&self, table_name: &str) -> Index {
        let name = self.name.clone().unwrap_or_else(|| {
            format!("idx_{table_name}_on_{}", self.columns.join("_"))
        });
        Index {
            name,
            columns: self.columns.clone(),
            unique: self.unique,
            index_type: self.index_type.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_model() -> ModelDef {
        ModelDef {
            name: "User".to_string(),
            table_name: Some("users".to_string()),
            keyless: false,
            fields: vec![
                {
                    let mut f = FieldDef::new("ID", FieldKind::Int64);
                    f.primary = true;
                    f.auto = true;
                    f
                },
                {
                    let mut f = FieldDef::new("Email", FieldKind::String);
                    f.max_length = Some(255);
                    f.index = true;
                    f
                },
            ],
            indexes: vec![],
        }
    }

    fn registry_with(models: Vec<ModelDef>) -> Registry {
        let mut registry = Registry::new();
        registry.register_app(AppDef::new("test_sql", models));
        registry
    }

    #[test]
    fn build_table_is_pure() {
        let registry = registry_with(vec![user_model()]);
        let model = user_model();
        let a = model.build_table("test_sql", &registry).unwrap();
        let b = model.build_table("test_sql", &registry).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn column_names_default_to_snake_case() {
        let registry = registry_with(vec![user_model()]);
        let table = user_model().build_table("test_sql", &registry).unwrap();
        assert_eq!(table.table_name, "users");
        assert_eq!(table.model_identity, "test_sql.User");
        assert_eq!(table.column("ID").map(|c| c.column.as_str()), Some("id"));
        assert_eq!(
            table.column("Email").map(|c| c.column.as_str()),
            Some("email")
        );
    }

    #[test]
    fn field_index_markers_derive_indexes() {
        let registry = registry_with(vec![user_model()]);
        let table = user_model().build_table("test_sql", &registry).unwrap();
        let index = table.index("idx_users_email").unwrap();
        assert_eq!(index.columns, vec!["email".to_string()]);
        assert!(!index.unique);
    }

    #[test]
    fn composite_index_names_are_derived() {
        let mut model = user_model();
        model.indexes.push(IndexDef {
            name: None,
            columns: vec!["email".to_string(), "id".to_string()],
            unique: true,
            index_type: None,
        });
        let registry = registry_with(vec![model.clone()]);
        let table = model.build_table("test_sql", &registry).unwrap();
        let index = table.index("idx_users_on_email_id").unwrap();
        assert!(index.unique);
    }

    #[test]
    fn primary_key_is_enforced() {
        let mut model = user_model();
        model.fields[0].primary = false;
        let registry = registry_with(vec![model.clone()]);
        let err = model.build_table("test_sql", &registry).unwrap_err();
        assert!(matches!(err, Error::InvalidModel { .. }));

        model.keyless = true;
        let table = model.build_table("test_sql", &registry).unwrap();
        assert!(table.primary_key().is_none());
    }

    #[test]
    fn relations_resolve_through_the_registry() {
        let todo = ModelDef {
            name: "Todo".to_string(),
            table_name: None,
            keyless: false,
            fields: vec![
                {
                    let mut f = FieldDef::new("ID", FieldKind::Int64);
                    f.primary = true;
                    f.auto = true;
                    f
                },
                {
                    let mut f = FieldDef::new("User", FieldKind::Int64);
                    f.rel = Some(RelationDef {
                        kind: RelationKind::ForeignKey,
                        to: "test_sql.User".to_string(),
                        field: None,
                        on_delete: None,
                        on_update: None,
                    });
                    f
                },
            ],
            indexes: vec![],
        };
        let registry = registry_with(vec![user_model(), todo.clone()]);
        let table = todo.build_table("test_sql", &registry).unwrap();
        let rel = table.column("User").unwrap().rel.as_ref().unwrap();
        assert_eq!(rel.target_table.as_deref(), Some("users"));
        assert_eq!(rel.target_field.as_deref(), Some("id"));
        assert_eq!(rel.on_delete, ReferentialAction::Restrict);
        assert_eq!(rel.on_update, ReferentialAction::Cascade);
    }
}
