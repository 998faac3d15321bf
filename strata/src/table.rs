//! The in-memory model of a database table.
//!
//! A [`ModelTable`] is a snapshot of the shape a model takes in the
//! database: its table name, its columns and its indexes. Snapshots are
//! built fresh from the registered model on every pass and are never
//! mutated in place; the diff engine compares two snapshots structurally
//! to decide what changed.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The kind of value a column stores, independent of any dialect.
///
/// Dialect editors map kinds to concrete DDL types through the
/// [`TypeRegistry`](crate::types::TypeRegistry).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    String,
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
}

/// How a relation behaves when the referenced row is deleted or its key
/// is updated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    NoAction,
    #[default]
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub(crate) fn cascade() -> Self {
        Self::Cascade
    }
}

/// The kind of a relation between two models.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    #[serde(rename = "fk")]
    ForeignKey,
    #[serde(rename = "o2o")]
    OneToOne,
    #[serde(rename = "m2m")]
    ManyToMany,
}

/// A relation from a column to another model.
///
/// `target_model` is the stable identity of the referenced model in
/// `app.Model` form. `target_table` and `target_field` are resolved from
/// the registry at build time when the target is registered; a dialect
/// editor cannot emit a foreign key clause from a bare identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub target_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    #[serde(default)]
    pub on_delete: ReferentialAction,
    #[serde(default = "ReferentialAction::cascade")]
    pub on_update: ReferentialAction,
}

/// A single column of a [`ModelTable`].
///
/// `name` is the model-side identifier, `column` the database-side one.
/// Equality is structural and compares default values by their
/// canonical serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column: String,
    pub kind: FieldKind,
    /// The exact field type the column was derived from, used by the
    /// type registry's exact-match tier (e.g. nullable wrappers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// A per-field DDL type override that short-circuits the type
    /// registry lookup.
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
    pub rel: Option<Relation>,
}

impl Default for Column {
    fn default() -> Self {
        Self::new(String::new(), FieldKind::Bool)
    }
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            kind,
            type_name: None,
            db_type: None,
            nullable: false,
            primary: false,
            unique: false,
            auto: false,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            default: None,
            rel: None,
        }
    }

    #[must_use]
    pub fn db_column(mut self, column: impl Into<String>) -> Self {
        self.column = column.into();
        self
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    #[must_use]
    pub fn auto(mut self) -> Self {
        self.auto = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    #[must_use]
    pub fn value_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    #[must_use]
    pub fn relation(mut self, rel: Relation) -> Self {
        self.rel = Some(rel);
        self
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.column == other.column
            && self.kind == other.kind
            && self.type_name == other.type_name
            && self.db_type == other.db_type
            && self.nullable == other.nullable
            && self.primary == other.primary
            && self.unique == other.unique
            && self.auto == other.auto
            && self.min_length == other.min_length
            && self.max_length == other.max_length
            && self.min_value == other.min_value
            && self.max_value == other.max_value
            && self.rel == other.rel
            && defaults_equal(self.default.as_ref(), other.default.as_ref())
    }
}

/// Compares two default values by their canonical serialized form.
///
/// When serialization is not possible on either side, each side is
/// classified as "present" or "absent/zero" and the classifications are
/// compared instead, so an explicit zero default and a missing default
/// are considered equivalent.
pub(crate) fn defaults_equal(a: Option<&JsonValue>, b: Option<&JsonValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (serde_json::to_string(a), serde_json::to_string(b)) {
            (Ok(a), Ok(b)) => a == b,
            _ => is_present(Some(a)) == is_present(Some(b)),
        },
        (a, b) => is_present(a) == is_present(b),
    }
}

fn is_present(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64() != Some(0.0),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Array(a)) => !a.is_empty(),
        Some(JsonValue::Object(o)) => !o.is_empty(),
    }
}

/// A named index over one or more columns.
///
/// Column order is semantically significant. `type` is an opaque index
/// method hint such as `btree` or `hash`; the engine never interprets
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub index_type: Option<String>,
}

impl Index {
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            index_type: None,
        }
    }

    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    #[must_use]
    pub fn index_type(mut self, index_type: impl Into<String>) -> Self {
        self.index_type = Some(index_type.into());
        self
    }

    /// Returns whether two indexes are structurally equal apart from
    /// their names. Used for rename detection.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.columns == other.columns
            && self.unique == other.unique
            && self.index_type == other.index_type
    }
}

/// A snapshot of a model's database shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelTable {
    pub table_name: String,
    pub model_identity: String,
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<Index>,
    /// Set for models explicitly declared without a primary key.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub keyless: bool,
}

impl ModelTable {
    #[must_use]
    pub fn new(table_name: impl Into<String>, model_identity: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            model_identity: model_identity.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            keyless: false,
        }
    }

    /// Looks up a column by its model-side name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Looks up an index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// Returns the primary key column, if the model has one.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Column> {
        self.columns.iter().find(|column| column.primary)
    }
}
