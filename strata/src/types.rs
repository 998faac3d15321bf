//! The column type registry.
//!
//! Dialect editors ask the registry for the DDL type of a column. The
//! lookup has two tiers: an exact match on the field's declared type
//! (for wrappers such as a nullable string type), then a match on the
//! field kind. A per-field `db_type` short-circuits both tiers, and
//! anything left unmatched falls back to `TEXT`.
//!
//! The registry is an engine-scoped handle, filled by dialect setup
//! code at startup; registration is append-only and the last writer
//! wins per key.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::table::{Column, FieldKind};

/// A supported database dialect.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

/// Maps `(dialect, field)` pairs to DDL type strings.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    exact: HashMap<(Dialect, String), String>,
    kinds: HashMap<(Dialect, FieldKind), String>,
}

impl TypeRegistry {
    /// An empty registry with no mappings at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            exact: HashMap::new(),
            kinds: HashMap::new(),
        }
    }

    /// A registry seeded with the standard mappings for every dialect.
    ///
    /// String types carry a `{len}` placeholder that is substituted
    /// with the column's `max_length` (255 when absent).
    #[must_use]
    pub fn with_defaults() -> Self {
        use FieldKind::{
            Bool, Bytes, Date, DateTime, Float32, Float64, Int16, Int32, Int64, Int8, String,
            Text, Time, Uint16, Uint32, Uint64, Uint8,
        };

        let mut registry = Self::empty();
        let defaults: &[(Dialect, &[(FieldKind, &str)])] = &[
            (
                Dialect::Sqlite,
                &[
                    (Bool, "BOOLEAN"),
                    (Int8, "TINYINT"),
                    (Int16, "SMALLINT"),
                    (Int32, "INTEGER"),
                    (Int64, "BIGINT"),
                    (Uint8, "TINYINT"),
                    (Uint16, "SMALLINT"),
                    (Uint32, "INTEGER"),
                    (Uint64, "BIGINT"),
                    (Float32, "FLOAT"),
                    (Float64, "DOUBLE"),
                    (String, "TEXT"),
                    (Text, "TEXT"),
                    (Bytes, "BLOB"),
                    (Date, "DATE"),
                    (Time, "TIME"),
                    (DateTime, "DATETIME"),
                ],
            ),
            (
                Dialect::Postgres,
                &[
                    (Bool, "BOOLEAN"),
                    (Int8, "SMALLINT"),
                    (Int16, "SMALLINT"),
                    (Int32, "INTEGER"),
                    (Int64, "BIGINT"),
                    (Uint8, "SMALLINT"),
                    (Uint16, "INTEGER"),
                    (Uint32, "BIGINT"),
                    (Uint64, "BIGINT"),
                    (Float32, "REAL"),
                    (Float64, "DOUBLE PRECISION"),
                    (String, "VARCHAR({len})"),
                    (Text, "TEXT"),
                    (Bytes, "BYTEA"),
                    (Date, "DATE"),
                    (Time, "TIME"),
                    (DateTime, "TIMESTAMP WITH TIME ZONE"),
                ],
            ),
            (
                Dialect::Mysql,
                &[
                    (Bool, "BOOLEAN"),
                    (Int8, "TINYINT"),
                    (Int16, "SMALLINT"),
                    (Int32, "INT"),
                    (Int64, "BIGINT"),
                    (Uint8, "TINYINT UNSIGNED"),
                    (Uint16, "SMALLINT UNSIGNED"),
                    (Uint32, "INT UNSIGNED"),
                    (Uint64, "BIGINT UNSIGNED"),
                    (Float32, "FLOAT"),
                    (Float64, "DOUBLE"),
                    (String, "VARCHAR({len})"),
                    (Text, "TEXT"),
                    (Bytes, "BLOB"),
                    (Date, "DATE"),
                    (Time, "TIME"),
                    (DateTime, "DATETIME"),
                ],
            ),
        ];
        for (dialect, mappings) in defaults {
            for (kind, ddl) in *mappings {
                registry.register_kind(*dialect, *kind, *ddl);
            }
        }
        registry
    }

    /// Registers a DDL type for an exact field type name.
    pub fn register_type(
        &mut self,
        dialect: Dialect,
        type_name: impl Into<String>,
        ddl: impl Into<String>,
    ) {
        self.exact.insert((dialect, type_name.into()), ddl.into());
    }

    /// Registers a DDL type for a field kind.
    pub fn register_kind(&mut self, dialect: Dialect, kind: FieldKind, ddl: impl Into<String>) {
        self.kinds.insert((dialect, kind), ddl.into());
    }

    /// Resolves the DDL type for a column.
    #[must_use]
    pub fn column_type(&self, dialect: Dialect, column: &Column) -> String {
        if let Some(db_type) = &column.db_type {
            return db_type.clone();
        }
        if let Some(type_name) = &column.type_name {
            if let Some(ddl) = self.exact.get(&(dialect, type_name.clone())) {
                return expand(ddl, column);
            }
        }
        if let Some(ddl) = self.kinds.get(&(dialect, column.kind)) {
            return expand(ddl, column);
        }
        "TEXT".to_string()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn expand(ddl: &str, column: &Column) -> String {
    if ddl.contains("{len}") {
        let len = column.max_length.unwrap_or(255);
        ddl.replace("{len}", &len.to_string())
    } else {
        ddl.to_string()
    }
}
