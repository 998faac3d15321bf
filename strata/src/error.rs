//! Error types raised by the migration engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::editor::EditorError;
use crate::sorter::MigrationSorterError;

pub type Result<T> = std::result::Result<T, Error>;

/// An error raised while generating or applying migrations.
///
/// All errors propagate up to the caller; nothing is retried
/// automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A file or directory in the migration store could not be read.
    #[error("unable to read {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A migration file exists but its body is not a valid migration
    /// document.
    #[error("unable to parse migration file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// A migration file or directory could not be written.
    #[error("unable to write {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A migration could not be serialized to its on-disk form.
    #[error("unable to serialize migration file {path}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    /// Refused to overwrite an existing migration file.
    #[error("migration file {path} already exists")]
    AlreadyExists { path: PathBuf },
    /// A file in the migration store does not follow the
    /// `NNNN_slug.mig` naming scheme.
    #[error("invalid migration file name {name:?}, expected NNNN_slug.mig")]
    InvalidFilename { name: String },
    /// A migration file contains an action type this version of the
    /// engine does not recognize.
    #[error("unknown action type {action_type:?} in migration {file}")]
    UnknownAction { file: String, action_type: String },
    /// A migration file contains a recognized action with a missing or
    /// malformed payload.
    #[error("malformed {action_type} action in migration {file}: {detail}")]
    MalformedAction {
        file: String,
        action_type: String,
        detail: String,
    },
    /// The migration store contains an app directory that is not part
    /// of the registered app set.
    #[error("migration directory contains app {app:?}, which is not registered")]
    StaleAppDirectory { app: String },
    /// A registered model violates a structural invariant, such as not
    /// having exactly one primary key column.
    #[error("invalid model {app}.{model}: {reason}")]
    InvalidModel {
        app: String,
        model: String,
        reason: String,
    },
    /// An error occurred while determining the correct order of
    /// migrations.
    #[error("error while determining the correct order of migrations")]
    Sort(#[from] MigrationSorterError),
    /// The schema editor failed to initialize its tracking table.
    #[error("unable to set up the schema editor")]
    Setup(#[source] EditorError),
    /// The schema editor failed while applying a migration.
    #[error("schema editor failed on {operation} in {app}/{model}/{file}")]
    Editor {
        app: String,
        model: String,
        file: String,
        operation: String,
        #[source]
        source: EditorError,
    },
}
