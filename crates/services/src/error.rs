//! Shared error types for the services crate.

use thiserror::Error;

use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;
use unitflow_core::RegistryError;
use unitflow_core::model::{ModuleId, ProgressError, UnitId};

/// Errors emitted while opening or inspecting unit sessions.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    #[error("unit {unit} belongs to module {actual}, not {requested}")]
    ModuleMismatch {
        unit: UnitId,
        requested: ModuleId,
        actual: ModuleId,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while reading configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{var} must be a whole number of milliseconds, got {raw:?}")]
    InvalidMillis { var: &'static str, raw: String },
    #[error("{var} must not be empty")]
    Empty { var: &'static str },
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}
