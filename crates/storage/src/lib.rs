#![forbid(unsafe_code)]

pub mod progress_store;
pub mod repository;
pub mod sqlite;

pub use progress_store::{ProgressRecord, ProgressStore, progress_key, step_data_key};
pub use repository::{InMemoryRepository, KeyValueStore, Storage, StorageError};
