#![forbid(unsafe_code)]

pub mod app_services;
pub mod config;
pub mod error;
pub mod scheduler;
pub mod sessions;

pub use unitflow_core::Clock;
pub use sessions as session;

pub use app_services::AppServices;
pub use config::EngineConfig;
pub use error::{AppServicesError, ConfigError, SessionError};
pub use scheduler::{AutoAdvanceScheduler, CancelHandle};
pub use sessions::{PageCompletion, SessionProgress, UnitOverview, UnitSession};
