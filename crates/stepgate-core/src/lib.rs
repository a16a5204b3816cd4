pub mod admission;
pub mod auth;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod sink;
pub mod task;

pub use error::{ConfigError, Result, StepError, StepgateError, StorageError, WriteError};
