//! Core types and traits for stevedore.
//!
//! This crate provides the fundamental pieces shared by the engine crates:
//! the error taxonomy, the hierarchical file store abstraction, and the
//! engine configuration.

mod config;
mod error;
mod local;
mod store;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{ErrorCategory, Failure, OpsError};
pub use local::LocalStore;
pub use store::{FileStore, FileType, ItemAttrs};
