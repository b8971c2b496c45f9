//! Shared types, error model, and configuration for ContentFlow.
//!
//! This crate is the foundation depended on by all other ContentFlow crates.
//! It provides:
//! - [`ContentFlowError`]: the unified error type
//! - Domain types ([`Task`], [`WorkflowState`], [`ContentType`], [`ContentRecord`], [`RunId`])
//! - Configuration ([`AppConfig`], [`RunConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassifierConfig, FormatConfig, MismatchPolicy, RetryConfig, RunConfig,
    RunSection, StatusNames, StoreConfig, TrackerConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, tracker_token,
};
pub use error::{ContentFlowError, Result};
pub use types::{
    BLOCK_CLOSE, BLOCK_OPEN, BodyParagraph, ContentRecord, ContentType, RunId,
    STORE_TIMESTAMP_FORMAT, Tags, Task, WorkflowState,
};
