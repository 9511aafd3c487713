//! Core coordination layer for sandcode.
//!
//! This crate ties the tool runtime to a project:
//! - Configuration management (multi-source, JSONC support)
//! - Project instances that own the state shared across turns
//! - Turn orchestration over streamed tool calls

pub mod config;
pub mod error;
pub mod instance;
pub mod turn;

pub use config::Config;
pub use error::{ConfigError, CoreError, CoreResult};
pub use instance::Instance;
pub use turn::{StreamChunk, Turn, TurnResult};
