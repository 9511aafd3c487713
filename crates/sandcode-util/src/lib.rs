//! Shared utilities for sandcode.
//!
//! This crate provides common utilities used across the sandcode workspace:
//! - Project-root path safety (`resolve_within_root`, `safe_join`)
//! - ULID-based identifier generation
//! - Logging setup with tracing
//! - Wildcard pattern matching for consent rules

pub mod id;
pub mod log;
pub mod path;
pub mod wildcard;

pub use id::{IdPrefix, Identifier};
pub use path::{resolve_within_root, safe_join, PathSafetyError};
