//! # TLG Common Library
//!
//! Shared code for the task list generator crates:
//! - Error type
//! - Configuration loading (TOML + environment)
//! - Event types emitted by a query run

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::TlgEvent;
