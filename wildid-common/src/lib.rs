//! # wildid Common Library
//!
//! Shared code for wildid crates:
//! - Error type
//! - Configuration file resolution and TOML loading
//! - Logging configuration

pub mod config;
pub mod error;

pub use error::{Error, Result};
