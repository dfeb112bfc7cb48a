//! # CineFacts Common Library
//!
//! Shared code for the CineFacts services:
//! - Error and result types
//! - Bootstrap configuration (root folder resolution, TOML bootstrap file)
//! - Tracing initialisation
//! - Time helpers used by freshness calculations

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
