//! # tenk Common Library
//!
//! Shared code for the tenk analysis engine:
//! - Common error type
//! - TOML + environment configuration loading
//! - Event types and broadcast bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
