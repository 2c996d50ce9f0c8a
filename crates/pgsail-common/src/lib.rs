//! Common utilities for pgsail
//!
//! This crate provides the error type shared by the pgsail crates.

pub mod error;

pub use error::{AdapterError, Result};
