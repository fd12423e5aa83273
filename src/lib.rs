//! koistats library
//!
//! Exposes the statistics cache, the NASA archive client, table export and
//! the CLI plumbing for use by the binary and integration tests.

pub mod cache;
pub mod cli;
pub mod config;
pub mod data;
pub mod export;
pub mod refresh;
