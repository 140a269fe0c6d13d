//! OpsDash Shared Types and Utilities
//!
//! This crate contains the domain types and database utilities shared across
//! the OpsDash platform.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod db;
pub mod types;

pub use db::*;
pub use types::*;
