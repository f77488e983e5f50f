//! Shared test utilities for mailsort integration tests.
//!
//! This module provides:
//! - Builders for rules and fetched messages
//! - In-memory fakes for the provider and the model service
//! - `TestHarness`, a wired pipeline over an in-memory record store

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{password_credentials, TestHarness};
