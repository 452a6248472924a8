//! Shared test utilities for epubpress integration tests.
//!
//! This module provides:
//! - `EpubBuilder` for writing real EPUB archives programmatically
//! - `TestHarness` for isolated queue runs over temp directories
//! - Fake extractors for observing what the workers do

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
