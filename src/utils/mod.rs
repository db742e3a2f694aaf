//! Utilities for curly.
//!
//! Submodules:
//! - `variables`: `${name}` placeholder scanning, resolution and secret redaction.

pub mod variables;
