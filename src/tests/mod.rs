//! Consolidated test modules.
//!
//! End-to-end tests that drive whole retention cycles against a scratch
//! directory.

mod retention_e2e;
