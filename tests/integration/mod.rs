//! Integration test suite for safeup
//!
//! End-to-end tests that drive the `safeup` binary and the embeddable engine
//! against real installations in temporary directories. Releases are served
//! from `file://` URLs, so no network access is needed.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: the `safeup` binary, its output formats and exit codes
//! - **workflow**: the library engine over local releases, config lookup

mod cli;
mod workflow;
