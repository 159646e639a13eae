//! Core types shared across the update engine.
//!
//! - [`state`]: the workflow [`UpdateState`] machine vocabulary and the
//!   user-visible [`UpdateStatus`]
//! - [`error`]: the typed [`UpdateError`] taxonomy and operator-facing
//!   [`ErrorContext`]

pub mod error;
pub mod state;

pub use error::{ErrorContext, ErrorKind, Recovery, UpdateError, user_friendly_error};
pub use state::{UpdateState, UpdateStatus};
