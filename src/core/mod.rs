//! Core types shared across the launcher.
//!
//! Currently this holds the [`LaunchError`] taxonomy. All fatal failures in
//! the update/launch pipeline funnel into one of its variants so the embedding
//! shell can render a single "initialization failed" surface.

pub mod error;

pub use error::{LaunchError, Result};
