//! Shared types for Placelore services
//!
//! Common error type, configuration loading, and the pipeline event bus
//! used by the discovery pipeline service and its operator surface.

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
