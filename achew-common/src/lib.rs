//! # achew common library
//!
//! Shared code for the achew client crates including:
//! - Wire models for the pipeline request/response contract
//! - Push event types (PushEvent enum)
//! - Error taxonomy
//! - Configuration loading
//! - Chapter timestamp parsing

pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod time;

pub use error::{Error, RequestCategory, Result};
pub use events::{EventKind, PushEvent};
