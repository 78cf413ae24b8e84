//! Shared domain types for the Aragora debate platform.
//!
//! This crate is pure data: entities, the event envelope, configuration and
//! the shared error type. It performs no I/O so every other crate can depend
//! on it without pulling in a runtime.

pub mod config;
pub mod debate;
pub mod error;
pub mod event;
pub mod ranking;
pub mod stream;

pub use error::{Error, Result};
