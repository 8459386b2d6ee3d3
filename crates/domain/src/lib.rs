//! Shared domain types for Loft: configuration, errors, the event wire
//! protocol, provider-agnostic messages, and the abstract model stream.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod policy;
pub mod scripted;
pub mod stream;

pub use error::{Error, Result};
