//! Core types and trait definitions for the Ripple trigger engine.
//!
//! This crate has no HTTP or database dependencies. The decision logic
//! (trigger strategy, version increment, payload merge) lives here as pure
//! functions; storage and network collaborators are expressed as traits
//! implemented elsewhere.

pub mod client;
pub mod env;
pub mod error;
pub mod increment;
pub mod merge;
pub mod package;
pub mod records;
pub mod store;
pub mod strategy;
pub mod version;

pub use env::Env;
pub use error::{Error, Result};
