//! The change-processing engine.
//!
//! A change event flows through the [`GraphResolver`] (dependency graph
//! bookkeeping) and then the [`Dispatcher`], which records release lines and
//! fans out to every dependent of the changed package under a [`Limiter`].

pub mod dispatch;
pub mod error;
pub mod limiter;
pub mod outcome;
pub mod release;
pub mod resolve;

pub use dispatch::{Dispatcher, EngineConfig};
pub use error::{Error, Result};
pub use limiter::Limiter;
pub use outcome::{ChangeReport, DependentOutcome, SkipReason, Stage, TriggerOutcome};
pub use release::ReleaseLineManager;
pub use resolve::GraphResolver;
