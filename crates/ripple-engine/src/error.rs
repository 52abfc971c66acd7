//! Error type for `ripple-engine`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] ripple_core::Error),

  /// The build service reported an `error` event.
  #[error("build failed: {0}")]
  BuildFailed(String),

  #[error("build status stream ended without a status")]
  EmptyBuildLog,
}

impl Error {
  /// Wrap any collaborator error as an upstream failure.
  pub fn upstream<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Core(ripple_core::Error::upstream(err))
  }

  /// Whether the change was rejected before any mutation.
  pub fn is_rejection(&self) -> bool {
    matches!(
      self,
      Self::Core(ripple_core::Error::InvalidPayload(_) | ripple_core::Error::InvalidEnvironment(_))
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
