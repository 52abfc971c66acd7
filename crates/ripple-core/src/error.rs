//! Error types for `ripple-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The change payload is missing a resolvable name or version.
  #[error("invalid payload: {0}")]
  InvalidPayload(String),

  #[error("unknown environment: {0:?}")]
  InvalidEnvironment(String),

  #[error("invalid version {version:?}: {source}")]
  InvalidVersion {
    version: String,
    #[source]
    source:  semver::Error,
  },

  /// The selected increment strategy has no version to increment from.
  #[error("no base version for the {0} strategy")]
  MissingBaseVersion(&'static str),

  /// A store, registry, or build-service call failed.
  #[error("upstream unavailable: {0}")]
  Upstream(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Wrap any collaborator error as [`Error::Upstream`].
  pub fn upstream<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Upstream(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
