//! Network collaborators: the build service and the registry gateway.
//!
//! Transport details (HTTP, retries, authentication) belong to the
//! implementations; the engine only sees these traits.

use std::{collections::BTreeMap, future::Future};

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{package::RegistryPayload, version};

// ─── Build service ───────────────────────────────────────────────────────────

/// A build submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
  pub promote: bool,
  pub data:    RegistryPayload,
}

/// One status event from a build log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildEvent {
  #[serde(default)]
  pub event:   String,
  #[serde(flatten)]
  pub details: Map<String, Value>,
}

impl BuildEvent {
  pub fn is_error(&self) -> bool { self.event == "error" }
}

/// The status stream returned for a submitted build.
pub type BuildStream<E> = BoxStream<'static, Result<BuildEvent, E>>;

pub trait BuildService: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Submit a build and return its status stream.
  fn build(
    &self,
    request: BuildRequest,
  ) -> impl Future<Output = Result<BuildStream<Self::Error>, Self::Error>> + Send + '_;
}

// ─── Registry gateway ────────────────────────────────────────────────────────

/// Registry metadata for a package: every version ever published.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryDocument {
  #[serde(default)]
  pub versions: BTreeMap<String, Value>,
  #[serde(flatten)]
  pub extra:    Map<String, Value>,
}

impl RegistryDocument {
  /// Published versions, newest first. Unparsable keys are skipped.
  pub fn sorted_versions(&self) -> Vec<semver::Version> {
    let mut versions: Vec<semver::Version> = self
      .versions
      .keys()
      .filter_map(|v| version::parse(v).ok())
      .collect();
    versions.sort_by(|a, b| version::compare(b, a));
    versions
  }
}

pub trait RegistryGateway: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Publish `data` as a new version of `name`.
  fn publish<'a>(
    &'a self,
    name: &'a str,
    data: &'a RegistryPayload,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Fetch the registry document for `name`; `None` when the registry does
  /// not know the package.
  fn fetch<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<RegistryDocument>, Self::Error>> + Send + 'a;
}
