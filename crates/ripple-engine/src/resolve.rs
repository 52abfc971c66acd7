//! Dependency graph bookkeeping.

use std::sync::Arc;

use ripple_core::{
  Env,
  package::PackageDescriptor,
  records::{DependentOfRecord, DependentRecord},
  store::FeedStore,
};
use tracing::{debug, info, warn};

use crate::{Error, Limiter, Result};

/// Records a package as a first-level dependent of each managed dependency.
pub struct GraphResolver<S> {
  store:   Arc<S>,
  limiter: Limiter,
}

impl<S: FeedStore> GraphResolver<S> {
  pub fn new(store: Arc<S>, limiter: Limiter) -> Self { Self { store, limiter } }

  /// Update `Dependent` and `DependentOf` for every managed dependency of
  /// `pkg`, returning the managed dependency names. Running it twice for the
  /// same package leaves the graph unchanged.
  pub async fn resolve(&self, env: Env, pkg: &PackageDescriptor) -> Result<Vec<String>> {
    debug!(%env, name = %pkg.name, "resolving dependents");

    let managed = self
      .limiter
      .map(pkg.dependencies.keys(), |dep| self.is_managed(dep))
      .await;
    let managed: Vec<String> = pkg
      .dependencies
      .keys()
      .zip(managed)
      .filter_map(|(dep, managed)| managed.then(|| dep.clone()))
      .collect();

    debug!(name = %pkg.name, count = managed.len(), "found managed dependencies");

    self
      .limiter
      .map(&managed, |dep| self.resolve_one(&pkg.name, dep))
      .await
      .into_iter()
      .collect::<Result<Vec<()>>>()?;

    Ok(managed)
  }

  /// Lookup failures count as "not managed".
  async fn is_managed(&self, name: &str) -> bool {
    match self.store.get_package(name).await {
      Ok(Some(_)) => true,
      Ok(None) => {
        debug!(dependency = name, "not managed");
        false
      }
      Err(e) => {
        warn!(dependency = name, error = %e, "package lookup failed; treating as not managed");
        false
      }
    }
  }

  async fn resolve_one(&self, name: &str, dependency: &str) -> Result<()> {
    let (dependent, dependent_of) = tokio::join!(
      self.add_dependent(name, dependency),
      self.set_dependent_of(name, dependency),
    );
    dependent.and(dependent_of)
  }

  async fn add_dependent(&self, name: &str, dependency: &str) -> Result<()> {
    let existing = self.store.get_dependent(dependency).await.map_err(Error::upstream)?;

    match existing {
      Some(record) if record.dependents.contains(name) => {
        debug!(dependency, dependent = name, "already a dependent");
        Ok(())
      }
      Some(_) => {
        info!(dependency, dependent = name, "appending dependent");
        self
          .store
          .add_dependents(dependency, &[name.to_owned()])
          .await
          .map_err(Error::upstream)
      }
      None => {
        info!(dependency, dependent = name, "creating dependents record");
        self
          .store
          .create_dependent(DependentRecord {
            name:       dependency.to_owned(),
            dependents: [name.to_owned()].into(),
          })
          .await
          .map_err(Error::upstream)
      }
    }
  }

  async fn set_dependent_of(&self, name: &str, dependency: &str) -> Result<()> {
    debug!(pkg = name, dependent_of = dependency, "recording parent");
    self
      .store
      .put_dependent_of(DependentOfRecord {
        pkg:          name.to_owned(),
        dependent_of: dependency.to_owned(),
      })
      .await
      .map_err(Error::upstream)
  }
}
