//! Release-line bookkeeping on top of [`FeedStore`].

use std::{cmp::Ordering, collections::HashSet, sync::Arc};

use ripple_core::{
  records::{NewReleaseLine, ReleaseLine},
  store::FeedStore,
  version,
};
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub struct ReleaseLineManager<S> {
  store: Arc<S>,
}

impl<S: FeedStore> ReleaseLineManager<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  /// The `(pkg, version)` entry, or the head of `pkg`'s line.
  pub async fn get(&self, pkg: &str, version: Option<&str>) -> Result<Option<ReleaseLine>> {
    self.store.get_release_line(pkg, version).await.map_err(Error::upstream)
  }

  /// Append an entry. An existing `(pkg, version)` entry is left untouched
  /// and `false` is returned.
  pub async fn create(&self, input: NewReleaseLine) -> Result<bool> {
    let (pkg, version) = (input.pkg.clone(), input.version.clone());
    let created = self.store.create_release_line(input).await.map_err(Error::upstream)?;
    if created {
      info!(%pkg, %version, "created release line");
    } else {
      warn!(%pkg, %version, "release line already exists");
    }
    Ok(created)
  }

  /// Add `pkg@version` below the newest entry that outranks it, so versions
  /// never increase from `head` towards the tail. A version newer than
  /// `head` becomes the new head; an older one is spliced into the chain.
  pub async fn append(&self, pkg: &str, version: &str, head: Option<&ReleaseLine>) -> Result<bool> {
    let input = |previous_version: Option<String>| NewReleaseLine {
      pkg: pkg.to_owned(),
      version: version.to_owned(),
      previous_version,
    };

    let Some(head) = head else {
      return self.create(input(None)).await;
    };
    let Ok(new) = version::parse(version) else {
      warn!(pkg, version, "unparsable version; appending behind the head");
      return self.create(input(Some(head.version.clone()))).await;
    };

    let mut successor = None;
    let below = self
      .walk(head.clone(), |line| {
        let outranks = version::parse(&line.version)
          .is_ok_and(|v| version::compare(&v, &new) == Ordering::Greater);
        if outranks {
          successor = Some(line.version.clone());
        }
        outranks
      })
      .await?;

    let input = input(below.map(|line| line.version));
    let Some(successor) = successor else {
      return self.create(input).await;
    };

    let created = self
      .store
      .splice_release_line(input, &successor)
      .await
      .map_err(Error::upstream)?;
    if created {
      info!(pkg, version, %successor, "spliced release line below a newer entry");
    } else {
      warn!(pkg, version, "release line already exists");
    }
    Ok(created)
  }

  pub async fn add_dependent(
    &self,
    pkg: &str,
    version: &str,
    dependent: &str,
    dependent_version: &str,
  ) -> Result<bool> {
    debug!(pkg, version, dependent, dependent_version, "adding dependent to release line");
    self
      .store
      .add_release_dependent(pkg, version, dependent, dependent_version)
      .await
      .map_err(Error::upstream)
  }

  /// Follow `previous_version` from `start` while `condition` holds and
  /// return the first entry it does not hold for.
  ///
  /// Returns `None` when the chain ends, points at a missing entry, or loops
  /// back on itself before that. Each entry is read at most once.
  pub async fn walk<F>(&self, start: ReleaseLine, mut condition: F) -> Result<Option<ReleaseLine>>
  where
    F: FnMut(&ReleaseLine) -> bool,
  {
    let mut visited = HashSet::from([start.version.clone()]);
    let mut line = start;

    loop {
      if !condition(&line) {
        return Ok(Some(line));
      }

      let Some(previous) = line.previous_version.take() else {
        return Ok(None);
      };

      if !visited.insert(previous.clone()) {
        warn!(pkg = %line.pkg, version = %previous, "release line loops back on itself");
        return Ok(None);
      }

      match self.get(&line.pkg, Some(&previous)).await? {
        Some(next) => line = next,
        None => {
          debug!(pkg = %line.pkg, version = %previous, "release line points at a missing entry");
          return Ok(None);
        }
      }
    }
  }
}
