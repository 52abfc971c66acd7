//! Persistent records: the dependency graph, release lines, build heads and
//! stored versions.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Env, Result,
  version::{self, compare},
};

// ─── Dependency graph ────────────────────────────────────────────────────────

/// First-level dependents of a package. Membership is unique.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRecord {
  pub name:       String,
  pub dependents: BTreeSet<String>,
}

/// The single parent a package is tracked under. Last writer wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentOfRecord {
  pub pkg:          String,
  pub dependent_of: String,
}

// ─── Release line ────────────────────────────────────────────────────────────

/// One link of a release line: the dependent versions bundled with `pkg` at
/// `version`. Entries form a backward chain through `previous_version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLine {
  pub pkg:              String,
  pub version:          String,
  pub previous_version: Option<String>,
  pub dependents:       BTreeMap<String, String>,
  /// Server-assigned timestamp; never changes after creation.
  pub created_at:       DateTime<Utc>,
}

/// Input to [`crate::store::FeedStore::create_release_line`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReleaseLine {
  pub pkg:              String,
  pub version:          String,
  pub previous_version: Option<String>,
}

// ─── Build head ──────────────────────────────────────────────────────────────

/// The last version built for a package in one environment, plus the builds
/// recorded by rollbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHead {
  pub env:                Env,
  pub name:               String,
  pub version:            String,
  /// Rollback timestamp → `name!env!version!locale` build key.
  pub rollback_build_ids: BTreeMap<String, String>,
}

impl BuildHead {
  /// The baseline used when a package has never been built in `env`.
  pub fn initial(env: Env, name: impl Into<String>) -> Self {
    Self {
      env,
      name: name.into(),
      version: "0.0.0".to_owned(),
      rollback_build_ids: BTreeMap::new(),
    }
  }

  /// The highest version among the head and every rollback-recorded build.
  ///
  /// A rollback moves `version` backwards, so the head alone can name a
  /// version that was already superseded. Build keys that fail to decode or
  /// carry an unparsable version are ignored.
  pub fn latest(&self) -> Result<semver::Version> {
    let head = version::parse(&self.version)?;
    Ok(
      self
        .rollback_build_ids
        .values()
        .filter_map(|key| BuildKey::decode(key))
        .filter_map(|key| version::parse(&key.version).ok())
        .fold(head, |best, v| {
          if compare(&v, &best).is_gt() { v } else { best }
        }),
    )
  }
}

/// A composite build identifier, `name!env!version!locale`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildKey {
  pub name:    String,
  pub env:     String,
  pub version: String,
  pub locale:  String,
}

impl BuildKey {
  pub fn decode(key: &str) -> Option<Self> {
    let mut parts = key.split('!');
    let key = Self {
      name:    parts.next()?.to_owned(),
      env:     parts.next()?.to_owned(),
      version: parts.next()?.to_owned(),
      locale:  parts.next().unwrap_or_default().to_owned(),
    };
    Some(key)
  }
}

// ─── Stored versions ─────────────────────────────────────────────────────────

/// A stored publish of `name@version`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
  /// `name@version`.
  pub version_id:  String,
  pub name:        String,
  pub version:     String,
  /// The original publish payload, as JSON text.
  pub value:       String,
  /// Tarball attachments keyed by tarball file name; `None` when the
  /// tarball was never stored.
  pub attachments: Option<Map<String, Value>>,
}

impl VersionRecord {
  pub fn id(name: &str, version: &str) -> String { format!("{name}@{version}") }
}

/// A stored payload together with its tarball attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionAttachment {
  pub value:       Value,
  pub attachments: Map<String, Value>,
}
