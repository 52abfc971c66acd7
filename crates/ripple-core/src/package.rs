//! Registry payloads and the package descriptors extracted from them.
//!
//! A registry payload is the document an npm-compatible registry accepts on
//! publish: top-level `name`, a `dist-tags` map, a `versions` map of
//! manifests and an `_attachments` map of tarballs. Only the manifest tagged
//! `latest` matters to Ripple. Unknown fields are carried through untouched
//! so that a payload can be re-published after its version is rewritten.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

/// Name of the distribution tag that points at the version Ripple acts on.
pub const LATEST_TAG: &str = "latest";

// ─── Manifest ────────────────────────────────────────────────────────────────

/// One entry of a payload's `versions` map (a `package.json` as published).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name:         Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version:      Option<String>,
  #[serde(default)]
  pub dependencies: BTreeMap<String, String>,
  /// `name@version`, set by the publishing client.
  #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
  pub id:           Option<String>,
  #[serde(flatten)]
  pub extra:        Map<String, Value>,
}

// ─── RegistryPayload ─────────────────────────────────────────────────────────

/// A full publish document as received from (or sent to) the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryPayload {
  #[serde(default)]
  pub name:        String,
  /// Top-level version; present on payloads Ripple has rewritten.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version:     Option<String>,
  #[serde(rename = "dist-tags", alias = "distTags", default)]
  pub dist_tags:   BTreeMap<String, String>,
  #[serde(default)]
  pub versions:    BTreeMap<String, Manifest>,
  #[serde(rename = "_attachments", default, deserialize_with = "lenient_map")]
  pub attachments: Map<String, Value>,
  /// Set when the change was caused by a registry publish rather than a
  /// rebuild.
  #[serde(rename = "__published", default, skip_serializing_if = "is_false")]
  pub published:   bool,
  /// Environment the payload is being built for.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub env:         Option<String>,
  #[serde(flatten)]
  pub extra:       Map<String, Value>,
}

impl RegistryPayload {
  /// The version the `latest` tag points at, if any.
  pub fn latest_version(&self) -> Option<&str> {
    self.dist_tags.get(LATEST_TAG).map(String::as_str)
  }

  /// The manifest tagged `latest`; an empty manifest when the tag or the
  /// entry is missing.
  pub fn latest(&self) -> Manifest {
    self
      .latest_version()
      .and_then(|v| self.versions.get(v))
      .cloned()
      .unwrap_or_default()
  }

  /// Extract the tagged-latest [`PackageDescriptor`], rejecting payloads
  /// without a resolvable name and version.
  pub fn descriptor(&self) -> Result<PackageDescriptor> {
    let latest = self.latest();
    let name = latest
      .name
      .clone()
      .filter(|n| !n.is_empty())
      .or_else(|| Some(self.name.clone()).filter(|n| !n.is_empty()))
      .ok_or_else(|| Error::InvalidPayload("payload has no package name".into()))?;
    let version = latest
      .version
      .clone()
      .filter(|v| !v.is_empty())
      .ok_or_else(|| {
        Error::InvalidPayload(format!("payload for {name} has no tagged-latest version"))
      })?;

    Ok(PackageDescriptor { name, version, dependencies: latest.dependencies })
  }
}

fn is_false(b: &bool) -> bool { !*b }

/// Accept any JSON value for a map field, treating non-objects as empty.
/// Some registries send `"_attachments": ""` on metadata-only payloads.
fn lenient_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Value::deserialize(deserializer)? {
    Value::Object(map) => map,
    _ => Map::new(),
  })
}

// ─── PackageDescriptor ───────────────────────────────────────────────────────

/// Immutable snapshot of the tagged-latest manifest of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
  pub name:         String,
  pub version:      String,
  pub dependencies: BTreeMap<String, String>,
}

// ─── PackageRecord ───────────────────────────────────────────────────────────

/// A managed package as known to the package store. Membership in the
/// package store is what makes a dependency "managed".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
  pub name:         String,
  pub version:      String,
  #[serde(rename = "distTags", default)]
  pub dist_tags:    BTreeMap<String, String>,
  #[serde(default)]
  pub dependencies: BTreeMap<String, String>,
  /// Remaining manifest fields (`main`, `config`, ...).
  #[serde(flatten)]
  pub extra:        Map<String, Value>,
}
