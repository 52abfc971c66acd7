//! Expanding a stored version into a buildable payload.
//!
//! A stored publish payload is the source of truth for what gets rebuilt,
//! but the package record may know things the payload does not (newer dist
//! tags, manifest fields). [`MergePolicy`] layers the record onto the
//! payload through an ordered list of field rules.

use serde_json::{Map, Value};

use crate::{
  Env, Result,
  package::{LATEST_TAG, PackageRecord, RegistryPayload},
  records::VersionAttachment,
};

/// Payload keys owned by typed [`RegistryPayload`] fields. Record extras
/// under these names are never copied.
const RESERVED: &[&str] = &[
  "name",
  "version",
  "dist-tags",
  "distTags",
  "versions",
  "_attachments",
  "__published",
  "env",
];

/// One field-level rule. Rules run in the order the policy lists them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
  /// Take the record's name and version when the payload has none.
  IdentityIfMissing,
  /// Take the record's dependencies when the payload has no top-level
  /// `dependencies`.
  DependenciesIfMissing,
  /// Layer every record dist tag over the payload's, except `preserve`.
  LayerDistTags { preserve: &'static str },
  /// Copy each remaining record field the payload does not carry.
  ExtraIfMissing,
}

/// Ordered merge rules; payload-native fields win unless a rule says
/// otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
  rules: Vec<MergeRule>,
}

impl Default for MergePolicy {
  fn default() -> Self {
    Self { rules: vec![
      MergeRule::IdentityIfMissing,
      MergeRule::DependenciesIfMissing,
      MergeRule::LayerDistTags { preserve: LATEST_TAG },
      MergeRule::ExtraIfMissing,
    ] }
  }
}

impl MergePolicy {
  /// Apply every rule to `payload`.
  pub fn apply(&self, payload: &mut RegistryPayload, record: &PackageRecord) {
    for rule in &self.rules {
      apply_rule(*rule, payload, record);
    }
  }

  /// Rebuild the payload stored in `attachment`, merge `record` onto it and
  /// force the target environment.
  pub fn expand(
    &self,
    attachment: VersionAttachment,
    record: &PackageRecord,
    env: Env,
  ) -> Result<RegistryPayload> {
    let mut payload: RegistryPayload = serde_json::from_value(attachment.value)?;
    payload.attachments = attachment.attachments;
    self.apply(&mut payload, record);
    payload.env = Some(env.as_str().to_owned());
    Ok(payload)
  }
}

fn apply_rule(rule: MergeRule, payload: &mut RegistryPayload, record: &PackageRecord) {
  match rule {
    MergeRule::IdentityIfMissing => {
      if payload.name.is_empty() {
        payload.name = record.name.clone();
      }
      if payload.version.is_none() {
        payload.version = Some(record.version.clone());
      }
    }
    MergeRule::DependenciesIfMissing => {
      if !payload.extra.contains_key("dependencies") {
        let deps: Map<String, Value> = record
          .dependencies
          .iter()
          .map(|(k, v)| (k.clone(), Value::String(v.clone())))
          .collect();
        payload.extra.insert("dependencies".to_owned(), Value::Object(deps));
      }
    }
    MergeRule::LayerDistTags { preserve } => {
      for (tag, version) in &record.dist_tags {
        if tag != preserve {
          payload.dist_tags.insert(tag.clone(), version.clone());
        }
      }
    }
    MergeRule::ExtraIfMissing => {
      for (key, value) in &record.extra {
        if RESERVED.contains(&key.as_str()) || payload.extra.contains_key(key) {
          continue;
        }
        payload.extra.insert(key.clone(), value.clone());
      }
    }
  }
}
