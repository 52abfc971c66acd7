//! Version increment: compute the version a dependent build or publish is
//! issued under, and rewrite the payload to carry it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
  Error, Result,
  package::{LATEST_TAG, RegistryPayload},
  records::BuildHead,
  strategy::Strategy,
  version::{self, compare},
};

/// What the dispatcher does with an incremented payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  /// Submit to the build service.
  Build,
  /// Publish to the registry as a new version.
  Publish,
}

/// Input to [`increment`].
#[derive(Debug, Clone, Copy)]
pub struct IncrementInput<'a> {
  pub strategy:                 Strategy,
  pub payload:                  &'a RegistryPayload,
  pub head:                     &'a BuildHead,
  /// Dependent version recorded in the root's release line.
  pub release_version:          Option<&'a str>,
  /// Dependent version recorded in an older release line entry.
  pub previous_release_version: Option<&'a str>,
  /// Whether the triggering change was a registry publish.
  pub publish:                  bool,
}

/// Output of [`increment`].
#[derive(Debug, Clone, PartialEq)]
pub struct Incremented {
  pub payload: RegistryPayload,
  pub action:  Action,
  /// The version the payload now carries.
  pub version: Option<String>,
  /// `false` when the payload was returned untouched.
  pub changed: bool,
}

/// Compute the next version for `input.payload` and rewrite a copy of it.
pub fn increment(input: IncrementInput<'_>) -> Result<Incremented> {
  let action = if input.publish { Action::Publish } else { Action::Build };
  let latest = input.payload.latest();
  let name = latest.name.clone().unwrap_or_else(|| input.payload.name.clone());
  let prev_version = latest.version.clone().or_else(|| input.payload.version.clone());

  let next = match input.strategy {
    Strategy::Release => input
      .release_version
      .map(str::to_owned)
      .or_else(|| latest.version.clone()),
    Strategy::Previous => {
      let base = input
        .previous_release_version
        .ok_or(Error::MissingBaseVersion("previous"))?;
      Some(version::inc_prerelease(&version::parse(base)?)?.to_string())
    }
    Strategy::Next => {
      let base = prev_version.as_deref().ok_or(Error::MissingBaseVersion("next"))?;
      Some(version::inc_major(&version::parse(base)?).to_string())
    }
    Strategy::Current | Strategy::Legacy => {
      Some(from_head(latest.version.as_deref(), input.head)?)
    }
  };

  let Some(next) = next.filter(|v| Some(v) != latest.version.as_ref()) else {
    return Ok(Incremented {
      payload: input.payload.clone(),
      action,
      version: latest.version,
      changed: false,
    });
  };

  let mut payload = input.payload.clone();

  let mut manifest = latest;
  manifest.version = Some(next.clone());
  manifest.id = Some(format!("{name}@{next}"));

  payload.version = Some(next.clone());
  // Only the new version is carried forward so payloads do not grow with
  // every rebuild.
  payload.versions = BTreeMap::from([(next.clone(), manifest)]);
  payload.dist_tags.insert(LATEST_TAG.to_owned(), next.clone());
  rekey_tarball(&mut payload.attachments, &name, prev_version.as_deref(), &next);

  if input.publish {
    payload.published = true;
  }

  Ok(Incremented { payload, action, version: Some(next), changed: true })
}

/// Increment from the build head, guarding against rollbacks: a payload
/// version at or below the latest head of the same major is stale and the
/// head is incremented instead.
fn from_head(current: Option<&str>, head: &BuildHead) -> Result<String> {
  let latest_head = head.latest()?;

  let base = match current {
    None => latest_head,
    Some(current) => {
      let current = version::parse(current)?;
      if compare(&current, &latest_head).is_le() && current.major == latest_head.major {
        latest_head
      } else {
        current
      }
    }
  };

  Ok(version::inc_prerelease(&base)?.to_string())
}

/// Move the tarball stored for `prev` to the file name of `next`. Tarball
/// content does not change with the version, so it is reused as-is.
fn rekey_tarball(
  attachments: &mut Map<String, Value>,
  name: &str,
  prev: Option<&str>,
  next: &str,
) {
  let prev_tar = format!("{name}-{}.tgz", prev.unwrap_or_default());
  let source = if attachments.contains_key(&prev_tar) {
    Some(prev_tar)
  } else {
    attachments.keys().next().cloned()
  };

  let content = source
    .and_then(|key| attachments.remove(&key))
    .unwrap_or_else(|| Value::Object(Map::new()));
  attachments.insert(format!("{name}-{next}.tgz"), content);
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::Env;

  fn payload(name: &str, version: &str) -> RegistryPayload {
    serde_json::from_value(json!({
      "name": name,
      "dist-tags": { "latest": version, "beta": "9.9.9-beta" },
      "versions": {
        version: { "name": name, "version": version, "dependencies": { "cows": "*" } }
      },
      "_attachments": {
        format!("{name}-{version}.tgz"): { "data": "dGFyYmFsbA==" }
      }
    }))
    .unwrap()
  }

  fn head(version: &str) -> BuildHead {
    BuildHead { version: version.into(), ..BuildHead::initial(Env::Dev, "email") }
  }

  fn input<'a>(
    strategy: Strategy,
    payload: &'a RegistryPayload,
    head: &'a BuildHead,
  ) -> IncrementInput<'a> {
    IncrementInput {
      strategy,
      payload,
      head,
      release_version: None,
      previous_release_version: None,
      publish: false,
    }
  }

  #[test]
  fn legacy_bumps_prerelease_and_renames_tarball() {
    let p = payload("email", "2.0.0");
    let h = head("2.0.0");
    let out = increment(IncrementInput { publish: true, ..input(Strategy::Legacy, &p, &h) }).unwrap();

    assert_eq!(out.action, Action::Publish);
    assert_eq!(out.version.as_deref(), Some("2.0.1-0"));
    assert_eq!(out.payload.latest_version(), Some("2.0.1-0"));
    assert_eq!(out.payload.version.as_deref(), Some("2.0.1-0"));
    assert_eq!(out.payload.versions.len(), 1);
    assert_eq!(out.payload.latest().id.as_deref(), Some("email@2.0.1-0"));
    assert!(out.payload.attachments.contains_key("email-2.0.1-0.tgz"));
    assert!(!out.payload.attachments.contains_key("email-2.0.0.tgz"));
    assert_eq!(out.payload.attachments["email-2.0.1-0.tgz"]["data"], "dGFyYmFsbA==");
    assert!(out.payload.published);
    // Other tags are left alone.
    assert_eq!(out.payload.dist_tags["beta"], "9.9.9-beta");
  }

  #[test]
  fn current_increments_from_rollback_aware_head() {
    let p = payload("some-package", "2.3.9-1");
    let mut h = head("2.3.9-1");
    h.rollback_build_ids.insert(
      "Thu Jun 08 2017 02:27:11 GMT+0000 (UTC)".into(),
      "some-package!dev!2.3.9-2!en-US".into(),
    );

    let out = increment(input(Strategy::Current, &p, &h)).unwrap();
    assert_eq!(out.version.as_deref(), Some("2.3.9-3"));
    assert_eq!(out.action, Action::Build);
  }

  #[test]
  fn current_increments_payload_when_ahead_of_head() {
    let p = payload("email", "2.4.0");
    let h = head("2.3.9-1");
    let out = increment(input(Strategy::Current, &p, &h)).unwrap();
    assert_eq!(out.version.as_deref(), Some("2.4.1-0"));
  }

  #[test]
  fn current_ignores_head_on_other_major() {
    let p = payload("email", "2.0.0");
    let h = head("3.0.0-4");
    let out = increment(input(Strategy::Current, &p, &h)).unwrap();
    assert_eq!(out.version.as_deref(), Some("2.0.1-0"));
  }

  #[test]
  fn release_replays_recorded_version_unchanged() {
    let p = payload("email", "2.0.1-0");
    let h = head("2.0.1-3");
    let out = increment(IncrementInput {
      release_version: Some("2.0.1-0"),
      ..input(Strategy::Release, &p, &h)
    })
    .unwrap();

    assert!(!out.changed);
    assert_eq!(out.version.as_deref(), Some("2.0.1-0"));
    assert_eq!(out.payload, p);
  }

  #[test]
  fn release_without_recorded_version_keeps_payload() {
    let p = payload("email", "2.0.0");
    let h = head("2.0.0");
    let out = increment(input(Strategy::Release, &p, &h)).unwrap();
    assert!(!out.changed);
  }

  #[test]
  fn previous_increments_previous_release_version() {
    let p = payload("huh", "3.0.0");
    let h = head("3.0.0");
    let out = increment(IncrementInput {
      previous_release_version: Some("2.0.0"),
      ..input(Strategy::Previous, &p, &h)
    })
    .unwrap();
    assert_eq!(out.version.as_deref(), Some("2.0.1-0"));
    assert!(out.payload.attachments.contains_key("huh-2.0.1-0.tgz"));
  }

  #[test]
  fn previous_without_base_is_an_error() {
    let p = payload("huh", "3.0.0");
    let h = head("3.0.0");
    let err = increment(input(Strategy::Previous, &p, &h)).unwrap_err();
    assert!(matches!(err, Error::MissingBaseVersion("previous")));
  }

  #[test]
  fn next_moves_to_next_major() {
    let p = payload("email", "2.3.0");
    let h = head("2.3.0");
    let out = increment(input(Strategy::Next, &p, &h)).unwrap();
    assert_eq!(out.version.as_deref(), Some("3.0.0"));
  }

  #[test]
  fn tarball_falls_back_to_first_attachment() {
    let mut p = payload("email", "2.0.0");
    p.attachments = Map::from_iter([("odd-name.tgz".to_owned(), json!({ "data": "eA==" }))]);
    let h = head("2.0.0");
    let out = increment(input(Strategy::Current, &p, &h)).unwrap();
    assert_eq!(out.payload.attachments.len(), 1);
    assert_eq!(out.payload.attachments["email-2.0.1-0.tgz"]["data"], "eA==");
  }

  #[test]
  fn increment_never_regresses_within_a_major() {
    let cases = [
      ("1.0.0", "0.0.0"),
      ("1.2.3", "1.2.3"),
      ("1.2.3", "1.2.4-7"),
      ("1.2.3-1", "1.2.3-0"),
      ("1.9.0", "1.2.0"),
    ];
    for (current, head_version) in cases {
      let p = payload("email", current);
      let h = head(head_version);
      let out = increment(input(Strategy::Current, &p, &h)).unwrap();
      let next = version::parse(out.version.as_deref().unwrap()).unwrap();
      let prior = version::parse(current).unwrap();
      let base = version::parse(head_version).unwrap();
      assert!(compare(&next, &prior).is_gt(), "{next} <= {prior}");
      if base.major == prior.major {
        assert!(compare(&next, &base).is_gt(), "{next} <= {base}");
      }
    }
  }
}
