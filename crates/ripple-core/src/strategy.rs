//! Trigger strategy: should a dependent be rebuilt after its root package
//! changed, and which increment rule applies.
//!
//! [`decide`] is a pure function of its inputs. The rules, in order:
//!
//! 1. A promotion (non-development environment) with a release line replays
//!    the recorded versions: [`Strategy::Release`].
//! 2. A root package without any release line triggers with
//!    [`Strategy::Legacy`].
//! 3. Otherwise the dependent is rebuilt when the new root version is inside
//!    its declared range, when the root went *back* to an older major the
//!    dependent was built against ([`Strategy::Previous`]), or when the root
//!    has published this major before. A root moving to a major the
//!    dependent has never been validated against does not trigger.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{
  Env,
  package::{PackageDescriptor, PackageRecord},
  records::ReleaseLine,
  version::{self, Range},
};

/// Selects the increment rule and version source for a dependent build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
  /// First trigger for a root without history; increment from the build head.
  Legacy,
  /// Increment from the build head.
  Current,
  /// Rebuild exactly the version recorded in the release line.
  Release,
  /// Increment from the release line entry of the previous major.
  Previous,
  /// Move the dependent to its next major.
  Next,
}

impl Strategy {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Legacy => "legacy",
      Self::Current => "current",
      Self::Release => "release",
      Self::Previous => "previous",
      Self::Next => "next",
    }
  }
}

impl fmt::Display for Strategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Output of [`decide`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
  pub strategy:              Strategy,
  pub trigger:               bool,
  /// Root version whose release line entry holds the dependent version to
  /// increment from, when the root has lived on this major before.
  pub fetch_release_version: Option<String>,
}

impl Decision {
  fn new(strategy: Strategy, trigger: bool) -> Self {
    Self { strategy, trigger, fetch_release_version: None }
  }
}

/// Decide whether `dependent` must be rebuilt for the change to `root`.
///
/// `release_line` is the root's release line entry the change is evaluated
/// against; `registry_versions` lists every version the registry has
/// published for the root, in any order.
pub fn decide(
  env: Env,
  root: &PackageDescriptor,
  dependent: &PackageRecord,
  release_line: Option<&ReleaseLine>,
  registry_versions: &[Version],
) -> Decision {
  let line = match release_line {
    Some(_) if !env.is_development() => return Decision::new(Strategy::Release, true),
    None => return Decision::new(Strategy::Legacy, true),
    Some(line) => line,
  };

  let Ok(root_version) = version::parse(&root.version) else {
    return Decision::new(Strategy::Current, false);
  };

  let declared = dependent.dependencies.get(&root.name).map(String::as_str);
  let inclusive = declared
    .and_then(|range| Range::parse(range).ok())
    .is_some_and(|range| range.satisfies(&root_version));

  // The major the dependent was built against: the one its range names, or
  // the release line's own version when the range names none (`*`).
  let required = declared
    .and_then(version::coerce)
    .or_else(|| version::parse(&line.version).ok());
  let Some(required) = required else {
    return Decision::new(Strategy::Current, inclusive);
  };

  let latest_other = registry_versions
    .iter()
    .filter(|v| version::compare(v, &root_version).is_ne())
    .max_by(|a, b| version::compare(a, b))
    .cloned()
    .unwrap_or_else(|| Version::new(0, 0, 0));

  let previous_major = root_version.major < required.major;
  let previous_published_major = root_version.major == latest_other.major;

  let strategy = if previous_major {
    Strategy::Previous
  } else {
    Strategy::Current
  };

  Decision {
    strategy,
    trigger: previous_major || previous_published_major || inclusive,
    fetch_release_version: previous_published_major.then(|| latest_other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use chrono::Utc;

  use super::*;

  fn root(name: &str, version: &str) -> PackageDescriptor {
    PackageDescriptor {
      name:         name.into(),
      version:      version.into(),
      dependencies: BTreeMap::new(),
    }
  }

  fn dependent(root: &str, range: &str) -> PackageRecord {
    PackageRecord {
      name: "email".into(),
      version: "2.0.0".into(),
      dependencies: BTreeMap::from([(root.to_owned(), range.to_owned())]),
      ..Default::default()
    }
  }

  fn line(pkg: &str, version: &str) -> ReleaseLine {
    ReleaseLine {
      pkg:              pkg.into(),
      version:          version.into(),
      previous_version: None,
      dependents:       BTreeMap::new(),
      created_at:       Utc::now(),
    }
  }

  fn versions(list: &[&str]) -> Vec<Version> {
    list.iter().map(|v| version::parse(v).unwrap()).collect()
  }

  #[test]
  fn no_release_line_is_legacy() {
    let d = decide(Env::Dev, &root("cows", "2.0.0"), &dependent("cows", "*"), None, &[]);
    assert_eq!(d.strategy, Strategy::Legacy);
    assert!(d.trigger);
  }

  #[test]
  fn promotion_with_release_line_replays() {
    let l = line("cows", "2.0.0");
    for env in [Env::Test, Env::Prod] {
      let d = decide(env, &root("cows", "2.0.0"), &dependent("cows", "^9.0.0"), Some(&l), &[]);
      assert_eq!(d.strategy, Strategy::Release);
      assert!(d.trigger);
    }
  }

  #[test]
  fn latest_range_is_inclusive() {
    let l = line("what", "6.0.1");
    let d = decide(Env::Dev, &root("what", "6.0.1"), &dependent("what", "latest"), Some(&l), &[]);
    assert_eq!(d.strategy, Strategy::Current);
    assert!(d.trigger);
  }

  #[test]
  fn uncrossed_major_does_not_trigger() {
    let l = line("cows", "2.0.0");
    let d = decide(
      Env::Dev,
      &root("cows", "3.0.0"),
      &dependent("cows", "^2.0.0"),
      Some(&l),
      &versions(&["1.0.0", "2.0.0", "3.0.0"]),
    );
    assert!(!d.trigger);
    assert_eq!(d.strategy, Strategy::Current);
    assert_eq!(d.fetch_release_version, None);
  }

  #[test]
  fn known_major_triggers_with_release_version() {
    let l = line("cows", "2.1.0");
    let d = decide(
      Env::Dev,
      &root("cows", "3.1.0"),
      &dependent("cows", "^2.0.0"),
      Some(&l),
      &versions(&["2.1.0", "3.0.0", "3.1.0"]),
    );
    assert!(d.trigger);
    assert_eq!(d.strategy, Strategy::Current);
    assert_eq!(d.fetch_release_version.as_deref(), Some("3.0.0"));
  }

  #[test]
  fn older_major_selects_previous() {
    let l = line("what", "3.0.0");
    let d = decide(
      Env::Dev,
      &root("what", "2.1.0"),
      &dependent("what", "^3.0.0"),
      Some(&l),
      &versions(&["2.0.0", "3.0.0"]),
    );
    assert!(d.trigger);
    assert_eq!(d.strategy, Strategy::Previous);
    assert_eq!(d.fetch_release_version, None);
  }

  #[test]
  fn undeclared_root_falls_back_to_line_major() {
    let l = line("cows", "2.0.0");
    let mut dep = dependent("other", "*");
    dep.dependencies.clear();
    let d = decide(Env::Dev, &root("cows", "2.5.0"), &dep, Some(&l), &[]);
    assert!(!d.trigger);
  }

  #[test]
  fn decide_is_deterministic() {
    let l = line("cows", "2.0.0");
    let r = root("cows", "2.4.0");
    let dep = dependent("cows", "^2.0.0");
    let published = versions(&["2.0.0", "2.3.0"]);
    let first = decide(Env::Dev, &r, &dep, Some(&l), &published);
    for _ in 0..10 {
      assert_eq!(decide(Env::Dev, &r, &dep, Some(&l), &published), first);
    }
  }
}
