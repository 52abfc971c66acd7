//! npm-flavoured semantic-version helpers on top of the [`semver`] crate.
//!
//! Registry manifests declare dependency ranges in npm syntax, which differs
//! from Cargo's in a few places: a bare `1.2.3` is an exact match rather than
//! a caret requirement, comparators are whitespace-separated, `||` separates
//! alternatives, and `latest` is used as a synonym for `*`. [`Range`]
//! translates those forms into one or more [`VersionReq`]s.

use std::cmp::Ordering;

use semver::{Prerelease, Version, VersionReq};

use crate::{Error, Result};

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Parse a version string, tolerating a leading `v` or `=`.
pub fn parse(raw: &str) -> Result<Version> {
  let trimmed = raw.trim().trim_start_matches('=').trim_start_matches('v');
  Version::parse(trimmed).map_err(|source| Error::InvalidVersion {
    version: raw.to_owned(),
    source,
  })
}

/// Extract the first `major[.minor[.patch]]` run from arbitrary text, the way
/// npm's `semver.coerce` does. `"^2.1"` coerces to `2.1.0`; `"*"` has no
/// digits and coerces to nothing.
pub fn coerce(raw: &str) -> Option<Version> {
  let start = raw.find(|c: char| c.is_ascii_digit())?;
  let mut parts = [0u64; 3];
  let mut rest = &raw[start..];

  for (idx, slot) in parts.iter_mut().enumerate() {
    if idx > 0 {
      match rest.strip_prefix('.') {
        Some(after) if after.starts_with(|c: char| c.is_ascii_digit()) => rest = after,
        _ => break,
      }
    }
    let end = rest
      .find(|c: char| !c.is_ascii_digit())
      .unwrap_or(rest.len());
    *slot = rest[..end].parse().ok()?;
    rest = &rest[end..];
  }

  Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Order two versions by semantic-version precedence (build metadata is
/// ignored, as npm does).
pub fn compare(a: &Version, b: &Version) -> Ordering { a.cmp_precedence(b) }

// ─── Increments ──────────────────────────────────────────────────────────────

/// npm `inc(v, "prerelease")`.
///
/// A release version gets its patch bumped and a `-0` prerelease
/// (`2.0.0` → `2.0.1-0`). A prerelease gets its last numeric identifier
/// bumped (`2.3.9-2` → `2.3.9-3`), or `.0` appended when it has none
/// (`1.0.0-beta` → `1.0.0-beta.0`).
pub fn inc_prerelease(v: &Version) -> Result<Version> {
  let mut next = Version::new(v.major, v.minor, v.patch);

  let pre = if v.pre.is_empty() {
    next.patch += 1;
    "0".to_owned()
  } else {
    let mut idents: Vec<String> = v.pre.as_str().split('.').map(str::to_owned).collect();
    match idents
      .iter()
      .rposition(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
    {
      Some(pos) => {
        let bumped = idents[pos].parse::<u64>().map(|n| n + 1).unwrap_or(0);
        idents[pos] = bumped.to_string();
      }
      None => idents.push("0".to_owned()),
    }
    idents.join(".")
  };

  next.pre = Prerelease::new(&pre).map_err(|source| Error::InvalidVersion {
    version: format!("{next}-{pre}"),
    source,
  })?;
  Ok(next)
}

/// npm `inc(v, "major")`: `X.0.0-pre` graduates to `X.0.0`, anything else
/// moves to the next major.
pub fn inc_major(v: &Version) -> Version {
  if v.minor == 0 && v.patch == 0 && !v.pre.is_empty() {
    Version::new(v.major, 0, 0)
  } else {
    Version::new(v.major + 1, 0, 0)
  }
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

/// An npm dependency range: a set of alternatives, any of which may match.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
  alternatives: Vec<VersionReq>,
}

impl Range {
  pub fn any() -> Self { Self { alternatives: vec![VersionReq::STAR] } }

  pub fn parse(raw: &str) -> Result<Self> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "latest" || trimmed == "*" {
      return Ok(Self::any());
    }

    let alternatives = trimmed
      .split("||")
      .map(|alt| {
        let normalized = normalize_alternative(alt.trim());
        VersionReq::parse(&normalized).map_err(|source| Error::InvalidVersion {
          version: raw.to_owned(),
          source,
        })
      })
      .collect::<Result<Vec<_>>>()?;

    Ok(Self { alternatives })
  }

  /// Whether `version` falls within any alternative. Prereleases only match
  /// an alternative that names the same `major.minor.patch` with a
  /// prerelease, as in npm.
  pub fn satisfies(&self, version: &Version) -> bool {
    self.alternatives.iter().any(|req| req.matches(version))
  }
}

/// Rewrite one npm alternative into Cargo requirement syntax.
fn normalize_alternative(alt: &str) -> String {
  if alt.is_empty() {
    return "*".to_owned();
  }

  // Hyphen range: `1.2.3 - 2.3.4`.
  if let Some((low, high)) = alt.split_once(" - ") {
    return format!(">={}, <={}", low.trim(), high.trim());
  }

  // Glue bare operators onto the following token (`>= 1.2.3`).
  let mut comparators: Vec<String> = Vec::new();
  let mut pending_op: Option<&str> = None;
  for token in alt.split_whitespace() {
    if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '^' | '~')) {
      pending_op = Some(token);
      continue;
    }
    let token = match pending_op.take() {
      Some(op) => format!("{op}{token}"),
      None => token.to_owned(),
    };
    comparators.push(normalize_comparator(&token));
  }

  if comparators.is_empty() {
    "*".to_owned()
  } else {
    comparators.join(", ")
  }
}

fn normalize_comparator(token: &str) -> String {
  if token.starts_with(['<', '>', '=', '^', '~']) {
    return token.to_owned();
  }

  let bare = token.trim_start_matches('v');
  let core = bare.split(['-', '+']).next().unwrap_or(bare);
  let parts: Vec<&str> = core.split('.').collect();

  if parts.iter().any(|p| matches!(*p, "x" | "X" | "*")) {
    bare.to_owned()
  } else if parts.len() >= 3 {
    format!("={bare}")
  } else {
    format!("{bare}.*")
  }
}
