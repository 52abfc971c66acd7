//! Encoding and decoding helpers between Ripple records and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings. Maps and package records are
//! stored as compact JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ripple_core::{
  Env,
  records::{BuildHead, ReleaseLine, VersionRecord},
};
use serde_json::{Map, Value};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── String maps ─────────────────────────────────────────────────────────────

pub fn encode_map(map: &BTreeMap<String, String>) -> Result<String> {
  Ok(serde_json::to_string(map)?)
}

pub fn decode_map(s: &str) -> Result<BTreeMap<String, String>> {
  Ok(serde_json::from_str(s)?)
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `release_lines` row.
pub struct RawReleaseLine {
  pub pkg:              String,
  pub version:          String,
  pub previous_version: Option<String>,
  pub dependents_json:  String,
  pub created_at:       String,
}

impl RawReleaseLine {
  pub const COLUMNS: &'static str =
    "pkg, version, previous_version, dependents_json, created_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      pkg:              row.get(0)?,
      version:          row.get(1)?,
      previous_version: row.get(2)?,
      dependents_json:  row.get(3)?,
      created_at:       row.get(4)?,
    })
  }

  pub fn into_release_line(self) -> Result<ReleaseLine> {
    Ok(ReleaseLine {
      pkg:              self.pkg,
      version:          self.version,
      previous_version: self.previous_version,
      dependents:       decode_map(&self.dependents_json)?,
      created_at:       decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `build_heads` row.
pub struct RawBuildHead {
  pub env:                     String,
  pub name:                    String,
  pub version:                 String,
  pub rollback_build_ids_json: String,
}

impl RawBuildHead {
  pub fn into_build_head(self) -> Result<BuildHead> {
    Ok(BuildHead {
      env:                self.env.parse::<Env>()?,
      name:               self.name,
      version:            self.version,
      rollback_build_ids: decode_map(&self.rollback_build_ids_json)?,
    })
  }
}

/// A `versions` row left-joined with its `tarballs` row.
pub struct RawVersion {
  pub version_id:       String,
  pub name:             String,
  pub version:          String,
  pub value:            String,
  pub attachments_json: Option<String>,
}

impl RawVersion {
  pub fn into_version(self) -> Result<VersionRecord> {
    let attachments = self
      .attachments_json
      .as_deref()
      .map(serde_json::from_str::<Map<String, Value>>)
      .transpose()?;

    Ok(VersionRecord {
      version_id: self.version_id,
      name: self.name,
      version: self.version,
      value: self.value,
      attachments,
    })
  }
}
