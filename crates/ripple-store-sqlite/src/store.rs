//! [`SqliteStore`]: the SQLite implementation of [`FeedStore`].

use std::{collections::BTreeMap, path::Path};

use chrono::Utc;
use rusqlite::OptionalExtension as _;

use ripple_core::{
  Env,
  package::PackageRecord,
  records::{
    BuildHead, DependentOfRecord, DependentRecord, NewReleaseLine, ReleaseLine,
    VersionAttachment, VersionRecord,
  },
  store::FeedStore,
};
use serde_json::Value;

use crate::{
  Result,
  encode::{RawBuildHead, RawReleaseLine, RawVersion, encode_dt, encode_map},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Ripple feed store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Upsert the dependents record for `name` and union `members` into it,
  /// in one transaction.
  async fn union_dependents(&self, name: String, members: Vec<String>) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT OR IGNORE INTO dependents (name) VALUES (?1)",
          rusqlite::params![name],
        )?;
        {
          let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO dependent_members (name, dependent) VALUES (?1, ?2)",
          )?;
          for member in &members {
            stmt.execute(rusqlite::params![name, member])?;
          }
        }
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── FeedStore impl ──────────────────────────────────────────────────────────

impl FeedStore for SqliteStore {
  type Error = crate::Error;

  // ── Packages ──────────────────────────────────────────────────────────────

  async fn get_package(&self, name: &str) -> Result<Option<PackageRecord>> {
    let name = name.to_owned();

    let raw: Option<String> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT record_json FROM packages WHERE name = ?1",
              rusqlite::params![name],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;

    Ok(raw.as_deref().map(serde_json::from_str::<PackageRecord>).transpose()?)
  }

  async fn put_package(&self, package: PackageRecord) -> Result<()> {
    let json = serde_json::to_string(&package)?;
    let name = package.name;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO packages (name, record_json) VALUES (?1, ?2)
           ON CONFLICT (name) DO UPDATE SET record_json = excluded.record_json",
          rusqlite::params![name, json],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Dependency graph ──────────────────────────────────────────────────────

  async fn get_dependent(&self, name: &str) -> Result<Option<DependentRecord>> {
    let name = name.to_owned();

    let record = self
      .conn
      .call(move |conn| {
        let exists = conn
          .query_row(
            "SELECT 1 FROM dependents WHERE name = ?1",
            rusqlite::params![name],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false);

        if !exists {
          return Ok(None);
        }

        let mut stmt =
          conn.prepare("SELECT dependent FROM dependent_members WHERE name = ?1")?;
        let dependents = stmt
          .query_map(rusqlite::params![name], |row| row.get::<_, String>(0))?
          .collect::<rusqlite::Result<_>>()?;

        Ok(Some(DependentRecord { name, dependents }))
      })
      .await?;

    Ok(record)
  }

  async fn create_dependent(&self, record: DependentRecord) -> Result<()> {
    self
      .union_dependents(record.name, record.dependents.into_iter().collect())
      .await
  }

  async fn add_dependents(&self, name: &str, dependents: &[String]) -> Result<()> {
    self.union_dependents(name.to_owned(), dependents.to_vec()).await
  }

  async fn get_dependent_of(&self, pkg: &str) -> Result<Option<DependentOfRecord>> {
    let pkg = pkg.to_owned();

    let record = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT pkg, dependent_of FROM dependent_of WHERE pkg = ?1",
              rusqlite::params![pkg],
              |row| {
                Ok(DependentOfRecord {
                  pkg:          row.get(0)?,
                  dependent_of: row.get(1)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    Ok(record)
  }

  async fn put_dependent_of(&self, record: DependentOfRecord) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO dependent_of (pkg, dependent_of) VALUES (?1, ?2)
           ON CONFLICT (pkg) DO UPDATE SET dependent_of = excluded.dependent_of",
          rusqlite::params![record.pkg, record.dependent_of],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Release lines ─────────────────────────────────────────────────────────

  async fn get_release_line(
    &self,
    pkg:     &str,
    version: Option<&str>,
  ) -> Result<Option<ReleaseLine>> {
    let pkg = pkg.to_owned();
    let version = version.map(str::to_owned);

    let raw: Option<RawReleaseLine> = self
      .conn
      .call(move |conn| {
        let raw = match version {
          Some(version) => conn
            .query_row(
              &format!(
                "SELECT {} FROM release_lines WHERE pkg = ?1 AND version = ?2",
                RawReleaseLine::COLUMNS
              ),
              rusqlite::params![pkg, version],
              RawReleaseLine::from_row,
            )
            .optional()?,
          // The head is the entry no other entry of the line points back to.
          None => conn
            .query_row(
              &format!(
                "SELECT {} FROM release_lines r
                 WHERE r.pkg = ?1
                   AND NOT EXISTS (
                     SELECT 1 FROM release_lines o
                     WHERE o.pkg = r.pkg AND o.previous_version = r.version
                   )
                 ORDER BY r.rowid DESC
                 LIMIT 1",
                RawReleaseLine::COLUMNS
              ),
              rusqlite::params![pkg],
              RawReleaseLine::from_row,
            )
            .optional()?,
        };
        Ok(raw)
      })
      .await?;

    raw.map(RawReleaseLine::into_release_line).transpose()
  }

  async fn create_release_line(&self, input: NewReleaseLine) -> Result<bool> {
    let created_at = encode_dt(Utc::now());

    let inserted = self
      .conn
      .call(move |conn| {
        let n = conn.execute(
          "INSERT OR IGNORE INTO release_lines
             (pkg, version, previous_version, dependents_json, created_at)
           VALUES (?1, ?2, ?3, '{}', ?4)",
          rusqlite::params![input.pkg, input.version, input.previous_version, created_at],
        )?;
        Ok(n == 1)
      })
      .await?;

    Ok(inserted)
  }

  async fn splice_release_line(&self, input: NewReleaseLine, successor: &str) -> Result<bool> {
    let created_at = encode_dt(Utc::now());
    let successor = successor.to_owned();

    let inserted = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let n = tx.execute(
          "INSERT OR IGNORE INTO release_lines
             (pkg, version, previous_version, dependents_json, created_at)
           VALUES (?1, ?2, ?3, '{}', ?4)",
          rusqlite::params![input.pkg, input.version, input.previous_version, created_at],
        )?;
        if n == 0 {
          return Ok(false);
        }
        tx.execute(
          "UPDATE release_lines SET previous_version = ?3 WHERE pkg = ?1 AND version = ?2",
          rusqlite::params![input.pkg, successor, input.version],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(inserted)
  }

  async fn add_release_dependent(
    &self,
    pkg:               &str,
    version:           &str,
    dependent:         &str,
    dependent_version: &str,
  ) -> Result<bool> {
    let pkg = pkg.to_owned();
    let version = version.to_owned();
    let dependent = dependent.to_owned();
    let dependent_version = dependent_version.to_owned();

    let updated = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT dependents_json FROM release_lines WHERE pkg = ?1 AND version = ?2",
            rusqlite::params![pkg, version],
            |row| row.get(0),
          )
          .optional()?;

        let Some(json) = current else {
          return Ok(false);
        };

        let mut dependents: BTreeMap<String, String> =
          serde_json::from_str(&json).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
        dependents.insert(dependent, dependent_version);
        let json =
          serde_json::to_string(&dependents).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;

        tx.execute(
          "UPDATE release_lines SET dependents_json = ?3 WHERE pkg = ?1 AND version = ?2",
          rusqlite::params![pkg, version, json],
        )?;
        tx.commit()?;
        Ok(true)
      })
      .await?;

    Ok(updated)
  }

  // ── Versions ──────────────────────────────────────────────────────────────

  async fn get_version(&self, version_id: &str) -> Result<Option<VersionRecord>> {
    let version_id = version_id.to_owned();

    let raw: Option<RawVersion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT v.version_id, v.name, v.version, v.value, t.attachments_json
               FROM versions v
               LEFT JOIN tarballs t ON t.version_id = v.version_id
               WHERE v.version_id = ?1",
              rusqlite::params![version_id],
              |row| {
                Ok(RawVersion {
                  version_id:       row.get(0)?,
                  name:             row.get(1)?,
                  version:          row.get(2)?,
                  value:            row.get(3)?,
                  attachments_json: row.get(4)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawVersion::into_version).transpose()
  }

  async fn put_version(&self, record: VersionRecord) -> Result<()> {
    let attachments_json = record
      .attachments
      .as_ref()
      .map(serde_json::to_string)
      .transpose()?;

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "INSERT INTO versions (version_id, name, version, value) VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (version_id) DO UPDATE SET value = excluded.value",
          rusqlite::params![record.version_id, record.name, record.version, record.value],
        )?;
        match attachments_json {
          Some(json) => tx.execute(
            "INSERT INTO tarballs (version_id, attachments_json) VALUES (?1, ?2)
             ON CONFLICT (version_id) DO UPDATE SET attachments_json = excluded.attachments_json",
            rusqlite::params![record.version_id, json],
          )?,
          None => tx.execute(
            "DELETE FROM tarballs WHERE version_id = ?1",
            rusqlite::params![record.version_id],
          )?,
        };
        tx.commit()?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn get_attachment(&self, record: &VersionRecord) -> Result<Option<VersionAttachment>> {
    let Some(attachments) = record.attachments.clone() else {
      return Ok(None);
    };
    let value: Value = serde_json::from_str(&record.value)?;
    Ok(Some(VersionAttachment { value, attachments }))
  }

  // ── Build heads ───────────────────────────────────────────────────────────

  async fn get_build_head(&self, env: Env, name: &str) -> Result<Option<BuildHead>> {
    let env = env.as_str();
    let name = name.to_owned();

    let raw: Option<RawBuildHead> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT env, name, version, rollback_build_ids_json
               FROM build_heads WHERE env = ?1 AND name = ?2",
              rusqlite::params![env, name],
              |row| {
                Ok(RawBuildHead {
                  env:                     row.get(0)?,
                  name:                    row.get(1)?,
                  version:                 row.get(2)?,
                  rollback_build_ids_json: row.get(3)?,
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawBuildHead::into_build_head).transpose()
  }

  async fn put_build_head(&self, head: BuildHead) -> Result<()> {
    let rollbacks = encode_map(&head.rollback_build_ids)?;
    let env = head.env.as_str();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO build_heads (env, name, version, rollback_build_ids_json)
           VALUES (?1, ?2, ?3, ?4)
           ON CONFLICT (env, name) DO UPDATE SET
             version = excluded.version,
             rollback_build_ids_json = excluded.rollback_build_ids_json",
          rusqlite::params![env, head.name, head.version, rollbacks],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
