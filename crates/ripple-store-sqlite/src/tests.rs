//! Integration tests for `SqliteStore` against an in-memory database.

use std::collections::{BTreeMap, BTreeSet};

use ripple_core::{
  Env,
  package::PackageRecord,
  records::{BuildHead, DependentOfRecord, DependentRecord, NewReleaseLine, VersionRecord},
  store::FeedStore,
};
use serde_json::json;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn line(pkg: &str, version: &str, previous: Option<&str>) -> NewReleaseLine {
  NewReleaseLine {
    pkg:              pkg.into(),
    version:          version.into(),
    previous_version: previous.map(Into::into),
  }
}

// ─── Packages ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn put_and_get_package_keeps_extra_fields() {
  let s = store().await;
  let record: PackageRecord = serde_json::from_value(json!({
    "name": "email",
    "version": "2.0.0",
    "distTags": { "latest": "2.0.0" },
    "dependencies": { "cows": "^2.0.0" },
    "main": "index.js"
  }))
  .unwrap();

  s.put_package(record.clone()).await.unwrap();
  let fetched = s.get_package("email").await.unwrap().unwrap();
  assert_eq!(fetched, record);
  assert_eq!(fetched.extra["main"], "index.js");
}

#[tokio::test]
async fn put_package_replaces() {
  let s = store().await;
  let mut record = PackageRecord { name: "email".into(), version: "1.0.0".into(), ..Default::default() };
  s.put_package(record.clone()).await.unwrap();
  record.version = "1.1.0".into();
  s.put_package(record).await.unwrap();

  assert_eq!(s.get_package("email").await.unwrap().unwrap().version, "1.1.0");
}

#[tokio::test]
async fn get_package_missing_returns_none() {
  let s = store().await;
  assert!(s.get_package("nope").await.unwrap().is_none());
}

// ─── Dependency graph ────────────────────────────────────────────────────────

#[tokio::test]
async fn dependents_are_unioned() {
  let s = store().await;
  s.create_dependent(DependentRecord {
    name:       "cows".into(),
    dependents: BTreeSet::from(["email".to_owned()]),
  })
  .await
  .unwrap();
  s.add_dependents("cows", &["email".into(), "wrhs".into()]).await.unwrap();
  s.add_dependents("cows", &["wrhs".into()]).await.unwrap();

  let record = s.get_dependent("cows").await.unwrap().unwrap();
  assert_eq!(
    record.dependents,
    BTreeSet::from(["email".to_owned(), "wrhs".to_owned()])
  );
}

#[tokio::test]
async fn empty_dependent_record_exists() {
  let s = store().await;
  s.create_dependent(DependentRecord { name: "cows".into(), dependents: BTreeSet::new() })
    .await
    .unwrap();

  let record = s.get_dependent("cows").await.unwrap().unwrap();
  assert!(record.dependents.is_empty());
  assert!(s.get_dependent("horses").await.unwrap().is_none());
}

#[tokio::test]
async fn dependent_of_last_writer_wins() {
  let s = store().await;
  for parent in ["cows", "horses"] {
    s.put_dependent_of(DependentOfRecord { pkg: "email".into(), dependent_of: parent.into() })
      .await
      .unwrap();
  }

  let record = s.get_dependent_of("email").await.unwrap().unwrap();
  assert_eq!(record.dependent_of, "horses");
}

// ─── Release lines ───────────────────────────────────────────────────────────

#[tokio::test]
async fn create_release_line_is_append_only() {
  let s = store().await;
  assert!(s.create_release_line(line("cows", "1.0.0", None)).await.unwrap());
  assert!(!s.create_release_line(line("cows", "1.0.0", Some("0.9.0"))).await.unwrap());

  let entry = s.get_release_line("cows", Some("1.0.0")).await.unwrap().unwrap();
  assert_eq!(entry.previous_version, None);
  assert!(entry.dependents.is_empty());
}

#[tokio::test]
async fn head_is_entry_nothing_points_back_to() {
  let s = store().await;
  s.create_release_line(line("cows", "1.0.0", None)).await.unwrap();
  s.create_release_line(line("cows", "2.0.0", Some("1.0.0"))).await.unwrap();
  s.create_release_line(line("cows", "2.1.0", Some("2.0.0"))).await.unwrap();
  s.create_release_line(line("other", "9.0.0", None)).await.unwrap();

  let head = s.get_release_line("cows", None).await.unwrap().unwrap();
  assert_eq!(head.version, "2.1.0");
  assert_eq!(head.previous_version.as_deref(), Some("2.0.0"));
}

#[tokio::test]
async fn splice_repoints_successor_at_new_entry() {
  let s = store().await;
  s.create_release_line(line("cows", "1.0.0", None)).await.unwrap();
  s.create_release_line(line("cows", "2.0.0", Some("1.0.0"))).await.unwrap();

  assert!(s.splice_release_line(line("cows", "1.0.1", Some("1.0.0")), "2.0.0").await.unwrap());

  let head = s.get_release_line("cows", None).await.unwrap().unwrap();
  assert_eq!(head.version, "2.0.0");
  assert_eq!(head.previous_version.as_deref(), Some("1.0.1"));
  let spliced = s.get_release_line("cows", Some("1.0.1")).await.unwrap().unwrap();
  assert_eq!(spliced.previous_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn splice_of_existing_entry_changes_nothing() {
  let s = store().await;
  s.create_release_line(line("cows", "1.0.0", None)).await.unwrap();
  s.create_release_line(line("cows", "2.0.0", Some("1.0.0"))).await.unwrap();

  assert!(!s.splice_release_line(line("cows", "1.0.0", None), "2.0.0").await.unwrap());

  let head = s.get_release_line("cows", None).await.unwrap().unwrap();
  assert_eq!(head.previous_version.as_deref(), Some("1.0.0"));
}

#[tokio::test]
async fn head_of_unknown_line_is_none() {
  let s = store().await;
  assert!(s.get_release_line("cows", None).await.unwrap().is_none());
  assert!(s.get_release_line("cows", Some("1.0.0")).await.unwrap().is_none());
}

#[tokio::test]
async fn add_release_dependent_is_idempotent() {
  let s = store().await;
  s.create_release_line(line("cows", "2.0.0", None)).await.unwrap();

  for _ in 0..2 {
    assert!(s.add_release_dependent("cows", "2.0.0", "email", "2.0.1-0").await.unwrap());
  }
  s.add_release_dependent("cows", "2.0.0", "wrhs", "1.0.0").await.unwrap();

  let entry = s.get_release_line("cows", Some("2.0.0")).await.unwrap().unwrap();
  assert_eq!(
    entry.dependents,
    BTreeMap::from([
      ("email".to_owned(), "2.0.1-0".to_owned()),
      ("wrhs".to_owned(), "1.0.0".to_owned()),
    ])
  );
}

#[tokio::test]
async fn add_release_dependent_to_missing_entry() {
  let s = store().await;
  assert!(!s.add_release_dependent("cows", "2.0.0", "email", "1.0.0").await.unwrap());
}

// ─── Versions ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn version_with_tarball_has_attachment() {
  let s = store().await;
  let value = json!({ "name": "email", "dist-tags": { "latest": "2.0.0" } });
  let record = VersionRecord {
    version_id:  VersionRecord::id("email", "2.0.0"),
    name:        "email".into(),
    version:     "2.0.0".into(),
    value:       value.to_string(),
    attachments: Some(serde_json::Map::from_iter([(
      "email-2.0.0.tgz".to_owned(),
      json!({ "data": "eA==" }),
    )])),
  };
  s.put_version(record.clone()).await.unwrap();

  let fetched = s.get_version("email@2.0.0").await.unwrap().unwrap();
  assert_eq!(fetched, record);

  let attachment = s.get_attachment(&fetched).await.unwrap().unwrap();
  assert_eq!(attachment.value, value);
  assert_eq!(attachment.attachments["email-2.0.0.tgz"]["data"], "eA==");
}

#[tokio::test]
async fn version_without_tarball_has_no_attachment() {
  let s = store().await;
  let record = VersionRecord {
    version_id:  VersionRecord::id("email", "1.0.0"),
    name:        "email".into(),
    version:     "1.0.0".into(),
    value:       "{}".into(),
    attachments: None,
  };
  s.put_version(record.clone()).await.unwrap();

  assert!(s.get_attachment(&record).await.unwrap().is_none());
  assert!(s.get_version("email@9.9.9").await.unwrap().is_none());
}

#[tokio::test]
async fn attachment_is_read_from_the_fetched_record() {
  let s = store().await;
  let mut record = VersionRecord {
    version_id:  VersionRecord::id("email", "3.0.0"),
    name:        "email".into(),
    version:     "3.0.0".into(),
    value:       "{}".into(),
    attachments: Some(serde_json::Map::from_iter([(
      "email-3.0.0.tgz".to_owned(),
      json!({ "data": "eQ==" }),
    )])),
  };
  s.put_version(record.clone()).await.unwrap();
  let fetched = s.get_version("email@3.0.0").await.unwrap().unwrap();

  record.attachments = None;
  s.put_version(record).await.unwrap();

  let attachment = s.get_attachment(&fetched).await.unwrap().unwrap();
  assert_eq!(attachment.attachments["email-3.0.0.tgz"]["data"], "eQ==");
}

// ─── Build heads ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn build_heads_are_keyed_by_env() {
  let s = store().await;
  let mut head = BuildHead::initial(Env::Dev, "email");
  head.version = "2.3.9-1".into();
  head
    .rollback_build_ids
    .insert("2017-06-08T02:27:11Z".into(), "email!dev!2.3.9-2!en-US".into());
  s.put_build_head(head.clone()).await.unwrap();

  assert_eq!(s.get_build_head(Env::Dev, "email").await.unwrap(), Some(head));
  assert!(s.get_build_head(Env::Prod, "email").await.unwrap().is_none());
}
