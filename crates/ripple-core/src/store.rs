//! The `FeedStore` trait.
//!
//! The trait is implemented by storage backends (e.g. `ripple-store-sqlite`).
//! The engine depends on this abstraction, not on any concrete backend. Each
//! method is atomic on its own; the engine imposes no transaction discipline
//! across calls.

use std::future::Future;

use crate::{
  Env,
  package::PackageRecord,
  records::{
    BuildHead, DependentOfRecord, DependentRecord, NewReleaseLine, ReleaseLine,
    VersionAttachment, VersionRecord,
  },
};

/// Abstraction over the persistent records Ripple reads and writes.
///
/// Lookups return `Ok(None)` when a record is absent; an `Err` always means
/// the backend itself failed.
pub trait FeedStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Packages ──────────────────────────────────────────────────────────

  /// Retrieve a managed package by name.
  fn get_package<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<PackageRecord>, Self::Error>> + Send + 'a;

  /// Insert or replace a managed package.
  fn put_package(
    &self,
    package: PackageRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Dependency graph ──────────────────────────────────────────────────

  fn get_dependent<'a>(
    &'a self,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<DependentRecord>, Self::Error>> + Send + 'a;

  /// Create the dependents record for `record.name`. Creating a record that
  /// already exists merges the dependent sets.
  fn create_dependent(
    &self,
    record: DependentRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Union `dependents` into the record for `name`. Must be safe against
  /// concurrent callers for the same `name`.
  fn add_dependents<'a>(
    &'a self,
    name: &'a str,
    dependents: &'a [String],
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  fn get_dependent_of<'a>(
    &'a self,
    pkg: &'a str,
  ) -> impl Future<Output = Result<Option<DependentOfRecord>, Self::Error>> + Send + 'a;

  /// Insert or overwrite the parent of `record.pkg`.
  fn put_dependent_of(
    &self,
    record: DependentOfRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Release lines ─────────────────────────────────────────────────────

  /// Fetch the entry for `(pkg, version)`, or the head of `pkg`'s line when
  /// `version` is `None`.
  fn get_release_line<'a>(
    &'a self,
    pkg: &'a str,
    version: Option<&'a str>,
  ) -> impl Future<Output = Result<Option<ReleaseLine>, Self::Error>> + Send + 'a;

  /// Append a new entry. Returns `false` without writing when an entry for
  /// `(pkg, version)` already exists.
  fn create_release_line(
    &self,
    input: NewReleaseLine,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Insert `input` between `(input.pkg, successor)` and the entry that one
  /// pointed at: the new entry takes `input.previous_version` and
  /// `successor` is repointed at the new entry, in one step. Returns `false`
  /// without writing when `(pkg, version)` already exists.
  fn splice_release_line<'a>(
    &'a self,
    input: NewReleaseLine,
    successor: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Record `dependent@dependent_version` in the `(pkg, version)` entry.
  /// Returns `false` when no such entry exists.
  fn add_release_dependent<'a>(
    &'a self,
    pkg: &'a str,
    version: &'a str,
    dependent: &'a str,
    dependent_version: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Versions ──────────────────────────────────────────────────────────

  /// Retrieve a stored version by its `name@version` id.
  fn get_version<'a>(
    &'a self,
    version_id: &'a str,
  ) -> impl Future<Output = Result<Option<VersionRecord>, Self::Error>> + Send + 'a;

  fn put_version(
    &self,
    record: VersionRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Reconstruct the publish payload and tarballs of `record`. Returns
  /// `None` when no tarball was stored for it.
  fn get_attachment<'a>(
    &'a self,
    record: &'a VersionRecord,
  ) -> impl Future<Output = Result<Option<VersionAttachment>, Self::Error>> + Send + 'a;

  // ── Build heads ───────────────────────────────────────────────────────

  fn get_build_head<'a>(
    &'a self,
    env: Env,
    name: &'a str,
  ) -> impl Future<Output = Result<Option<BuildHead>, Self::Error>> + Send + 'a;

  fn put_build_head(
    &self,
    head: BuildHead,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
