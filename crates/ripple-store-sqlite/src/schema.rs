//! SQL schema for the Ripple SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- The managed-package universe.
CREATE TABLE IF NOT EXISTS packages (
    name        TEXT PRIMARY KEY,
    record_json TEXT NOT NULL
);

-- A row here means the dependents record exists, even with no members.
CREATE TABLE IF NOT EXISTS dependents (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS dependent_members (
    name      TEXT NOT NULL REFERENCES dependents(name),
    dependent TEXT NOT NULL,
    UNIQUE (name, dependent)
);

CREATE TABLE IF NOT EXISTS dependent_of (
    pkg          TEXT PRIMARY KEY,
    dependent_of TEXT NOT NULL
);

-- Append-only; only `dependents_json` is ever updated.
CREATE TABLE IF NOT EXISTS release_lines (
    pkg              TEXT NOT NULL,
    version          TEXT NOT NULL,
    previous_version TEXT,
    dependents_json  TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL,   -- ISO 8601 UTC; server-assigned
    PRIMARY KEY (pkg, version)
);

CREATE TABLE IF NOT EXISTS versions (
    version_id TEXT PRIMARY KEY,      -- name@version
    name       TEXT NOT NULL,
    version    TEXT NOT NULL,
    value      TEXT NOT NULL
);

-- Tarballs are kept apart from the payload; a version may have none.
CREATE TABLE IF NOT EXISTS tarballs (
    version_id       TEXT PRIMARY KEY REFERENCES versions(version_id),
    attachments_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS build_heads (
    env                     TEXT NOT NULL,
    name                    TEXT NOT NULL,
    version                 TEXT NOT NULL,
    rollback_build_ids_json TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (env, name)
);

CREATE INDEX IF NOT EXISTS release_lines_previous_idx
    ON release_lines(pkg, previous_version);

PRAGMA user_version = 1;
";
