//! Typed results of a change event.

use ripple_core::{Env, increment::Action, strategy::Strategy};
use serde::Serialize;
use uuid::Uuid;

/// Why a dependent was not dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
  /// The dependent is not in the package store.
  NotManaged,
  /// The registry does not know the changed package.
  RootNotInRegistry,
  /// The strategy decided the dependent is not affected.
  NotTriggered { strategy: Strategy },
  /// No stored version to rebuild from.
  VersionNotFound { version_id: String },
  /// The stored version has no tarball.
  NoAttachment { version_id: String },
  /// The strategy needs a release-line version that could not be found.
  NoBaseVersion { strategy: Strategy },
}

/// The step a dependent failed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
  Package,
  Registry,
  ReleaseLine,
  Version,
  BuildHead,
  Attachment,
  Merge,
  Increment,
  Build,
  Publish,
}

/// Terminal state of one dependent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
  Skipped { reason: SkipReason },
  Accepted { action: Action, version: Option<String> },
  Failed { stage: Stage, error: String },
}

impl TriggerOutcome {
  pub fn skipped(reason: SkipReason) -> Self { Self::Skipped { reason } }

  pub fn failed(stage: Stage, error: impl ToString) -> Self {
    Self::Failed { stage, error: error.to_string() }
  }

  pub fn is_accepted(&self) -> bool { matches!(self, Self::Accepted { .. }) }

  pub fn is_failed(&self) -> bool { matches!(self, Self::Failed { .. }) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependentOutcome {
  pub name:     String,
  /// `None` when the dependent ended before a strategy was decided.
  pub strategy: Option<Strategy>,
  #[serde(flatten)]
  pub outcome:  TriggerOutcome,
}

/// Everything one change event did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
  pub change_id:            Uuid,
  pub env:                  Env,
  pub name:                 String,
  pub version:              String,
  /// Whether the change was a development publish.
  pub published:            bool,
  /// Dependencies of the package found in the package store.
  pub managed:              Vec<String>,
  /// Whether a release-line entry was created for the package.
  pub release_line_created: bool,
  /// `pkg@version` of the parent release-line entry the package was added
  /// to.
  pub parent_release_line:  Option<String>,
  pub dependents:           Vec<DependentOutcome>,
}

impl ChangeReport {
  pub fn accepted(&self) -> usize {
    self.dependents.iter().filter(|d| d.outcome.is_accepted()).count()
  }

  pub fn failed(&self) -> usize {
    self.dependents.iter().filter(|d| d.outcome.is_failed()).count()
  }
}
