//! The change dispatcher.
//!
//! [`Dispatcher::change`] handles one change event end to end:
//!
//! 1. extract the tagged-latest descriptor, rejecting the payload before any
//!    write when it has none;
//! 2. resolve the package's managed dependencies into the graph;
//! 3. concurrently, attach a development publish to its parent's release
//!    line, and record the package's own release line and trigger every
//!    recorded dependent.
//!
//! Each dependent ends in a [`TriggerOutcome`]; one dependent failing never
//! stops the others.

use std::sync::Arc;

use futures::StreamExt as _;
use ripple_core::{
  Env,
  client::{BuildRequest, BuildService, RegistryGateway},
  increment::{Action, IncrementInput, increment},
  merge::MergePolicy,
  package::{PackageDescriptor, RegistryPayload},
  records::{BuildHead, ReleaseLine, VersionRecord},
  store::FeedStore,
  strategy::{self, Decision, Strategy},
  version::{self, Range},
};
use semver::Version;
use serde::Deserialize;
use tracing::{Instrument as _, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::{
  ChangeReport, DependentOutcome, Error, GraphResolver, Limiter, ReleaseLineManager, Result,
  SkipReason, Stage, TriggerOutcome, limiter::DEFAULT_WIDTH,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
  /// Width of the fan-out limiter.
  #[serde(default = "default_concurrency")]
  pub concurrency: usize,
}

fn default_concurrency() -> usize { DEFAULT_WIDTH }

impl Default for EngineConfig {
  fn default() -> Self { Self { concurrency: default_concurrency() } }
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher<S, B, R> {
  store:    Arc<S>,
  builds:   Arc<B>,
  registry: Arc<R>,
  limiter:  Limiter,
  resolver: GraphResolver<S>,
  releases: ReleaseLineManager<S>,
  merge:    MergePolicy,
}

/// What the registry knows about the changed package.
enum RootHistory {
  Published(Vec<Version>),
  Unknown,
  Unavailable(String),
}

/// Shared inputs of every dependent trigger of one change.
struct TriggerContext<'a> {
  env:     Env,
  root:    &'a PackageDescriptor,
  line:    Option<&'a ReleaseLine>,
  publish: bool,
  promote: bool,
  history: &'a RootHistory,
}

/// A dependent's evaluation either continues or ends in a terminal outcome.
type Step<T> = std::result::Result<T, TriggerOutcome>;

trait StageExt<T> {
  fn stage(self, stage: Stage) -> Step<T>;
}

impl<T, E: std::fmt::Display> StageExt<T> for std::result::Result<T, E> {
  fn stage(self, stage: Stage) -> Step<T> {
    self.map_err(|e| TriggerOutcome::failed(stage, e))
  }
}

fn skip<T>(reason: SkipReason) -> Step<T> { Err(TriggerOutcome::skipped(reason)) }

impl<S, B, R> Dispatcher<S, B, R>
where
  S: FeedStore,
  B: BuildService,
  R: RegistryGateway,
{
  pub fn new(store: Arc<S>, builds: Arc<B>, registry: Arc<R>, config: EngineConfig) -> Self {
    let limiter = Limiter::new(config.concurrency);
    Self {
      resolver: GraphResolver::new(Arc::clone(&store), limiter.clone()),
      releases: ReleaseLineManager::new(Arc::clone(&store)),
      store,
      builds,
      registry,
      limiter,
      merge: MergePolicy::default(),
    }
  }

  pub fn releases(&self) -> &ReleaseLineManager<S> { &self.releases }

  pub fn resolver(&self) -> &GraphResolver<S> { &self.resolver }

  /// Process one change event for `env`.
  pub async fn change(
    &self,
    env: Env,
    payload: &RegistryPayload,
    promote: bool,
  ) -> Result<ChangeReport> {
    let root = payload.descriptor()?;
    let change_id = Uuid::new_v4();
    let publish = env.is_development() && payload.published;

    let span = info_span!(
      "change",
      %change_id,
      name = %root.name,
      version = %root.version,
      %env,
    );

    async move {
      info!(publish, promote, "processing change");

      let managed = self.resolver.resolve(env, &root).await?;

      let (parent, triggered) = tokio::join!(
        async {
          if publish { self.update_parent(&root).await } else { Ok(None) }
        },
        self.trigger_dependents(env, &root, publish, promote),
      );
      let parent_release_line = parent?;
      let (release_line_created, dependents) = triggered?;

      let report = ChangeReport {
        change_id,
        env,
        name: root.name.clone(),
        version: root.version.clone(),
        published: publish,
        managed,
        release_line_created,
        parent_release_line,
        dependents,
      };

      info!(
        dependents = report.dependents.len(),
        accepted = report.accepted(),
        failed = report.failed(),
        "processed change"
      );
      Ok(report)
    }
    .instrument(span)
    .await
  }

  // ── Parent release line ───────────────────────────────────────────────────

  /// Attach `root@version` to the entry of its parent's release line whose
  /// version `root` declares a range for.
  async fn update_parent(&self, root: &PackageDescriptor) -> Result<Option<String>> {
    let parent = self.store.get_dependent_of(&root.name).await.map_err(Error::upstream)?;
    let Some(parent) = parent else {
      info!("package has no parent it depends on");
      return Ok(None);
    };

    let Some(head) = self.releases.get(&parent.dependent_of, None).await? else {
      info!(parent = %parent.dependent_of, "no release line for parent");
      return Ok(None);
    };

    let Some(range) = root.dependencies.get(&head.pkg).and_then(|r| Range::parse(r).ok()) else {
      info!(parent = %head.pkg, "no usable range declared for parent");
      return Ok(None);
    };

    let satisfied =
      |line: &ReleaseLine| version::parse(&line.version).is_ok_and(|v| range.satisfies(&v));

    // The head is usually the match; an older line is found by walking back.
    let Some(line) = self.releases.walk(head, |line| !satisfied(line)).await? else {
      info!(parent = %parent.dependent_of, "no release line satisfies the declared range");
      return Ok(None);
    };

    self
      .releases
      .add_dependent(&line.pkg, &line.version, &root.name, &root.version)
      .await?;
    Ok(Some(format!("{}@{}", line.pkg, line.version)))
  }

  // ── Dependents ────────────────────────────────────────────────────────────

  async fn trigger_dependents(
    &self,
    env: Env,
    root: &PackageDescriptor,
    publish: bool,
    promote: bool,
  ) -> Result<(bool, Vec<DependentOutcome>)> {
    // A publish triggers against the previous head; anything else against
    // the entry of this exact version.
    let lookup = (!publish).then_some(root.version.as_str());
    let (line, dependents) = tokio::join!(
      self.releases.get(&root.name, lookup),
      self.store.get_dependent(&root.name),
    );
    let line = line?;
    let dependents = dependents.map_err(Error::upstream)?;

    let created = if publish {
      self.releases.append(&root.name, &root.version, line.as_ref()).await?
    } else {
      false
    };

    let names = dependents.map(|d| d.dependents).unwrap_or_default();
    if names.is_empty() {
      debug!("no dependents to trigger");
      return Ok((created, Vec::new()));
    }

    let history = self.root_history(&root.name).await;
    let ctx = TriggerContext { env, root, line: line.as_ref(), publish, promote, history: &history };

    let outcomes = self.limiter.map(names, |name| self.trigger_one(&ctx, name)).await;
    Ok((created, outcomes))
  }

  /// Fetched once per change and shared by every dependent.
  async fn root_history(&self, name: &str) -> RootHistory {
    match self.registry.fetch(name).await {
      Ok(Some(doc)) => RootHistory::Published(doc.sorted_versions()),
      Ok(None) => RootHistory::Unknown,
      Err(e) => {
        error!(error = %e, "registry fetch failed");
        RootHistory::Unavailable(e.to_string())
      }
    }
  }

  async fn trigger_one(&self, ctx: &TriggerContext<'_>, name: String) -> DependentOutcome {
    let mut strategy = None;
    let outcome = self
      .evaluate(ctx, &name, &mut strategy)
      .await
      .unwrap_or_else(|terminal| terminal);

    match &outcome {
      TriggerOutcome::Failed { stage, error } => {
        error!(dependent = %name, ?stage, error = %error, "dependent trigger failed")
      }
      TriggerOutcome::Skipped { reason } => debug!(dependent = %name, ?reason, "skipped"),
      TriggerOutcome::Accepted { .. } => {}
    }

    DependentOutcome { name, strategy, outcome }
  }

  async fn evaluate(
    &self,
    ctx: &TriggerContext<'_>,
    name: &str,
    strategy: &mut Option<Strategy>,
  ) -> Step<TriggerOutcome> {
    // Promotions rebuild the exact version bundled with the root.
    let release_version = ctx.line.and_then(|line| line.dependents.get(name)).cloned();

    let Some(pkg) = self.store.get_package(name).await.stage(Stage::Package)? else {
      debug!(dependent = name, "not managed");
      return skip(SkipReason::NotManaged);
    };

    let published = match ctx.history {
      RootHistory::Published(versions) => versions,
      RootHistory::Unknown => return skip(SkipReason::RootNotInRegistry),
      RootHistory::Unavailable(error) => {
        return Err(TriggerOutcome::failed(Stage::Registry, error));
      }
    };

    let decision = strategy::decide(ctx.env, ctx.root, &pkg, ctx.line, published);
    *strategy = Some(decision.strategy);
    info!(
      dependent = name,
      strategy = %decision.strategy,
      trigger = decision.trigger,
      fetch_release_version = ?decision.fetch_release_version,
      "trigger strategy decided"
    );

    if !decision.trigger {
      info!(dependent = name, "range does not include the new version; not triggering");
      return skip(SkipReason::NotTriggered { strategy: decision.strategy });
    }

    let previous_release_version = self.previous_release_version(ctx, name, &decision).await?;

    let fetch_version = match (&release_version, &previous_release_version) {
      (Some(version), _) if !ctx.publish => version.clone(),
      (_, Some(version)) => version.clone(),
      _ => pkg.version.clone(),
    };
    let version_id = VersionRecord::id(&pkg.name, &fetch_version);
    debug!(dependent = name, %version_id, "fetching version and build head");

    let (record, head) = tokio::join!(
      self.store.get_version(&version_id),
      self.store.get_build_head(ctx.env, name),
    );
    let Some(record) = record.stage(Stage::Version)? else {
      return skip(SkipReason::VersionNotFound { version_id });
    };
    let head = head
      .stage(Stage::BuildHead)?
      .unwrap_or_else(|| BuildHead::initial(ctx.env, name));

    let Some(attachment) = self.store.get_attachment(&record).await.stage(Stage::Attachment)? else {
      warn!(dependent = name, %version_id, "no attachment stored");
      return skip(SkipReason::NoAttachment { version_id });
    };

    let data = self.merge.expand(attachment, &pkg, ctx.env).stage(Stage::Merge)?;

    let incremented = match increment(IncrementInput {
      strategy:                 decision.strategy,
      payload:                  &data,
      head:                     &head,
      release_version:          release_version.as_deref(),
      previous_release_version: previous_release_version.as_deref(),
      publish:                  ctx.publish,
    }) {
      Ok(incremented) => incremented,
      Err(ripple_core::Error::MissingBaseVersion(_)) => {
        return skip(SkipReason::NoBaseVersion { strategy: decision.strategy });
      }
      Err(e) => return Err(TriggerOutcome::failed(Stage::Increment, e)),
    };

    info!(
      dependent = name,
      action = ?incremented.action,
      version = ?incremented.version,
      changed = incremented.changed,
      "dispatching"
    );

    match incremented.action {
      Action::Publish => {
        let payload = &incremented.payload;
        self.registry.publish(&payload.name, payload).await.stage(Stage::Publish)?;
      }
      Action::Build => {
        let request = BuildRequest { promote: ctx.promote, data: incremented.payload };
        self.build(request).await.stage(Stage::Build)?;
      }
    }

    Ok(TriggerOutcome::Accepted { action: incremented.action, version: incremented.version })
  }

  /// The dependent version recorded in an older release-line entry of the
  /// root, for publishes that return to a major seen before.
  async fn previous_release_version(
    &self,
    ctx: &TriggerContext<'_>,
    name: &str,
    decision: &Decision,
  ) -> Step<Option<String>> {
    if !ctx.publish {
      return Ok(None);
    }

    let mut found = None;

    if let Some(version) = &decision.fetch_release_version {
      let line = self
        .releases
        .get(&ctx.root.name, Some(version))
        .await
        .stage(Stage::ReleaseLine)?;
      found = line.and_then(|line| line.dependents.get(name).cloned());
      debug!(dependent = name, release = %version, found = ?found, "release version lookup");
    }

    if decision.strategy == Strategy::Previous {
      let Some(start) = ctx.line else {
        return Ok(found);
      };
      let Ok(current) = version::parse(&start.version) else {
        return Ok(found);
      };
      let target = current.major as i128 - 1;

      let line = self
        .releases
        .walk(start.clone(), |line| {
          version::parse(&line.version).is_ok_and(|v| target < v.major as i128)
        })
        .await
        .stage(Stage::ReleaseLine)?;
      found = line.and_then(|line| line.dependents.get(name).cloned());
      debug!(dependent = name, target_major = target, found = ?found, "previous major lookup");
    }

    Ok(found)
  }

  /// Submit a build and wait for its first status. An `error` status, a
  /// transport failure, or a log without any status fails the build.
  async fn build(&self, request: BuildRequest) -> Result<()> {
    let name = request.data.name.clone();
    let mut log = self.builds.build(request).await.map_err(Error::upstream)?;

    let Some(event) = log.next().await else {
      return Err(Error::EmptyBuildLog);
    };
    let event = event.map_err(Error::upstream)?;
    info!(%name, event = %event.event, "build status");

    if event.is_error() {
      let message = event
        .details
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("build service reported an error")
        .to_owned();
      return Err(Error::BuildFailed(message));
    }
    Ok(())
  }
}
