//! HTTP surface for the Ripple trigger engine.
//!
//! Exposes an axum [`Router`] that accepts change events and hands them to a
//! [`Dispatcher`] backed by any [`FeedStore`], [`BuildService`] and
//! [`RegistryGateway`].

pub mod clients;
pub mod error;

pub use error::ApiError;

use std::{path::PathBuf, sync::Arc, time::Duration};

use axum::{
  Json, Router,
  extract::{Path, State},
  routing::{get, post},
};
use bytes::Bytes;
use ripple_core::{
  Env,
  client::{BuildService, RegistryGateway},
  package::RegistryPayload,
  store::FeedStore,
};
use ripple_engine::{Dispatcher, EngineConfig};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ─── Configuration ───────────────────────────────────────────────────────────

/// Runtime server configuration, deserialised from `config.toml` and
/// `RIPPLE_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                 String,
  #[serde(default = "default_port")]
  pub port:                 u16,
  pub store_path:           PathBuf,
  /// Base URL of the build service; builds are posted to `/v2/build`.
  pub build_service_url:    String,
  /// Where rebuilt payloads are published.
  pub warehouse_url:        String,
  /// Where published versions are read from. May carry basic-auth
  /// credentials.
  pub registry_url:         String,
  #[serde(default = "default_concurrency")]
  pub concurrency:          usize,
  #[serde(default = "default_request_timeout")]
  pub request_timeout_secs: u64,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_port() -> u16 { 8080 }
fn default_concurrency() -> usize { EngineConfig::default().concurrency }
fn default_request_timeout() -> u64 { 30 }

impl ServerConfig {
  pub fn engine(&self) -> EngineConfig { EngineConfig { concurrency: self.concurrency } }

  pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
}

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
pub struct AppState<S, B, R> {
  pub dispatcher: Arc<Dispatcher<S, B, R>>,
}

impl<S, B, R> AppState<S, B, R> {
  pub fn new(dispatcher: Dispatcher<S, B, R>) -> Self {
    Self { dispatcher: Arc::new(dispatcher) }
  }
}

impl<S, B, R> Clone for AppState<S, B, R> {
  fn clone(&self) -> Self { Self { dispatcher: Arc::clone(&self.dispatcher) } }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the axum [`Router`].
///
/// - `GET  /healthz`
/// - `POST /change/{env}`: body is the registry payload; builds are promoted.
/// - `POST /v2/change/{env}`: body is `{"data": payload, "promote": bool}`.
pub fn router<S, B, R>(state: AppState<S, B, R>) -> Router
where
  S: FeedStore + 'static,
  B: BuildService + 'static,
  R: RegistryGateway + 'static,
{
  Router::new()
    .route("/healthz",           get(healthz))
    .route("/change/{env}",      post(change::<S, B, R>))
    .route("/v2/change/{env}",   post(change_v2::<S, B, R>))
    .fallback(not_found)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn healthz() -> Json<Value> { Json(json!({ "ok": true })) }

async fn not_found() -> ApiError { ApiError::NotFound }

async fn change<S, B, R>(
  State(state): State<AppState<S, B, R>>,
  Path(env): Path<String>,
  body: Bytes,
) -> Result<Json<Value>, ApiError>
where
  S: FeedStore + 'static,
  B: BuildService + 'static,
  R: RegistryGateway + 'static,
{
  let env = parse_env(&env)?;
  let payload = parse_payload(parse_json(&body)?)?;
  run(&state, env, payload, true).await
}

#[derive(Deserialize)]
struct ChangeRequest {
  data:    Value,
  #[serde(default = "default_promote")]
  promote: bool,
}

fn default_promote() -> bool { true }

async fn change_v2<S, B, R>(
  State(state): State<AppState<S, B, R>>,
  Path(env): Path<String>,
  body: Bytes,
) -> Result<Json<Value>, ApiError>
where
  S: FeedStore + 'static,
  B: BuildService + 'static,
  R: RegistryGateway + 'static,
{
  let env = parse_env(&env)?;
  let request: ChangeRequest =
    serde_json::from_value(parse_json(&body)?).map_err(|_| ApiError::InvalidPayload)?;
  let payload = parse_payload(request.data)?;
  run(&state, env, payload, request.promote).await
}

async fn run<S, B, R>(
  state: &AppState<S, B, R>,
  env: Env,
  payload: RegistryPayload,
  promote: bool,
) -> Result<Json<Value>, ApiError>
where
  S: FeedStore + 'static,
  B: BuildService + 'static,
  R: RegistryGateway + 'static,
{
  match state.dispatcher.change(env, &payload, promote).await {
    Ok(report) => {
      info!(
        change_id = %report.change_id,
        accepted = report.accepted(),
        failed = report.failed(),
        "change processed"
      );
      Ok(Json(json!({ "ok": true, "report": report })))
    }
    Err(e) if e.is_rejection() => {
      warn!(%env, name = %payload.name, error = %e, "change rejected");
      Err(e.into())
    }
    Err(e) => {
      error!(%env, name = %payload.name, error = %e, "change failed");
      Err(e.into())
    }
  }
}

// ─── Request parsing ─────────────────────────────────────────────────────────

fn parse_env(raw: &str) -> Result<Env, ApiError> {
  raw.parse().map_err(|_| ApiError::InvalidEnvironment)
}

fn parse_json(body: &[u8]) -> Result<Value, ApiError> {
  serde_json::from_slice(body).map_err(|_| ApiError::InvalidPayload)
}

/// The payload must be an object carrying a non-empty `name`.
fn parse_payload(value: Value) -> Result<RegistryPayload, ApiError> {
  let named = value
    .get("name")
    .and_then(Value::as_str)
    .is_some_and(|name| !name.is_empty());
  if !named {
    return Err(ApiError::InvalidPayload);
  }
  serde_json::from_value(value).map_err(|_| ApiError::InvalidPayload)
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use axum::{
    body::Body,
    http::{Request, StatusCode},
  };
  use futures::{StreamExt as _, stream};
  use ripple_core::client::{BuildEvent, BuildRequest, BuildStream, RegistryDocument};
  use ripple_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;

  use super::*;

  #[derive(Default)]
  struct Builds {
    requests: Mutex<Vec<BuildRequest>>,
  }

  impl BuildService for Builds {
    type Error = std::io::Error;

    async fn build(&self, request: BuildRequest) -> Result<BuildStream<Self::Error>, Self::Error> {
      self.requests.lock().unwrap().push(request);
      let event = BuildEvent { event: "queued".into(), details: Default::default() };
      Ok(stream::iter([Ok(event)]).boxed())
    }
  }

  struct Registry;

  impl RegistryGateway for Registry {
    type Error = std::io::Error;

    async fn publish(&self, _name: &str, _data: &RegistryPayload) -> Result<(), Self::Error> {
      Ok(())
    }

    async fn fetch(&self, _name: &str) -> Result<Option<RegistryDocument>, Self::Error> {
      Ok(None)
    }
  }

  async fn app() -> Router {
    let store = SqliteStore::open_in_memory().await.unwrap();
    let dispatcher = Dispatcher::new(
      Arc::new(store),
      Arc::new(Builds::default()),
      Arc::new(Registry),
      EngineConfig::default(),
    );
    router(AppState::new(dispatcher))
  }

  fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri(uri)
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  async fn send(req: Request<Body>) -> (StatusCode, Value) {
    let resp = app().await.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
  }

  fn cows() -> Value {
    json!({
      "name": "cows",
      "dist-tags": { "latest": "1.0.0" },
      "versions": { "1.0.0": { "name": "cows", "version": "1.0.0" } }
    })
  }

  #[tokio::test]
  async fn healthz_is_ok() {
    let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
    let (status, body) = send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
  }

  #[tokio::test]
  async fn unknown_route_is_not_found() {
    let (status, body) = send(post("/nope", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "ok": false, "message": "Not found" }));
  }

  #[tokio::test]
  async fn unknown_environment_is_rejected() {
    let (status, body) = send(post("/change/spacecake", cows())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Incorrect environment requested");
  }

  #[tokio::test]
  async fn non_object_body_is_rejected() {
    let (status, body) = send(post("/change/dev", json!(["cows"]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "ok": false, "message": "Invalid payload received" }));
  }

  #[tokio::test]
  async fn nameless_body_is_rejected() {
    let (status, _) = send(post("/change/dev", json!({ "versions": {} }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(post("/v2/change/dev", json!({ "data": { "name": "" } }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn unparsable_body_is_rejected() {
    let req = Request::builder()
      .method("POST")
      .uri("/change/dev")
      .body(Body::from("{not json"))
      .unwrap();
    let (status, body) = send(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid payload received");
  }

  #[tokio::test]
  async fn payload_without_latest_version_is_rejected_by_engine() {
    let (status, body) =
      send(post("/v2/change/test", json!({ "data": { "name": "cows" }, "promote": false }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
  }

  #[tokio::test]
  async fn legacy_change_returns_report() {
    let (status, body) = send(post("/change/dev", cows())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["report"]["name"], "cows");
    assert_eq!(body["report"]["env"], "dev");
    assert_eq!(body["report"]["dependents"], json!([]));
  }

  #[tokio::test]
  async fn v2_change_returns_report() {
    let (status, body) =
      send(post("/v2/change/prod", json!({ "data": cows(), "promote": false }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["report"]["version"], "1.0.0");
    assert_eq!(body["report"]["published"], false);
  }
}
