//! API error type and [`axum::response::IntoResponse`] implementation.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by a change handler. Every variant renders as
/// `{"ok": false, "message": ...}`.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("Incorrect environment requested")]
  InvalidEnvironment,

  #[error("Invalid payload received")]
  InvalidPayload,

  #[error("Not found")]
  NotFound,

  #[error("{0}")]
  Engine(#[from] ripple_engine::Error),
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match self {
      ApiError::InvalidEnvironment | ApiError::InvalidPayload => StatusCode::BAD_REQUEST,
      ApiError::NotFound => StatusCode::NOT_FOUND,
      ApiError::Engine(e) if e.is_rejection() => StatusCode::BAD_REQUEST,
      ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let body = json!({ "ok": false, "message": self.to_string() });
    (self.status(), Json(body)).into_response()
  }
}
