//! HTTP implementations of [`BuildService`] and [`RegistryGateway`].

use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt as _, stream};
use reqwest::{Client, StatusCode, Url};
use ripple_core::{
  client::{
    BuildEvent, BuildRequest, BuildService, BuildStream, RegistryDocument, RegistryGateway,
  },
  package::RegistryPayload,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ClientError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("malformed build event: {0}")]
  Json(#[from] serde_json::Error),

  #[error("invalid url {0:?}")]
  InvalidUrl(String),
}

fn http_client(timeout: Duration) -> Result<Client, ClientError> {
  Ok(Client::builder().timeout(timeout).build()?)
}

fn parse_url(raw: &str) -> Result<Url, ClientError> {
  Url::parse(raw).map_err(|_| ClientError::InvalidUrl(raw.to_owned()))
}

/// `base` with `segment` appended as a single, percent-encoded path segment.
/// Scoped names keep their `/` inside the segment.
fn join_segment(base: &Url, segment: &str) -> Result<Url, ClientError> {
  let mut url = base.clone();
  url
    .path_segments_mut()
    .map_err(|_| ClientError::InvalidUrl(base.to_string()))?
    .pop_if_empty()
    .push(segment);
  Ok(url)
}

// ─── Build service ───────────────────────────────────────────────────────────

/// Submits builds to `{base_url}/v2/build` and reads the newline-delimited
/// JSON status log from the response body.
pub struct HttpBuildService {
  client:   Client,
  base_url: String,
}

impl HttpBuildService {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
    parse_url(base_url)?;
    Ok(Self {
      client:   http_client(timeout)?,
      base_url: base_url.trim_end_matches('/').to_owned(),
    })
  }
}

impl BuildService for HttpBuildService {
  type Error = ClientError;

  async fn build(&self, request: BuildRequest) -> Result<BuildStream<ClientError>, ClientError> {
    let url = format!("{}/v2/build", self.base_url);
    debug!(%url, name = %request.data.name, promote = request.promote, "submitting build");

    let resp = self
      .client
      .post(&url)
      .json(&request)
      .send()
      .await?
      .error_for_status()?;

    Ok(ndjson(resp.bytes_stream()))
  }
}

/// Split a byte stream into lines and decode each non-blank one as a
/// [`BuildEvent`]. A trailing line without a newline is still decoded. The
/// stream ends after the first transport error.
fn ndjson<S>(body: S) -> BuildStream<ClientError>
where
  S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
  stream::unfold(
    (Box::pin(body), Vec::<u8>::new(), false),
    |(mut body, mut buf, mut done)| async move {
      loop {
        if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
          let line: Vec<u8> = buf.drain(..=pos).collect();
          let line = line.trim_ascii();
          if line.is_empty() {
            continue;
          }
          let event = serde_json::from_slice::<BuildEvent>(line).map_err(ClientError::from);
          return Some((event, (body, buf, done)));
        }

        if done {
          if buf.trim_ascii().is_empty() {
            return None;
          }
          let rest = std::mem::take(&mut buf);
          let event =
            serde_json::from_slice::<BuildEvent>(rest.trim_ascii()).map_err(ClientError::from);
          return Some((event, (body, buf, done)));
        }

        match body.next().await {
          Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
          Some(Err(e)) => {
            buf.clear();
            return Some((Err(ClientError::from(e)), (body, buf, true)));
          }
          None => done = true,
        }
      }
    },
  )
  .boxed()
}

// ─── Registry gateway ────────────────────────────────────────────────────────

/// Publishes through the warehouse and reads package documents from the
/// registry. Credentials embedded in `registry_url` are sent as basic auth.
pub struct HttpRegistry {
  client:        Client,
  warehouse_url: Url,
  registry_url:  Url,
  credentials:   Option<(String, Option<String>)>,
}

impl HttpRegistry {
  pub fn new(warehouse_url: &str, registry_url: &str, timeout: Duration) -> Result<Self, ClientError> {
    let mut registry = parse_url(registry_url)?;

    let credentials = (!registry.username().is_empty())
      .then(|| (registry.username().to_owned(), registry.password().map(str::to_owned)));
    if credentials.is_some() {
      registry
        .set_username("")
        .and_then(|_| registry.set_password(None))
        .map_err(|_| ClientError::InvalidUrl(registry_url.to_owned()))?;
    }

    Ok(Self {
      client: http_client(timeout)?,
      warehouse_url: parse_url(warehouse_url)?,
      registry_url: registry,
      credentials,
    })
  }
}

impl RegistryGateway for HttpRegistry {
  type Error = ClientError;

  async fn publish(&self, name: &str, data: &RegistryPayload) -> Result<(), ClientError> {
    let url = join_segment(&self.warehouse_url, name)?;
    debug!(%url, name, "publishing to warehouse");

    self
      .client
      .put(url)
      .json(data)
      .send()
      .await?
      .error_for_status()?;
    Ok(())
  }

  async fn fetch(&self, name: &str) -> Result<Option<RegistryDocument>, ClientError> {
    let url = join_segment(&self.registry_url, name)?;
    debug!(%url, name, "fetching registry document");

    let mut req = self.client.get(url);
    if let Some((user, pass)) = &self.credentials {
      req = req.basic_auth(user, pass.as_deref());
    }

    let resp = req.send().await?;
    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    Ok(Some(resp.error_for_status()?.json().await?))
  }
}
