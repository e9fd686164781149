//! HTTP transport: base URL, credentials, error normalization and the
//! login redirect on 401.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{ApiError, FALLBACK_MESSAGE};

/// Anything that can carry a JSON request to the API.
///
/// Implementations never retry; that is the query cache's job.
#[async_trait]
pub trait Transport: Send + Sync {
  async fn request(&self, method: Method, path: &str, body: Option<Value>)
    -> Result<Value, ApiError>;

  /// Session credentials as a `Cookie` header value, if the transport
  /// holds any.
  fn session(&self) -> Option<String> {
    None
  }
}

/// Side effect fired when the API answers 401.
pub trait LoginRedirect: Send + Sync {
  fn redirect_to_login(&self);
}

/// Redirect hook that only logs.
pub struct LogRedirect;

impl LoginRedirect for LogRedirect {
  fn redirect_to_login(&self) {
    warn!("Session rejected by the server, login required");
  }
}

/// reqwest-backed transport with a cookie jar for the session.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base_url: Url,
  jar: Arc<Jar>,
  redirect: Arc<dyn LoginRedirect>,
}

impl HttpTransport {
  /// Create a transport for `base_url`.
  ///
  /// `session` is a previously saved `Cookie` header value; its pairs are
  /// loaded into the jar so they are sent with every request.
  pub fn new(
    base_url: &str,
    session: Option<&str>,
    redirect: Arc<dyn LoginRedirect>,
  ) -> Result<Self, ApiError> {
    let base_url = Url::parse(base_url.trim_end_matches('/'))
      .map_err(|e| ApiError::request(None, format!("Invalid API URL '{}': {}", base_url, e)))?;

    let jar = Arc::new(Jar::default());
    if let Some(session) = session {
      for pair in session.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        jar.add_cookie_str(pair, &base_url);
      }
    }

    let client = reqwest::Client::builder()
      .cookie_provider(Arc::clone(&jar))
      .build()
      .map_err(|e| ApiError::transient(None, format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url,
      jar,
      redirect,
    })
  }

  pub fn base_url(&self) -> &Url {
    &self.base_url
  }

  fn url_for(&self, path: &str) -> Result<Url, ApiError> {
    join_url(&self.base_url, path)
  }
}

/// Append `path` (which may carry a query string) to the base URL, keeping
/// any path prefix the base already has.
pub fn join_url(base: &Url, path: &str) -> Result<Url, ApiError> {
  let joined = format!(
    "{}/{}",
    base.as_str().trim_end_matches('/'),
    path.trim_start_matches('/')
  );
  Url::parse(&joined).map_err(|e| ApiError::request(None, format!("Invalid path '{}': {}", path, e)))
}

#[async_trait]
impl Transport for HttpTransport {
  async fn request(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
  ) -> Result<Value, ApiError> {
    let url = self.url_for(path)?;
    debug!(%method, %url, "API request");

    let mut builder = self.client.request(method.clone(), url);
    if let Some(body) = body {
      builder = builder.json(&body);
    }

    let response = match builder.send().await {
      Ok(response) => response,
      Err(e) => {
        warn!(%method, path, error = %e, "API request failed without a response");
        return Err(normalize_error(None, None, Some(&e.to_string())));
      }
    };

    let status = response.status();
    let text = match response.text().await {
      Ok(text) => text,
      Err(e) => return Err(normalize_error(Some(status.as_u16()), None, Some(&e.to_string()))),
    };
    let json = if text.trim().is_empty() {
      Value::Null
    } else {
      serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    if status.is_success() {
      return Ok(json);
    }

    if status.as_u16() == 401 {
      self.redirect.redirect_to_login();
    }

    let error = normalize_error(
      Some(status.as_u16()),
      Some(&json),
      status.canonical_reason(),
    );
    debug!(%method, path, status = status.as_u16(), error = %error, "API error response");
    Err(error)
  }

  fn session(&self) -> Option<String> {
    self
      .jar
      .cookies(&self.base_url)
      .and_then(|v| v.to_str().ok().map(String::from))
  }
}

/// Collapse the different failure shapes into one `ApiError`.
///
/// The message comes from the body's `message` field if present, then from
/// the transport failure, then [`FALLBACK_MESSAGE`].
pub fn normalize_error(
  status: Option<u16>,
  body: Option<&Value>,
  transport_message: Option<&str>,
) -> ApiError {
  let message = body
    .and_then(|b| b.get("message"))
    .and_then(Value::as_str)
    .filter(|m| !m.trim().is_empty())
    .or(transport_message.filter(|m| !m.trim().is_empty()))
    .unwrap_or(FALLBACK_MESSAGE)
    .to_string();

  match status {
    Some(status) => ApiError::from_status(status, message),
    None => ApiError::transient(None, message),
  }
}
