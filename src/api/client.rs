use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::form_urlencoded;

use crate::api::transport::Transport;
use crate::api::types::{
  CreateTaskInput, Envelope, Task, TaskEnvelope, TaskFilter, TaskPage, UpdateTaskInput, User,
  UserPayload,
};
use crate::error::ApiError;

/// Typed wrapper over the task API endpoints.
#[derive(Clone)]
pub struct ApiClient {
  transport: Arc<dyn Transport>,
}

impl ApiClient {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self { transport }
  }

  /// Cookies the transport currently holds.
  pub fn session(&self) -> Option<String> {
    self.transport.session()
  }

  // ==========================================================================
  // Auth
  // ==========================================================================

  pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
    let body = serde_json::json!({ "email": email, "password": password });
    let payload: UserPayload = self
      .call(Method::POST, "/auth/login", Some(body), "Login failed")
      .await?;
    Ok(payload.into())
  }

  pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<User, ApiError> {
    let body = serde_json::json!({ "name": name, "email": email, "password": password });
    let payload: UserPayload = self
      .call(Method::POST, "/auth/register", Some(body), "Registration failed")
      .await?;
    Ok(payload.into())
  }

  pub async fn logout(&self) -> Result<(), ApiError> {
    self
      .call_no_data(Method::POST, "/auth/logout", None, "Logout failed")
      .await
  }

  /// Renew the access cookie using the refresh cookie.
  pub async fn refresh(&self) -> Result<(), ApiError> {
    self
      .call_no_data(Method::POST, "/auth/refresh", None, "Session refresh failed")
      .await
  }

  pub async fn current_user(&self) -> Result<User, ApiError> {
    let payload: UserPayload = self
      .call(Method::GET, "/auth/me", None, "Not authenticated")
      .await?;
    Ok(payload.into())
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  /// `GET /tasks/get`, with filter parameters only when a filter is set.
  pub async fn list_tasks(&self, filter: Option<&TaskFilter>) -> Result<TaskPage, ApiError> {
    let path = with_query("/tasks/get", filter, None);
    let mut page: TaskPage = self
      .call(Method::GET, &path, None, "Failed to fetch tasks")
      .await?;
    page.query = None;
    Ok(page)
  }

  /// `GET /tasks/search?q=...`.
  pub async fn search_tasks(
    &self,
    query: &str,
    filter: Option<&TaskFilter>,
  ) -> Result<TaskPage, ApiError> {
    let path = with_query("/tasks/search", filter, Some(query));
    let mut page: TaskPage = self
      .call(Method::GET, &path, None, "Failed to search tasks")
      .await?;
    if page.query.is_none() {
      page.query = Some(query.to_string());
    }
    Ok(page)
  }

  pub async fn create_task(&self, input: &CreateTaskInput) -> Result<Task, ApiError> {
    let body = to_body(input)?;
    let data: TaskEnvelope = self
      .call(Method::POST, "/tasks/create", Some(body), "Failed to create task")
      .await?;
    Ok(data.task)
  }

  pub async fn update_task(&self, id: &str, input: &UpdateTaskInput) -> Result<Task, ApiError> {
    let body = to_body(input)?;
    let path = format!("/tasks/{}", encode_segment(id));
    let data: TaskEnvelope = self
      .call(Method::PATCH, &path, Some(body), "Failed to update task")
      .await?;
    Ok(data.task)
  }

  pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
    let path = format!("/tasks/{}", encode_segment(id));
    self
      .call_no_data(Method::DELETE, &path, None, "Failed to delete task")
      .await
  }

  // ==========================================================================
  // Envelope handling
  // ==========================================================================

  async fn call<T: DeserializeOwned>(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    fallback: &str,
  ) -> Result<T, ApiError> {
    let value = self.transport.request(method, path, body).await?;
    let envelope: Envelope<T> = serde_json::from_value(value)
      .map_err(|e| ApiError::request(None, format!("{}: unexpected response ({})", fallback, e)))?;

    match (envelope.is_success(), envelope.data) {
      (true, Some(data)) => Ok(data),
      (_, _) => Err(ApiError::request(
        None,
        envelope.message.unwrap_or_else(|| fallback.to_string()),
      )),
    }
  }

  async fn call_no_data(
    &self,
    method: Method,
    path: &str,
    body: Option<Value>,
    fallback: &str,
  ) -> Result<(), ApiError> {
    let value = self.transport.request(method, path, body).await?;
    // 204 and bare bodies count as success
    if value.is_null() {
      return Ok(());
    }
    let envelope: Envelope<Value> = serde_json::from_value(value)
      .map_err(|e| ApiError::request(None, format!("{}: unexpected response ({})", fallback, e)))?;
    if envelope.is_success() {
      Ok(())
    } else {
      Err(ApiError::request(
        None,
        envelope.message.unwrap_or_else(|| fallback.to_string()),
      ))
    }
  }
}

fn to_body(input: &impl serde::Serialize) -> Result<Value, ApiError> {
  serde_json::to_value(input)
    .map_err(|e| ApiError::request(None, format!("Failed to encode request: {}", e)))
}

/// Build `path?q=..&priority=..&status=..`, omitting the `?` when empty.
pub fn with_query(path: &str, filter: Option<&TaskFilter>, query: Option<&str>) -> String {
  let mut serializer = form_urlencoded::Serializer::new(String::new());
  if let Some(q) = query {
    serializer.append_pair("q", q);
  }
  if let Some(filter) = filter {
    for (name, value) in filter.query_pairs() {
      serializer.append_pair(name, value);
    }
  }
  let query = serializer.finish();
  if query.is_empty() {
    path.to_string()
  } else {
    format!("{}?{}", path, query)
  }
}

/// Percent-encode one path segment. Unlike form encoding, a space is `%20`.
fn encode_segment(segment: &str) -> String {
  urlencoding::encode(segment).into_owned()
}
