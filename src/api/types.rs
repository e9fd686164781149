//! Domain types and serde shapes matching the task API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  Low,
  #[default]
  Medium,
  High,
}

impl Priority {
  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::Low => "low",
      Priority::Medium => "medium",
      Priority::High => "high",
    }
  }
}

impl fmt::Display for Priority {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Priority {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "low" => Ok(Priority::Low),
      "medium" => Ok(Priority::Medium),
      "high" => Ok(Priority::High),
      other => Err(format!("unknown priority '{}' (low, medium, high)", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
  #[default]
  #[serde(rename = "To Do")]
  ToDo,
  #[serde(rename = "In Progress")]
  InProgress,
  #[serde(rename = "Done")]
  Done,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::ToDo => "To Do",
      Status::InProgress => "In Progress",
      Status::Done => "Done",
    }
  }
}

impl fmt::Display for Status {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Status {
  type Err = String;

  /// Accepts the wire spelling as well as `todo`, `in-progress` and friends.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let normalized: String = s
      .trim()
      .to_lowercase()
      .chars()
      .filter(|c| c.is_alphanumeric())
      .collect();
    match normalized.as_str() {
      "todo" => Ok(Status::ToDo),
      "inprogress" => Ok(Status::InProgress),
      "done" => Ok(Status::Done),
      _ => Err(format!(
        "unknown status '{}' (To Do, In Progress, Done)",
        s.trim()
      )),
    }
  }
}

/// A task as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(default)]
  pub owner: String,
  pub title: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub status: Status,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
  #[serde(default)]
  pub created_at: String,
  #[serde(default)]
  pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  #[serde(alias = "_id")]
  pub id: String,
  pub name: String,
  pub email: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_at: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub updated_at: Option<String>,
}

/// Optional priority/status filter for list and search queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TaskFilter {
  pub priority: Option<Priority>,
  pub status: Option<Status>,
}

impl TaskFilter {
  pub fn is_empty(&self) -> bool {
    self.priority.is_none() && self.status.is_none()
  }

  /// Collapse an empty filter to `None` so it shares the unfiltered fingerprint.
  pub fn normalize(filter: Option<TaskFilter>) -> Option<TaskFilter> {
    filter.filter(|f| !f.is_empty())
  }

  /// Query-string pairs in the order the API expects them.
  pub fn query_pairs(&self) -> Vec<(&'static str, &'static str)> {
    let mut pairs = Vec::new();
    if let Some(priority) = self.priority {
      pairs.push(("priority", priority.as_str()));
    }
    if let Some(status) = self.status {
      pairs.push(("status", status.as_str()));
    }
    pairs
  }
}

/// Payload for `POST /tasks/create`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskInput {
  pub title: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
}

impl CreateTaskInput {
  pub fn new(title: impl Into<String>) -> Self {
    Self {
      title: title.into(),
      ..Self::default()
    }
  }
}

/// Partial payload for `PATCH /tasks/:id`. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskInput {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub priority: Option<Priority>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub status: Option<Status>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub due_date: Option<String>,
}

/// Cached result of a list or search query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPage {
  pub count: u64,
  #[serde(default)]
  pub tasks: Vec<Task>,
  /// Echo of the search term; `None` for plain listings.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub query: Option<String>,
}

// ============================================================================
// Response envelope
// ============================================================================

/// `{status, success?, message?, data?}` wrapper around every response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
  #[serde(default)]
  pub status: Option<String>,
  #[serde(default)]
  pub success: Option<bool>,
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default = "Option::default")]
  pub data: Option<T>,
}

impl<T> Envelope<T> {
  /// Both spellings of success appear in the wild.
  pub fn is_success(&self) -> bool {
    self.status.as_deref() == Some("success") || self.success == Some(true)
  }
}

#[derive(Debug, Deserialize)]
pub struct TaskEnvelope {
  pub task: Task,
}

/// User payload, either bare or nested under `user`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UserPayload {
  Nested { user: User },
  Bare(User),
}

impl From<UserPayload> for User {
  fn from(payload: UserPayload) -> Self {
    match payload {
      UserPayload::Nested { user } => user,
      UserPayload::Bare(user) => user,
    }
  }
}
