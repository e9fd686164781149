//! Test doubles shared by the module tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use crate::api::transport::Transport;
use crate::error::ApiError;

type Reply = Result<Value, ApiError>;

/// Scripted transport keyed by `"METHOD path"`.
///
/// Replies queued for a key are consumed in order; the last one repeats.
#[derive(Default)]
pub struct MockTransport {
  replies: Mutex<HashMap<String, VecDeque<Reply>>>,
  calls: Mutex<Vec<(String, Option<Value>)>>,
  delay: Mutex<Option<Duration>>,
  session: Mutex<Option<String>>,
}

impl MockTransport {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn respond(&self, key: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(key.to_string())
      .or_default()
      .push_back(reply);
  }

  /// Sleep this long before every reply.
  pub fn set_delay(&self, delay: Duration) {
    *self.delay.lock().unwrap() = Some(delay);
  }

  /// Cookie header reported as the current session.
  pub fn set_session(&self, cookies: &str) {
    *self.session.lock().unwrap() = Some(cookies.to_string());
  }

  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
  }

  pub fn bodies(&self) -> Vec<Option<Value>> {
    self.calls.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
  }

  pub fn call_count(&self, key: &str) -> usize {
    self.calls.lock().unwrap().iter().filter(|(k, _)| k == key).count()
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, ApiError> {
    let key = format!("{} {}", method, path);
    self.calls.lock().unwrap().push((key.clone(), body));

    let delay = *self.delay.lock().unwrap();
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }

    let mut replies = self.replies.lock().unwrap();
    match replies.get_mut(&key) {
      Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
      Some(queue) if !queue.is_empty() => queue[0].clone(),
      _ => Err(ApiError::request(Some(404), format!("no mock for {}", key))),
    }
  }

  fn session(&self) -> Option<String> {
    self.session.lock().unwrap().clone()
  }
}

pub fn task_json(id: &str, title: &str) -> Value {
  json!({
    "_id": id,
    "owner": "u1",
    "title": title,
    "priority": "medium",
    "status": "To Do",
    "createdAt": "2026-10-01T00:00:00Z",
    "updatedAt": "2026-10-01T00:00:00Z"
  })
}

/// Successful list envelope with the given tasks.
pub fn list_reply(tasks: &[(&str, &str)]) -> Reply {
  let tasks: Vec<Value> = tasks.iter().map(|(id, title)| task_json(id, title)).collect();
  Ok(json!({"status": "success", "data": {"count": tasks.len(), "tasks": tasks}}))
}

pub fn search_reply(query: &str, tasks: &[(&str, &str)]) -> Reply {
  let tasks: Vec<Value> = tasks.iter().map(|(id, title)| task_json(id, title)).collect();
  Ok(json!({"status": "success", "data": {"count": tasks.len(), "query": query, "tasks": tasks}}))
}

pub fn task_reply(id: &str, title: &str) -> Reply {
  Ok(json!({"status": "success", "data": {"task": task_json(id, title)}}))
}
