//! Task queries and the mutations that keep them consistent.
//!
//! Every successful mutation runs two steps in this order:
//! 1. a synchronous patch of the unfiltered list entry, so readers see the
//!    change immediately;
//! 2. invalidation of every task entry, which refetches the ones being
//!    watched in the background so filtered views and searches catch up.

use std::sync::{Arc, Mutex};

use tracing::info;

use crate::api::client::ApiClient;
use crate::api::types::{CreateTaskInput, Task, TaskFilter, TaskPage, UpdateTaskInput};
use crate::error::ApiError;
use crate::query::{KeyPrefix, QueryCache, QueryKey, Revalidation, RetryPolicy, Subscription};
use crate::validation::{validate_create, validate_update};

#[derive(Clone)]
pub struct TaskStore {
  api: ApiClient,
  cache: QueryCache<TaskPage>,
  mutation_retry: RetryPolicy,
  revalidations: Arc<Mutex<Vec<Revalidation>>>,
}

impl TaskStore {
  pub fn new(api: ApiClient, cache: QueryCache<TaskPage>) -> Self {
    Self {
      api,
      cache,
      mutation_retry: RetryPolicy::mutations(),
      revalidations: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn with_mutation_retry(mut self, retry: RetryPolicy) -> Self {
    self.mutation_retry = retry;
    self
  }

  pub fn cache(&self) -> &QueryCache<TaskPage> {
    &self.cache
  }

  pub fn api(&self) -> &ApiClient {
    &self.api
  }

  // ==========================================================================
  // Queries
  // ==========================================================================

  pub async fn list(&self, filter: Option<TaskFilter>) -> Result<TaskPage, ApiError> {
    let key = QueryKey::tasks(filter);
    let filter = TaskFilter::normalize(filter);
    let api = self.api.clone();
    self
      .cache
      .fetch(&key, move || {
        let api = api.clone();
        async move { api.list_tasks(filter.as_ref()).await }
      })
      .await
  }

  /// Search without any gating; see [`crate::search::SearchGate`] for the
  /// debounced, length-checked entry point.
  pub async fn search(&self, term: &str, filter: Option<TaskFilter>) -> Result<TaskPage, ApiError> {
    let key = QueryKey::search(term, filter);
    let term = term.trim().to_string();
    let filter = TaskFilter::normalize(filter);
    let api = self.api.clone();
    self
      .cache
      .fetch(&key, move || {
        let api = api.clone();
        let term = term.clone();
        async move { api.search_tasks(&term, filter.as_ref()).await }
      })
      .await
  }

  pub fn watch_list(&self, filter: Option<TaskFilter>) -> Subscription<TaskPage> {
    self.cache.subscribe(&QueryKey::tasks(filter))
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  /// Validate, create, then put the new task at the top of the unfiltered list.
  pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task, ApiError> {
    let input = validate_create(&input)?;
    let api = self.api.clone();
    let task = self
      .mutation_retry
      .run(|| {
        let api = api.clone();
        let input = input.clone();
        async move { api.create_task(&input).await }
      })
      .await?;

    self.cache.set_data(&QueryKey::unfiltered_tasks(), |page| {
      page.tasks.insert(0, task.clone());
      page.count += 1;
    });
    self.after_mutation();

    info!(id = %task.id, "Created task");
    Ok(task)
  }

  /// Validate the patch, update, then swap the task in the unfiltered list.
  pub async fn update_task(&self, id: &str, patch: UpdateTaskInput) -> Result<Task, ApiError> {
    let patch = validate_update(&patch)?;
    let api = self.api.clone();
    let task = self
      .mutation_retry
      .run(|| {
        let api = api.clone();
        let patch = patch.clone();
        let id = id.to_string();
        async move { api.update_task(&id, &patch).await }
      })
      .await?;

    self.cache.set_data(&QueryKey::unfiltered_tasks(), |page| {
      for existing in page.tasks.iter_mut().filter(|t| t.id == id) {
        *existing = task.clone();
      }
    });
    self.after_mutation();

    info!(id, "Updated task");
    Ok(task)
  }

  /// Delete, then drop the task from the unfiltered list.
  pub async fn delete_task(&self, id: &str) -> Result<(), ApiError> {
    let api = self.api.clone();
    self
      .mutation_retry
      .run(|| {
        let api = api.clone();
        let id = id.to_string();
        async move { api.delete_task(&id).await }
      })
      .await?;

    self.cache.set_data(&QueryKey::unfiltered_tasks(), |page| {
      page.tasks.retain(|t| t.id != id);
      page.count = page.count.saturating_sub(1);
    });
    self.after_mutation();

    info!(id, "Deleted task");
    Ok(())
  }

  fn after_mutation(&self) {
    let revalidation = self.cache.invalidate(&KeyPrefix::all_tasks());
    let mut pending = self
      .revalidations
      .lock()
      .unwrap_or_else(|p| p.into_inner());
    pending.retain(|r| !r.is_finished());
    pending.push(revalidation);
  }

  /// Wait for the background refetches started by earlier mutations.
  pub async fn settle(&self) {
    let pending: Vec<Revalidation> = {
      let mut guard = self
        .revalidations
        .lock()
        .unwrap_or_else(|p| p.into_inner());
      std::mem::take(&mut *guard)
    };
    for revalidation in pending {
      revalidation.wait().await;
    }
  }
}
