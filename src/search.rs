//! Debounced, length-gated task search.
//!
//! The gate moves `Idle -> Searching -> Idle`. Input only reaches the
//! network once it has been stable for the debounce delay and its trimmed
//! length reaches the minimum. Shorter input reports an empty, non-loading
//! result without any request.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::types::{Task, TaskFilter};
use crate::debounce::{Debounce, DebounceInput, SEARCH_DEBOUNCE};
use crate::error::ApiError;
use crate::query::QueryKey;
use crate::recent::RecentSearches;
use crate::tasks::TaskStore;

pub const MIN_SEARCH_LENGTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
  pub debounce: Duration,
  pub min_length: usize,
}

impl Default for SearchOptions {
  fn default() -> Self {
    Self {
      debounce: SEARCH_DEBOUNCE,
      min_length: MIN_SEARCH_LENGTH,
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SearchPhase {
  #[default]
  Idle,
  Searching,
}

/// What a search box should render.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchView {
  /// Last debounced input, untrimmed
  pub query: String,
  pub filter: Option<TaskFilter>,
  pub phase: SearchPhase,
  pub loading: bool,
  pub tasks: Vec<Task>,
  pub count: u64,
  pub error: Option<ApiError>,
}

/// Aborts the wrapped task when dropped or replaced.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
  fn drop(&mut self) {
    self.0.abort();
  }
}

pub struct SearchGate {
  input: DebounceInput<String>,
  filter: watch::Sender<Option<TaskFilter>>,
  state: watch::Receiver<SearchView>,
  _task: AbortOnDrop,
}

impl SearchGate {
  pub fn new(store: TaskStore, recent: Arc<RecentSearches>, options: SearchOptions) -> Self {
    let debounce = Debounce::new(options.debounce);
    let input = debounce.input();
    let (filter_tx, filter_rx) = watch::channel(None);
    let (state_tx, state_rx) = watch::channel(SearchView::default());

    let task = tokio::spawn(run_gate(
      debounce,
      filter_rx,
      state_tx,
      store,
      recent,
      options.min_length,
    ));

    Self {
      input,
      filter: filter_tx,
      state: state_rx,
      _task: AbortOnDrop(task),
    }
  }

  /// Feed the raw text of the search box.
  pub fn set_query(&self, query: impl Into<String>) {
    self.input.set(query.into());
  }

  /// Change the filter. Takes effect without waiting for the debounce.
  pub fn set_filter(&self, filter: Option<TaskFilter>) {
    let filter = TaskFilter::normalize(filter);
    self.filter.send_if_modified(|current| {
      if *current == filter {
        false
      } else {
        *current = filter;
        true
      }
    });
  }

  pub fn state(&self) -> SearchView {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<SearchView> {
    self.state.clone()
  }

  /// Next view published after the last one seen through this method.
  pub async fn changed(&mut self) -> Option<SearchView> {
    self.state.changed().await.ok()?;
    Some(self.state.borrow_and_update().clone())
  }

  /// Wait until `query` has been evaluated and is no longer loading.
  pub async fn wait_for(&self, query: &str) -> SearchView {
    let mut state = self.state.clone();
    loop {
      {
        let view = state.borrow_and_update();
        if view.query == query && !view.loading {
          return view.clone();
        }
      }
      if state.changed().await.is_err() {
        return self.state();
      }
    }
  }
}

async fn run_gate(
  mut debounce: Debounce<String>,
  mut filter_rx: watch::Receiver<Option<TaskFilter>>,
  state: watch::Sender<SearchView>,
  store: TaskStore,
  recent: Arc<RecentSearches>,
  min_length: usize,
) {
  let state = Arc::new(state);
  let mut query = String::new();
  let mut in_flight: Option<(QueryKey, AbortOnDrop)> = None;

  loop {
    tokio::select! {
      next = debounce.next() => match next {
        Some(next) => query = next,
        None => return,
      },
      changed = filter_rx.changed() => {
        if changed.is_err() {
          return;
        }
      }
    }

    let filter = *filter_rx.borrow_and_update();
    let key = QueryKey::search(&query, filter);

    // Whatever was running answers a question nobody is asking any more
    if let Some((previous, task)) = in_flight.take() {
      drop(task);
      if previous != key {
        store.cache().cancel(&previous);
      }
    }

    if query.trim().chars().count() < min_length {
      debug!(query = %query, "Search below minimum length, not sending");
      state.send_replace(SearchView {
        query: query.clone(),
        filter,
        ..SearchView::default()
      });
      continue;
    }

    recent.add(&query);
    state.send_modify(|view| {
      view.query = query.clone();
      view.filter = filter;
      view.phase = SearchPhase::Searching;
      view.loading = true;
      view.error = None;
    });

    let store = store.clone();
    let state = Arc::clone(&state);
    let query = query.clone();
    in_flight = Some((key, AbortOnDrop(tokio::spawn(async move {
      let result = store.search(&query, filter).await;
      state.send_if_modified(|view| {
        if view.query != query || view.filter != filter {
          return false;
        }
        view.phase = SearchPhase::Idle;
        view.loading = false;
        match result {
          Ok(page) => {
            view.count = page.count;
            view.tasks = page.tasks;
            view.error = None;
          }
          Err(e) => {
            view.tasks.clear();
            view.count = 0;
            view.error = Some(e);
          }
        }
        true
      });
    }))));
  }
}
