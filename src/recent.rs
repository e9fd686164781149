use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::storage::SqliteStorage;

pub const RECENT_SEARCH_LIMIT: usize = 5;

/// Bounded most-recent-first list of search strings, without duplicates.
///
/// Backed by SQLite when a storage handle is given. Persistence failures are
/// logged and otherwise ignored; the in-memory list stays authoritative.
pub struct RecentSearches {
  searches: Mutex<Vec<String>>,
  limit: usize,
  storage: Option<Arc<SqliteStorage>>,
}

impl RecentSearches {
  pub fn in_memory(limit: usize) -> Self {
    Self {
      searches: Mutex::new(Vec::new()),
      limit,
      storage: None,
    }
  }

  /// Load the persisted list. An unreadable table starts empty.
  pub fn load(storage: Arc<SqliteStorage>, limit: usize) -> Self {
    let mut searches = storage.recent_searches().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to load recent searches");
      Vec::new()
    });
    searches.truncate(limit);
    Self {
      searches: Mutex::new(searches),
      limit,
      storage: Some(storage),
    }
  }

  pub fn list(&self) -> Vec<String> {
    self.lock().clone()
  }

  /// Put `query` at the front. Blank queries are ignored; an existing
  /// identical entry moves to the front.
  pub fn add(&self, query: &str) {
    if query.trim().is_empty() {
      return;
    }
    let snapshot = {
      let mut searches = self.lock();
      searches.retain(|s| s != query);
      searches.insert(0, query.to_string());
      searches.truncate(self.limit);
      searches.clone()
    };
    self.persist(&snapshot);
  }

  pub fn clear(&self) {
    self.lock().clear();
    self.persist(&[]);
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
    self.searches.lock().unwrap_or_else(|p| p.into_inner())
  }

  fn persist(&self, searches: &[String]) {
    if let Some(storage) = &self.storage {
      if let Err(e) = storage.replace_recent_searches(searches) {
        warn!(error = %e, "Failed to save recent searches");
      }
    }
  }
}
