use tokio::time::Instant;

use crate::error::ApiError;

/// Lifecycle of a cache entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueryStatus {
  /// Never fetched, or the pending fetch was discarded
  #[default]
  Idle,
  /// A request is in flight. Previous data, if any, is still readable.
  Loading,
  /// Last request succeeded
  Success,
  /// Last request failed. Previous data, if any, is kept.
  Error,
}

/// Point-in-time copy of a cache entry, handed to readers.
#[derive(Debug, Clone)]
pub struct QuerySnapshot<T> {
  pub status: QueryStatus,
  pub data: Option<T>,
  pub error: Option<ApiError>,
  pub fetched_at: Option<Instant>,
  /// Outside the stale window, or invalidated
  pub is_stale: bool,
}

impl<T> QuerySnapshot<T> {
  pub(crate) fn idle() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      is_stale: true,
    }
  }

  pub fn is_loading(&self) -> bool {
    self.status == QueryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == QueryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == QueryStatus::Error
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.error.as_ref()
  }
}
