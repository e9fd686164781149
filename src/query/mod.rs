//! Async query cache for API data.
//!
//! Inspired by TanStack Query: every request is identified by a [`QueryKey`]
//! and its result is kept in a [`QueryCache`] together with loading and
//! error state. Fresh results are served without touching the network,
//! concurrent requests for the same key are merged, and invalidation marks
//! entries stale and refetches the ones somebody is watching.
//!
//! # Example
//!
//! ```ignore
//! let cache: QueryCache<TaskPage> = QueryCache::new();
//! let key = QueryKey::tasks(None);
//! let api = api.clone();
//! let page = cache
//!   .fetch(&key, move || {
//!     let api = api.clone();
//!     async move { api.list_tasks(None).await }
//!   })
//!   .await?;
//!
//! // Later, after a write
//! cache.invalidate(&KeyPrefix::all_tasks()).wait().await;
//! ```

mod cache;
mod key;
mod retry;
mod state;

pub use cache::{
  CacheOptions, QueryCache, Revalidation, Subscription, DEFAULT_GC_TIME, DEFAULT_STALE_TIME,
};
pub use key::{KeyPrefix, QueryKey};
pub use retry::{RetryPolicy, MUTATION_RETRIES, QUERY_RETRIES};
pub use state::{QuerySnapshot, QueryStatus};
