//! Keyed query cache with staleness, in-flight deduplication, invalidation
//! and background revalidation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::{join_all, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::key::{KeyPrefix, QueryKey};
use super::retry::RetryPolicy;
use super::state::{QuerySnapshot, QueryStatus};
use crate::error::ApiError;

pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(30);

/// How long an unobserved, idle entry is kept before it is dropped.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
  pub stale_time: Duration,
  pub gc_time: Duration,
  pub retry: RetryPolicy,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      stale_time: DEFAULT_STALE_TIME,
      gc_time: DEFAULT_GC_TIME,
      retry: RetryPolicy::queries(),
    }
  }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A factory that creates futures for fetching an entry's data.
type Loader<V> = Arc<dyn Fn() -> BoxFuture<Result<V, ApiError>> + Send + Sync>;

type SharedFetch<V> = Shared<BoxFuture<Result<V, ApiError>>>;

struct InFlight<V> {
  future: SharedFetch<V>,
  /// Unique across the cache, so a removed and recreated entry never
  /// accepts a response meant for its predecessor
  generation: u64,
  /// Set when the key was invalidated while this request was running
  invalidated: bool,
}

struct Entry<V> {
  status: QueryStatus,
  data: Option<V>,
  error: Option<ApiError>,
  fetched_at: Option<Instant>,
  invalidated: bool,
  loader: Option<Loader<V>>,
  in_flight: Option<InFlight<V>>,
  subscribers: usize,
  /// Last read, write or observer change
  touched_at: Instant,
}

impl<V> Default for Entry<V> {
  fn default() -> Self {
    Self {
      status: QueryStatus::Idle,
      data: None,
      error: None,
      fetched_at: None,
      invalidated: false,
      loader: None,
      in_flight: None,
      subscribers: 0,
      touched_at: Instant::now(),
    }
  }
}

impl<V> Entry<V> {
  fn is_stale(&self, stale_time: Duration) -> bool {
    if self.invalidated || self.data.is_none() || self.status == QueryStatus::Error {
      return true;
    }
    match self.fetched_at {
      Some(at) => Instant::now().duration_since(at) >= stale_time,
      None => true,
    }
  }

  fn is_collectable(&self, gc_time: Duration, now: Instant) -> bool {
    self.subscribers == 0
      && self.in_flight.is_none()
      && now.duration_since(self.touched_at) >= gc_time
  }

  /// Status to fall back to once no request is pending.
  fn settled_status(&self) -> QueryStatus {
    if self.error.is_some() {
      QueryStatus::Error
    } else if self.data.is_some() {
      QueryStatus::Success
    } else {
      QueryStatus::Idle
    }
  }
}

struct Inner<V> {
  entries: Mutex<HashMap<QueryKey, Entry<V>>>,
  events: broadcast::Sender<QueryKey>,
  stale_time: Duration,
  gc_time: Duration,
  retry: RetryPolicy,
  next_generation: AtomicU64,
}

/// Process-wide store of query results keyed by [`QueryKey`].
///
/// Cloning is cheap and every clone shares the same entries. The entry map
/// is never locked across an `.await`, so every update is atomic with
/// respect to other tasks.
pub struct QueryCache<V> {
  inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<V: Clone + Send + Sync + 'static> Default for QueryCache<V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V: Clone + Send + Sync + 'static> QueryCache<V> {
  pub fn new() -> Self {
    Self::with_options(CacheOptions::default())
  }

  pub fn with_options(options: CacheOptions) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Inner {
        entries: Mutex::new(HashMap::new()),
        events,
        stale_time: options.stale_time,
        gc_time: options.gc_time,
        retry: options.retry,
        next_generation: AtomicU64::new(0),
      }),
    }
  }

  pub fn stale_time(&self) -> Duration {
    self.inner.stale_time
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry<V>>> {
    // A panic while holding the lock leaves the map itself consistent
    self
      .inner
      .entries
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn notify(&self, key: &QueryKey) {
    // No receivers is fine
    let _ = self.inner.events.send(key.clone());
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  pub fn get(&self, key: &QueryKey) -> QuerySnapshot<V> {
    let entries = self.entries();
    match entries.get(key) {
      Some(entry) => QuerySnapshot {
        status: entry.status,
        data: entry.data.clone(),
        error: entry.error.clone(),
        fetched_at: entry.fetched_at,
        is_stale: entry.is_stale(self.inner.stale_time),
      },
      None => QuerySnapshot::idle(),
    }
  }

  pub fn data(&self, key: &QueryKey) -> Option<V> {
    self.entries().get(key).and_then(|e| e.data.clone())
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    self
      .entries()
      .get(key)
      .map(|e| e.in_flight.is_some())
      .unwrap_or(false)
  }

  // ==========================================================================
  // Fetching
  // ==========================================================================

  /// Return fresh cached data, or load it.
  ///
  /// 1. Entry fresh (inside the stale window, not invalidated) → cached data
  /// 2. Request already in flight for this key → wait for that one
  /// 3. Otherwise run `loader` with the retry policy and store the outcome
  ///
  /// The loader is remembered so the entry can be revalidated in the
  /// background later.
  pub async fn fetch<F, Fut>(&self, key: &QueryKey, loader: F) -> Result<V, ApiError>
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, ApiError>> + Send + 'static,
  {
    let loader: Loader<V> = Arc::new(move || Box::pin(loader()));
    self.fetch_with(key, Some(loader)).await
  }

  /// Re-run the remembered loader if the entry is stale.
  pub async fn refetch(&self, key: &QueryKey) -> Result<V, ApiError> {
    self.fetch_with(key, None).await
  }

  async fn fetch_with(&self, key: &QueryKey, loader: Option<Loader<V>>) -> Result<V, ApiError> {
    let pending = {
      let mut entries = self.entries();
      Self::sweep(&mut entries, self.inner.gc_time);
      let entry = entries.entry(key.clone()).or_default();
      entry.touched_at = Instant::now();
      if let Some(loader) = loader {
        entry.loader = Some(loader);
      }

      if !entry.is_stale(self.inner.stale_time) {
        if let Some(data) = &entry.data {
          debug!(%key, "Query cache hit");
          return Ok(data.clone());
        }
      }

      let existing = entry.in_flight.as_ref().map(|f| f.future.clone());
      match existing {
        Some(future) => {
          debug!(%key, "Joining in-flight request");
          future
        }
        None => {
          let loader = entry
            .loader
            .clone()
            .ok_or_else(|| ApiError::request(None, format!("No loader registered for {}", key)))?;
          let pending = self.start(key, entry, loader);
          drop(entries);
          self.notify(key);
          pending
        }
      }
    };

    pending.await
  }

  /// Spawn the request so dropping a waiter never cancels it for others.
  fn start(&self, key: &QueryKey, entry: &mut Entry<V>, loader: Loader<V>) -> SharedFetch<V> {
    debug!(%key, "Query cache miss, fetching");
    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
    let retry = self.inner.retry;
    let cache = self.clone();
    let task_key = key.clone();

    let handle = tokio::spawn(async move {
      let result = retry.run(|| loader()).await;
      cache.complete(&task_key, generation, &result);
      result
    });

    let future: BoxFuture<Result<V, ApiError>> = Box::pin(async move {
      match handle.await {
        Ok(result) => result,
        Err(e) => Err(ApiError::transient(None, format!("Request task failed: {}", e))),
      }
    });
    let shared = future.shared();

    entry.status = QueryStatus::Loading;
    entry.in_flight = Some(InFlight {
      future: shared.clone(),
      generation,
      invalidated: false,
    });
    shared
  }

  fn complete(&self, key: &QueryKey, generation: u64, result: &Result<V, ApiError>) {
    {
      let mut entries = self.entries();
      let current = entries
        .get_mut(key)
        .filter(|entry| entry.in_flight.as_ref().map(|f| f.generation) == Some(generation));
      let entry = match current {
        Some(entry) => entry,
        None => {
          debug!(%key, "Discarding response for cancelled query");
          return;
        }
      };
      entry.touched_at = Instant::now();

      let invalidated_during = entry
        .in_flight
        .take()
        .map(|f| f.invalidated)
        .unwrap_or(false);

      match result {
        Ok(data) => {
          entry.data = Some(data.clone());
          entry.error = None;
          entry.status = QueryStatus::Success;
          entry.fetched_at = Some(Instant::now());
          entry.invalidated = invalidated_during;
        }
        Err(e) => {
          warn!(%key, error = %e, "Query failed");
          entry.error = Some(e.clone());
          entry.status = QueryStatus::Error;
        }
      }
    }
    self.notify(key);
  }

  /// Drop the result of the request in flight for `key`, if any.
  pub fn cancel(&self, key: &QueryKey) {
    let cancelled = {
      let mut entries = self.entries();
      match entries.get_mut(key) {
        Some(entry) if entry.in_flight.is_some() => {
          Self::discard_in_flight(entry);
          true
        }
        _ => false,
      }
    };
    if cancelled {
      debug!(%key, "Cancelled in-flight query");
      self.notify(key);
    }
  }

  fn discard_in_flight(entry: &mut Entry<V>) {
    entry.in_flight = None;
    entry.status = entry.settled_status();
  }

  // ==========================================================================
  // Writes
  // ==========================================================================

  /// Patch the cached data in place. No-op when the entry has no data.
  pub fn set_data<F>(&self, key: &QueryKey, update: F) -> bool
  where
    F: FnOnce(&mut V),
  {
    let updated = {
      let mut entries = self.entries();
      match entries.get_mut(key).and_then(|e| e.data.as_mut()) {
        Some(data) => {
          update(data);
          true
        }
        None => false,
      }
    };
    if updated {
      self.notify(key);
    }
    updated
  }

  /// Mark matching entries stale and refetch the subscribed ones in the
  /// background.
  pub fn invalidate(&self, prefix: &KeyPrefix) -> Revalidation {
    let mut active = Vec::new();
    {
      let mut entries = self.entries();
      for (key, entry) in entries.iter_mut().filter(|(k, _)| prefix.matches(k)) {
        entry.invalidated = true;
        if let Some(in_flight) = entry.in_flight.as_mut() {
          in_flight.invalidated = true;
        }
        if entry.subscribers > 0 && entry.loader.is_some() {
          active.push(key.clone());
        }
      }
    }
    debug!(?prefix, active = active.len(), "Invalidated queries");
    self.revalidate(active)
  }

  /// Remove matching entries. Results of their pending requests are dropped.
  pub fn remove(&self, prefix: &KeyPrefix) {
    let removed: Vec<QueryKey> = {
      let mut entries = self.entries();
      let keys: Vec<QueryKey> = entries.keys().filter(|k| prefix.matches(k)).cloned().collect();
      for key in &keys {
        entries.remove(key);
      }
      keys
    };
    for key in &removed {
      self.notify(key);
    }
  }

  /// Drop entries nobody has observed or used for the gc window. Also runs
  /// on every fetch.
  pub fn collect_garbage(&self) -> usize {
    let removed = Self::sweep(&mut self.entries(), self.inner.gc_time);
    if removed > 0 {
      debug!(removed, "Collected idle queries");
    }
    removed
  }

  fn sweep(entries: &mut HashMap<QueryKey, Entry<V>>, gc_time: Duration) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_collectable(gc_time, now));
    before - entries.len()
  }

  // ==========================================================================
  // Background refresh
  // ==========================================================================

  /// The user came back to the app.
  pub fn on_focus(&self) -> Revalidation {
    debug!("Focus regained, refreshing stale queries");
    self.refresh_stale_subscribed()
  }

  /// Network connectivity came back.
  pub fn on_reconnect(&self) -> Revalidation {
    debug!("Reconnected, refreshing stale queries");
    self.refresh_stale_subscribed()
  }

  fn refresh_stale_subscribed(&self) -> Revalidation {
    let stale: Vec<QueryKey> = {
      let entries = self.entries();
      entries
        .iter()
        .filter(|(_, e)| {
          e.subscribers > 0 && e.loader.is_some() && e.is_stale(self.inner.stale_time)
        })
        .map(|(k, _)| k.clone())
        .collect()
    };
    self.revalidate(stale)
  }

  fn revalidate(&self, keys: Vec<QueryKey>) -> Revalidation {
    let handles = keys
      .into_iter()
      .map(|key| {
        let cache = self.clone();
        tokio::spawn(async move {
          // A request started before the invalidation may carry old data
          if let Some(pending) = cache.pending(&key) {
            let _ = pending.await;
          }
          if let Err(e) = cache.refetch(&key).await {
            debug!(%key, error = %e, "Background revalidation failed");
          }
        })
      })
      .collect();
    Revalidation { handles }
  }

  fn pending(&self, key: &QueryKey) -> Option<SharedFetch<V>> {
    self
      .entries()
      .get(key)
      .and_then(|e| e.in_flight.as_ref().map(|f| f.future.clone()))
  }

  /// Wait until no request is in flight.
  pub async fn wait_idle(&self) {
    loop {
      let pending: Vec<SharedFetch<V>> = {
        let entries = self.entries();
        entries
          .values()
          .filter_map(|e| e.in_flight.as_ref().map(|f| f.future.clone()))
          .collect()
      };
      if pending.is_empty() {
        return;
      }
      join_all(pending).await;
    }
  }

  // ==========================================================================
  // Subscriptions
  // ==========================================================================

  /// Watch `key` for changes. Counts as an active observer for focus,
  /// reconnect and invalidation refetches while alive.
  pub fn subscribe(&self, key: &QueryKey) -> Subscription<V> {
    let events = self.inner.events.subscribe();
    self.entries().entry(key.clone()).or_default().subscribers += 1;
    Subscription {
      key: key.clone(),
      cache: self.clone(),
      events,
    }
  }

  fn unsubscribe(&self, key: &QueryKey) {
    let discarded = {
      let mut entries = self.entries();
      match entries.get_mut(key) {
        Some(entry) => {
          entry.subscribers = entry.subscribers.saturating_sub(1);
          entry.touched_at = Instant::now();
          if entry.subscribers == 0 && entry.in_flight.is_some() {
            Self::discard_in_flight(entry);
            true
          } else {
            false
          }
        }
        None => false,
      }
    };
    if discarded {
      debug!(%key, "Last observer gone, discarding pending response");
      self.notify(key);
    }
  }
}

/// Handle to the background refetches started by an invalidation or a
/// focus/reconnect trigger. Dropping it leaves them running.
#[must_use = "drop to run in the background, or call wait()"]
pub struct Revalidation {
  handles: Vec<JoinHandle<()>>,
}

impl Revalidation {
  /// Number of entries being refetched.
  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }

  pub fn is_finished(&self) -> bool {
    self.handles.iter().all(|h| h.is_finished())
  }

  pub async fn wait(self) {
    join_all(self.handles).await;
  }
}

/// Change feed for one key. Dropping it unsubscribes.
pub struct Subscription<V: Clone + Send + Sync + 'static> {
  key: QueryKey,
  cache: QueryCache<V>,
  events: broadcast::Receiver<QueryKey>,
}

impl<V: Clone + Send + Sync + 'static> Subscription<V> {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn snapshot(&self) -> QuerySnapshot<V> {
    self.cache.get(&self.key)
  }

  /// Wait for the next change to this key and return the new state.
  pub async fn changed(&mut self) -> QuerySnapshot<V> {
    loop {
      match self.events.recv().await {
        Ok(key) if key == self.key => return self.snapshot(),
        Ok(_) => continue,
        // Missed some events; the current state is what matters
        Err(broadcast::error::RecvError::Lagged(_)) => return self.snapshot(),
        Err(broadcast::error::RecvError::Closed) => {
          std::future::pending::<()>().await;
        }
      }
    }
  }
}

impl<V: Clone + Send + Sync + 'static> Drop for Subscription<V> {
  fn drop(&mut self) {
    self.cache.unsubscribe(&self.key);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn key() -> QueryKey {
    QueryKey::tasks(None)
  }

  /// Loader that counts calls and returns the call number.
  fn counting_loader(
    calls: Arc<AtomicU32>,
    delay: Duration,
  ) -> impl Fn() -> BoxFuture<Result<u32, ApiError>> + Send + Sync + 'static {
    move || {
      let calls = calls.clone();
      Box::pin(async move {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(delay).await;
        Ok(n)
      })
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_is_served_from_cache() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));

    let first = cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await;
    tokio::time::advance(Duration::from_secs(29)).await;
    let second = cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await;

    assert_eq!(first, Ok(1));
    assert_eq!(second, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_is_refetched() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));

    cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();
    tokio::time::advance(DEFAULT_STALE_TIME).await;
    assert!(cache.get(&key()).is_stale);

    let value = cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await;
    assert_eq!(value, Ok(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_fetches_share_one_request() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let slow = Duration::from_millis(100);

    let key = key();
    let (a, b, c) = tokio::join!(
      cache.fetch(&key, counting_loader(calls.clone(), slow)),
      cache.fetch(&key, counting_loader(calls.clone(), slow)),
      cache.fetch(&key, counting_loader(calls.clone(), slow)),
    );

    assert_eq!((a, b, c), (Ok(1), Ok(1), Ok(1)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_loading_keeps_previous_data() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();

    let _ = cache.invalidate(&KeyPrefix::all_tasks());
    let pending = {
      let cache = cache.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), counting_loader(calls, Duration::from_millis(50)))
          .await
      })
    };
    tokio::task::yield_now().await;

    let snapshot = cache.get(&key());
    assert!(snapshot.is_loading());
    assert_eq!(snapshot.data, Some(1));

    assert_eq!(pending.await.unwrap(), Ok(2));
    assert!(cache.get(&key()).is_success());
  }

  #[tokio::test(start_paused = true)]
  async fn test_error_keeps_last_good_data() {
    let cache = QueryCache::<u32>::with_options(CacheOptions {
      retry: RetryPolicy::none(),
      ..CacheOptions::default()
    });
    cache.fetch(&key(), || async { Ok(5) }).await.unwrap();
    let _ = cache.invalidate(&KeyPrefix::all_tasks());

    let result = cache
      .fetch(&key(), || async { Err(ApiError::request(Some(400), "bad filter")) })
      .await;

    assert_eq!(result, Err(ApiError::request(Some(400), "bad filter")));
    let snapshot = cache.get(&key());
    assert!(snapshot.is_error());
    assert_eq!(snapshot.data, Some(5));
    assert_eq!(snapshot.error, Some(ApiError::request(Some(400), "bad filter")));
  }

  #[tokio::test(start_paused = true)]
  async fn test_query_retries_transient_failures() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = cache
      .fetch(&key(), move || {
        let counter = counter.clone();
        async move {
          counter.fetch_add(1, Ordering::SeqCst);
          Err::<u32, _>(ApiError::transient(None, "offline"))
        }
      })
      .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_forces_refetch() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();

    let revalidation = cache.invalidate(&KeyPrefix::all_tasks());
    assert!(revalidation.is_empty());
    assert!(cache.get(&key()).is_stale);

    let value = cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await;
    assert_eq!(value, Ok(2));
    assert!(!cache.get(&key()).is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_only_touches_matching_keys() {
    let cache = QueryCache::<u32>::new();
    let search = QueryKey::search("milk", None);
    cache.fetch(&key(), || async { Ok(1) }).await.unwrap();
    cache.fetch(&search, || async { Ok(2) }).await.unwrap();

    let _ = cache.invalidate(&KeyPrefix::searches());

    assert!(!cache.get(&key()).is_stale);
    assert!(cache.get(&search).is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidate_refetches_subscribed_entries() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let mut subscription = cache.subscribe(&key());
    cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();

    let revalidation = cache.invalidate(&KeyPrefix::all_tasks());
    assert_eq!(revalidation.len(), 1);
    revalidation.wait().await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(subscription.snapshot().data, Some(2));
    assert!(!subscription.snapshot().is_stale);

    // The change feed saw the refetch land
    let snapshot = subscription.changed().await;
    assert!(snapshot.data.is_some());
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidated_while_in_flight_stays_stale() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let pending = {
      let cache = cache.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), counting_loader(calls, Duration::from_millis(50)))
          .await
      })
    };
    tokio::task::yield_now().await;
    assert!(cache.is_fetching(&key()));

    let _ = cache.invalidate(&KeyPrefix::all_tasks());
    assert_eq!(pending.await.unwrap(), Ok(1));

    assert!(cache.get(&key()).is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_data_patches_without_refetch() {
    let cache = QueryCache::<Vec<u32>>::new();
    assert!(!cache.set_data(&key(), |v| v.push(1)));

    cache.fetch(&key(), || async { Ok(vec![1, 2]) }).await.unwrap();
    assert!(cache.set_data(&key(), |v| v.insert(0, 0)));

    assert_eq!(cache.data(&key()), Some(vec![0, 1, 2]));
    assert!(!cache.get(&key()).is_stale);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropping_last_subscriber_discards_pending_result() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let subscription = cache.subscribe(&key());

    let pending = {
      let cache = cache.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), counting_loader(calls, Duration::from_millis(50)))
          .await
      })
    };
    tokio::task::yield_now().await;
    assert!(cache.get(&key()).is_loading());

    drop(subscription);
    let _ = pending.await.unwrap();
    cache.wait_idle().await;

    let snapshot = cache.get(&key());
    assert_eq!(snapshot.status, QueryStatus::Idle);
    assert_eq!(snapshot.data, None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_remove_discards_pending_result() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let pending = {
      let cache = cache.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), counting_loader(calls, Duration::from_millis(50)))
          .await
      })
    };
    tokio::task::yield_now().await;

    cache.remove(&KeyPrefix::all_tasks());
    let _ = pending.await.unwrap();

    assert_eq!(cache.data(&key()), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_response_from_before_remove_never_reaches_new_entry() {
    let cache = QueryCache::<&'static str>::new();
    let old = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("old session")
          })
          .await
      })
    };
    tokio::task::yield_now().await;
    cache.remove(&KeyPrefix::all_tasks());

    let new = {
      let cache = cache.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("new session")
          })
          .await
      })
    };
    tokio::task::yield_now().await;

    // The old request lands first and must not fill or settle the new entry
    assert_eq!(old.await.unwrap(), Ok("old session"));
    assert_eq!(cache.data(&key()), None);
    assert!(cache.is_fetching(&key()));

    assert_eq!(new.await.unwrap(), Ok("new session"));
    let cached = cache.fetch(&key(), || async { Ok("unexpected refetch") }).await;
    assert_eq!(cached, Ok("new session"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_drops_pending_result_but_waiters_still_get_it() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let pending = {
      let cache = cache.clone();
      let calls = calls.clone();
      tokio::spawn(async move {
        cache
          .fetch(&key(), counting_loader(calls, Duration::from_millis(50)))
          .await
      })
    };
    tokio::task::yield_now().await;

    cache.cancel(&key());
    assert!(!cache.is_fetching(&key()));
    assert_eq!(pending.await.unwrap(), Ok(1));

    assert_eq!(cache.get(&key()).status, QueryStatus::Idle);
    assert_eq!(cache.data(&key()), None);
  }

  #[tokio::test(start_paused = true)]
  async fn test_idle_entries_are_collected_after_gc_time() {
    let cache = QueryCache::<u32>::with_options(CacheOptions {
      gc_time: Duration::from_secs(60),
      ..CacheOptions::default()
    });
    let watched = QueryKey::search("milk", None);
    let _subscription = cache.subscribe(&watched);
    cache.fetch(&key(), || async { Ok(1) }).await.unwrap();
    cache.fetch(&watched, || async { Ok(2) }).await.unwrap();

    tokio::time::advance(Duration::from_secs(59)).await;
    assert_eq!(cache.collect_garbage(), 0);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.collect_garbage(), 1);
    assert_eq!(cache.data(&key()), None);
    assert_eq!(cache.data(&watched), Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_sweeps_entries_past_gc_time() {
    let cache = QueryCache::<u32>::with_options(CacheOptions {
      gc_time: Duration::from_secs(60),
      ..CacheOptions::default()
    });
    let old = QueryKey::search("milk", None);
    cache.fetch(&old, || async { Ok(1) }).await.unwrap();

    tokio::time::advance(Duration::from_secs(61)).await;
    cache.fetch(&key(), || async { Ok(2) }).await.unwrap();

    assert_eq!(cache.get(&old).status, QueryStatus::Idle);
    assert_eq!(cache.data(&key()), Some(2));
  }

  #[tokio::test(start_paused = true)]
  async fn test_focus_refreshes_only_stale_subscribed_entries() {
    let cache = QueryCache::<u32>::new();
    let calls = Arc::new(AtomicU32::new(0));
    let other = QueryKey::search("milk", None);
    let _subscription = cache.subscribe(&key());

    cache.fetch(&key(), counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();
    cache.fetch(&other, counting_loader(calls.clone(), Duration::ZERO)).await.unwrap();

    // Still fresh: nothing to do
    assert!(cache.on_focus().is_empty());

    tokio::time::advance(DEFAULT_STALE_TIME).await;
    let revalidation = cache.on_focus();
    assert_eq!(revalidation.len(), 1);
    revalidation.wait().await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    tokio::time::advance(DEFAULT_STALE_TIME).await;
    cache.on_reconnect().wait().await;
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(cache.data(&other), Some(2));
  }
}
