//! Trailing-edge debounce for rapidly changing values.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Delay applied to search input.
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Emits a value only once the input has stopped changing for `delay`.
///
/// Every [`set`](Self::set) restarts the timer, so a burst of updates yields
/// exactly one emission: the last value of the burst.
pub struct Debounce<T> {
  input: mpsc::UnboundedSender<T>,
  output: mpsc::UnboundedReceiver<T>,
  task: JoinHandle<()>,
}

impl<T: Send + 'static> Debounce<T> {
  pub fn new(delay: Duration) -> Self {
    let (input, mut input_rx) = mpsc::unbounded_channel::<T>();
    let (output_tx, output) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
      while let Some(mut latest) = input_rx.recv().await {
        loop {
          tokio::select! {
            next = input_rx.recv() => match next {
              Some(value) => latest = value,
              None => return,
            },
            _ = tokio::time::sleep(delay) => {
              if output_tx.send(latest).is_err() {
                return;
              }
              break;
            }
          }
        }
      }
    });

    Self {
      input,
      output,
      task,
    }
  }

  pub fn set(&self, value: T) {
    // The task only stops when self is dropped
    let _ = self.input.send(value);
  }

  /// A clonable handle for feeding values from elsewhere.
  pub fn input(&self) -> DebounceInput<T> {
    DebounceInput(self.input.clone())
  }

  /// Next settled value.
  pub async fn next(&mut self) -> Option<T> {
    self.output.recv().await
  }
}

/// Sending half of a [`Debounce`].
pub struct DebounceInput<T>(mpsc::UnboundedSender<T>);

impl<T> Clone for DebounceInput<T> {
  fn clone(&self) -> Self {
    Self(self.0.clone())
  }
}

impl<T> DebounceInput<T> {
  pub fn set(&self, value: T) {
    let _ = self.0.send(value);
  }
}

impl<T> Drop for Debounce<T> {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::time::{advance, timeout, Instant};

  #[tokio::test(start_paused = true)]
  async fn test_burst_emits_only_last_value() {
    let mut debounce = Debounce::new(SEARCH_DEBOUNCE);

    debounce.set("a");
    advance(Duration::from_millis(50)).await;
    debounce.set("ab");
    advance(Duration::from_millis(50)).await;
    debounce.set("abc");
    let last_input = Instant::now();

    assert_eq!(debounce.next().await, Some("abc"));
    assert!(Instant::now() - last_input >= SEARCH_DEBOUNCE);

    let nothing_more = timeout(Duration::from_secs(5), debounce.next()).await;
    assert!(nothing_more.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_separate_bursts_emit_separately() {
    let mut debounce = Debounce::new(Duration::from_millis(100));

    debounce.set(1);
    assert_eq!(debounce.next().await, Some(1));
    debounce.set(2);
    debounce.set(3);
    assert_eq!(debounce.next().await, Some(3));
  }

  #[tokio::test(start_paused = true)]
  async fn test_input_handle_feeds_same_timer() {
    let mut debounce = Debounce::new(Duration::from_millis(100));
    let input = debounce.input();

    debounce.set("x");
    input.set("y");
    assert_eq!(debounce.next().await, Some("y"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_nothing_emitted_before_delay() {
    let mut debounce = Debounce::new(SEARCH_DEBOUNCE);
    debounce.set("abc");

    let early = timeout(Duration::from_millis(499), debounce.next()).await;
    assert!(early.is_err());
    assert_eq!(debounce.next().await, Some("abc"));
  }
}
