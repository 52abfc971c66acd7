//! A semaphore-bounded task pool.

use std::{future::Future, sync::Arc};

use futures::future::join_all;
use tokio::sync::Semaphore;

/// Default number of tasks a [`Limiter`] runs at once.
pub const DEFAULT_WIDTH: usize = 20;

/// Runs futures with at most `width` of them in flight.
///
/// Permits are handed out in FIFO order, so a queued task is never starved
/// by later submissions. Clones share the same permits.
#[derive(Debug, Clone)]
pub struct Limiter {
  permits: Arc<Semaphore>,
  width:   usize,
}

impl Limiter {
  /// A limiter of `width` permits; a zero width is raised to one.
  pub fn new(width: usize) -> Self {
    let width = width.max(1);
    Self { permits: Arc::new(Semaphore::new(width)), width }
  }

  pub fn width(&self) -> usize { self.width }

  /// Wait for a permit, then drive `fut` to completion while holding it.
  pub async fn run<F: Future>(&self, fut: F) -> F::Output {
    // The semaphore is never closed, so the permit is always granted.
    let _permit = self.permits.acquire().await;
    fut.await
  }

  /// Run `f` over every item under this limiter, returning the outputs in
  /// input order.
  pub async fn map<I, F, Fut>(&self, items: I, mut f: F) -> Vec<Fut::Output>
  where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future,
  {
    join_all(items.into_iter().map(|item| self.run(f(item)))).await
  }
}

impl Default for Limiter {
  fn default() -> Self { Self::new(DEFAULT_WIDTH) }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  use super::*;

  #[tokio::test]
  async fn never_exceeds_width() {
    let limiter = Limiter::new(3);
    let in_flight = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);

    let out = limiter
      .map(0..20, |i| {
        let in_flight = &in_flight;
        let peak = &peak;
        async move {
          let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(2)).await;
          in_flight.fetch_sub(1, Ordering::SeqCst);
          i * 2
        }
      })
      .await;

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(out, (0..20).map(|i| i * 2).collect::<Vec<_>>());
  }

  #[tokio::test]
  async fn zero_width_still_makes_progress() {
    let limiter = Limiter::new(0);
    assert_eq!(limiter.width(), 1);
    let out = limiter.map(["a", "b"], |s| async move { s.len() }).await;
    assert_eq!(out, vec![1, 1]);
  }
}
