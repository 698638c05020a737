//! One-time asynchronous initialization shared by concurrent callers.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;

/// Observable initialization state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStatus {
  Uninitialized,
  Initializing,
  Ready,
  Failed,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InitError {
  #[error("initialization failed: {0}")]
  Failed(String),
}

enum Slot<T> {
  Uninitialized,
  Initializing,
  Ready(T),
  Failed(String),
}

/// A value produced once by whichever caller gets there first. Callers that
/// arrive while initialization is in flight wait for its outcome instead of
/// starting their own. A failed attempt is reported to every waiter of that
/// attempt; the next fresh caller retries.
pub struct ResourceInit<T> {
  slot: Mutex<Slot<T>>,
  notify: Notify,
}

impl<T: Clone> ResourceInit<T> {
  pub fn new() -> Self {
    Self {
      slot: Mutex::new(Slot::Uninitialized),
      notify: Notify::new(),
    }
  }

  pub fn status(&self) -> InitStatus {
    match &*self.lock() {
      Slot::Uninitialized => InitStatus::Uninitialized,
      Slot::Initializing => InitStatus::Initializing,
      Slot::Ready(_) => InitStatus::Ready,
      Slot::Failed(_) => InitStatus::Failed,
    }
  }

  pub fn get(&self) -> Option<T> {
    match &*self.lock() {
      Slot::Ready(value) => Some(value.clone()),
      _ => None,
    }
  }

  pub async fn get_or_init<F, Fut, E>(&self, init: F) -> Result<T, InitError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
  {
    let mut waited = false;
    loop {
      let notified = self.notify.notified();
      let claimed = {
        let mut slot = self.lock();
        match &*slot {
          Slot::Ready(value) => return Ok(value.clone()),
          Slot::Failed(message) if waited => return Err(InitError::Failed(message.clone())),
          Slot::Initializing => false,
          Slot::Uninitialized | Slot::Failed(_) => {
            *slot = Slot::Initializing;
            true
          }
        }
      };
      if claimed {
        return self.run_init(init).await;
      }
      notified.await;
      waited = true;
    }
  }

  async fn run_init<F, Fut, E>(&self, init: F) -> Result<T, InitError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
  {
    let mut guard = InitGuard {
      owner: self,
      settled: false,
    };
    let outcome = init().await;
    guard.settled = true;

    let result = {
      let mut slot = self.lock();
      match outcome {
        Ok(value) => {
          *slot = Slot::Ready(value.clone());
          Ok(value)
        }
        Err(err) => {
          let message = err.to_string();
          *slot = Slot::Failed(message.clone());
          Err(InitError::Failed(message))
        }
      }
    };
    self.notify.notify_waiters();
    result
  }

  fn lock(&self) -> MutexGuard<'_, Slot<T>> {
    self.slot.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl<T: Clone> Default for ResourceInit<T> {
  fn default() -> Self {
    Self::new()
  }
}

/// Resets an abandoned initialization so the next caller can take over.
struct InitGuard<'a, T> {
  owner: &'a ResourceInit<T>,
  settled: bool,
}

impl<T> Drop for InitGuard<'_, T> {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    {
      let mut slot = self
        .owner
        .slot
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      *slot = Slot::Uninitialized;
    }
    self.owner.notify.notify_waiters();
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use super::*;

  #[tokio::test]
  async fn concurrent_callers_share_one_initialization() {
    let resource = Arc::new(ResourceInit::<u32>::new());
    let runs = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
      let resource = resource.clone();
      let runs = runs.clone();
      tasks.push(tokio::spawn(async move {
        resource
          .get_or_init(|| async move {
            runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, String>(7)
          })
          .await
      }));
    }

    for task in tasks {
      assert_eq!(task.await.expect("join"), Ok(7));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(resource.status(), InitStatus::Ready);
  }

  #[tokio::test]
  async fn failure_is_reported_then_retried() {
    let resource = ResourceInit::<u32>::new();

    let first = resource
      .get_or_init(|| async { Err::<u32, _>("disk full") })
      .await;
    assert_eq!(first, Err(InitError::Failed("disk full".to_string())));
    assert_eq!(resource.status(), InitStatus::Failed);

    let second = resource.get_or_init(|| async { Ok::<_, String>(3) }).await;
    assert_eq!(second, Ok(3));
    assert_eq!(resource.get(), Some(3));
  }

  #[tokio::test]
  async fn cancelled_initialization_resets_state() {
    let resource = Arc::new(ResourceInit::<u32>::new());

    let pending = {
      let resource = resource.clone();
      tokio::spawn(async move {
        resource
          .get_or_init(|| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, String>(1)
          })
          .await
      })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(resource.status(), InitStatus::Initializing);

    pending.abort();
    let _ = pending.await;
    assert_eq!(resource.status(), InitStatus::Uninitialized);

    let value = resource.get_or_init(|| async { Ok::<_, String>(2) }).await;
    assert_eq!(value, Ok(2));
  }
}
