// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

/// A resource with an explicit asynchronous close operation, such as a
/// listening socket or a transport connection.
pub trait Closeable: Send {
  fn close(&mut self) -> BoxFuture<'_, io::Result<()>>;
}

/// Shared handle to a closeable resource, replacing a raw shared nullable
/// reference with an explicit open/closed state behind an exclusive guard.
///
/// The resource is taken out of the slot before its close runs, so concurrent
/// callers can never close the same resource twice - the first close wins and
/// every later attempt observes an empty slot.
pub struct ResourceHandle<T> {
  slot: Arc<Mutex<Option<T>>>,
}

impl<T> Clone for ResourceHandle<T> {
  fn clone(&self) -> Self {
    ResourceHandle {
      slot: self.slot.clone(),
    }
  }
}

impl<T> ResourceHandle<T>
where
  T: Closeable,
{
  pub fn new(resource: T) -> Self {
    ResourceHandle {
      slot: Arc::new(Mutex::new(Some(resource))),
    }
  }

  /// Closes the held resource if this handle still holds one.
  ///
  /// Returns `Ok(true)` when a close was performed, `Ok(false)` when the
  /// resource was already closed by an earlier caller.
  pub async fn close_once(&self) -> io::Result<bool> {
    let mut slot = self.slot.lock().await;
    match slot.take() {
      Some(mut resource) => resource.close().await.map(|()| true),
      None => Ok(false),
    }
  }

  pub async fn is_closed(&self) -> bool {
    self.slot.lock().await.is_none()
  }
}

#[cfg(test)]
mod tests {
  use std::io;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use futures::future::BoxFuture;
  use futures::FutureExt;

  use super::{Closeable, ResourceHandle};

  struct FakeResource {
    closes: Arc<AtomicUsize>,
    fail: bool,
  }

  impl Closeable for FakeResource {
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
      self.closes.fetch_add(1, Ordering::SeqCst);
      let result = if self.fail {
        Err(io::Error::new(io::ErrorKind::Other, "close failed"))
      } else {
        Ok(())
      };
      futures::future::ready(result).boxed()
    }
  }

  #[tokio::test]
  async fn close_once_closes_exactly_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let handle = ResourceHandle::new(FakeResource {
      closes: closes.clone(),
      fail: false,
    });
    assert!(handle.close_once().await.unwrap());
    assert!(!handle.close_once().await.unwrap());
    assert!(handle.is_closed().await);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn close_once_races_resolve_to_a_single_close() {
    let closes = Arc::new(AtomicUsize::new(0));
    let handle = ResourceHandle::new(FakeResource {
      closes: closes.clone(),
      fail: false,
    });
    let (left, right) = tokio::join!(handle.close_once(), handle.close_once());
    let performed = [left.unwrap(), right.unwrap()];
    assert_eq!(performed.iter().filter(|p| **p).count(), 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn close_errors_propagate_and_leave_the_slot_empty() {
    let closes = Arc::new(AtomicUsize::new(0));
    let handle = ResourceHandle::new(FakeResource {
      closes: closes.clone(),
      fail: true,
    });
    assert!(handle.close_once().await.is_err());
    // The failed resource is not retried.
    assert!(!handle.close_once().await.unwrap());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
  }
}
