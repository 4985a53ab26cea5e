// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Signal-driven teardown of the listening socket and transport connection.
//!
//! One-shot by design: the coordinator waits for the termination signal once,
//! closes the listener so no new work is accepted, then closes the transport.
//! Both references are close-once handles, so whichever of the shutdown path
//! or the accept loop's own error exit reaches a resource first wins and the
//! loser's attempt is a no-op.

use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;

use crate::util::resource::{Closeable, ResourceHandle};

/// The only signal that triggers a graceful teardown.
pub fn term_signal() -> SignalKind {
  SignalKind::terminate()
}

#[derive(thiserror::Error, Debug)]
pub enum ShutdownError {
  #[error("signal source closed before a termination signal was received")]
  SignalSourceClosed,
  #[error("expected termination signal {expected}, got signal {received}")]
  UnexpectedSignal { expected: i32, received: i32 },
  #[error("failed to close {resource} during shutdown")]
  CloseFailed {
    resource: &'static str,
    #[source]
    source: std::io::Error,
  },
}

/// Blocks until the termination signal arrives, then closes the listener and
/// the transport, strictly in that order.
///
/// Fail-fast: if the listener close fails, the transport close is not
/// attempted and the error is surfaced. A signal other than the expected
/// termination signal is an error naming what was received.
pub async fn await_and_shutdown<L, T>(
  signals: &mut mpsc::Receiver<SignalKind>,
  listener: &ResourceHandle<L>,
  transport: &ResourceHandle<T>,
) -> Result<(), ShutdownError>
where
  L: Closeable,
  T: Closeable,
{
  let signal = signals
    .recv()
    .await
    .ok_or(ShutdownError::SignalSourceClosed)?;
  if signal != term_signal() {
    return Err(ShutdownError::UnexpectedSignal {
      expected: term_signal().as_raw_value(),
      received: signal.as_raw_value(),
    });
  }
  tracing::debug!("termination signal received");

  // Stop accepting new work on the session before the connection under it
  // goes down.
  listener
    .close_once()
    .await
    .map_err(|source| ShutdownError::CloseFailed {
      resource: "listener",
      source,
    })?;
  transport
    .close_once()
    .await
    .map_err(|source| ShutdownError::CloseFailed {
      resource: "transport",
      source,
    })?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::io;
  use std::sync::{Arc, Mutex};

  use futures::future::BoxFuture;
  use futures::FutureExt;
  use tokio::signal::unix::SignalKind;
  use tokio::sync::mpsc;

  use super::{await_and_shutdown, term_signal, ShutdownError};
  use crate::util::resource::{Closeable, ResourceHandle};

  /// Records the order in which resources close on a shared log.
  struct RecordingResource {
    label: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
    fail: bool,
  }

  impl Closeable for RecordingResource {
    fn close(&mut self) -> BoxFuture<'_, io::Result<()>> {
      self.log.lock().unwrap().push(self.label);
      let result = if self.fail {
        Err(io::Error::new(io::ErrorKind::Other, "close failed"))
      } else {
        Ok(())
      };
      futures::future::ready(result).boxed()
    }
  }

  fn recording_pair(
    fail_listener: bool,
  ) -> (
    ResourceHandle<RecordingResource>,
    ResourceHandle<RecordingResource>,
    Arc<Mutex<Vec<&'static str>>>,
  ) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let listener = ResourceHandle::new(RecordingResource {
      label: "listener",
      log: log.clone(),
      fail: fail_listener,
    });
    let transport = ResourceHandle::new(RecordingResource {
      label: "transport",
      log: log.clone(),
      fail: false,
    });
    (listener, transport, log)
  }

  #[tokio::test]
  async fn termination_signal_closes_listener_before_transport() {
    let (listener, transport, log) = recording_pair(false);
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(term_signal()).await.unwrap();

    await_and_shutdown(&mut rx, &listener, &transport)
      .await
      .unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["listener", "transport"]);
    assert!(listener.is_closed().await);
    assert!(transport.is_closed().await);
  }

  #[tokio::test]
  async fn unexpected_signal_is_an_error_naming_the_signal() {
    let (listener, transport, log) = recording_pair(false);
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(SignalKind::interrupt()).await.unwrap();

    let err = await_and_shutdown(&mut rx, &listener, &transport)
      .await
      .unwrap_err();
    match err {
      ShutdownError::UnexpectedSignal { expected, received } => {
        assert_eq!(expected, term_signal().as_raw_value());
        assert_eq!(received, SignalKind::interrupt().as_raw_value());
      }
      other => panic!("expected UnexpectedSignal, got {:?}", other),
    }
    // Nothing was closed.
    assert!(log.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn closed_signal_source_is_an_error() {
    let (listener, transport, _log) = recording_pair(false);
    let (tx, mut rx) = mpsc::channel::<SignalKind>(1);
    drop(tx);

    let err = await_and_shutdown(&mut rx, &listener, &transport)
      .await
      .unwrap_err();
    assert!(matches!(err, ShutdownError::SignalSourceClosed));
  }

  #[tokio::test]
  async fn listener_close_failure_skips_the_transport_close() {
    let (listener, transport, log) = recording_pair(true);
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(term_signal()).await.unwrap();

    let err = await_and_shutdown(&mut rx, &listener, &transport)
      .await
      .unwrap_err();
    assert!(matches!(
      err,
      ShutdownError::CloseFailed {
        resource: "listener",
        ..
      }
    ));
    assert_eq!(*log.lock().unwrap(), vec!["listener"]);
    assert!(!transport.is_closed().await);
  }

  #[tokio::test]
  async fn already_closed_references_make_shutdown_a_no_op() {
    let (listener, transport, log) = recording_pair(false);
    listener.close_once().await.unwrap();
    transport.close_once().await.unwrap();
    log.lock().unwrap().clear();

    let (tx, mut rx) = mpsc::channel(1);
    tx.send(term_signal()).await.unwrap();
    await_and_shutdown(&mut rx, &listener, &transport)
      .await
      .unwrap();
    assert!(log.lock().unwrap().is_empty());
  }
}
