// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Accept loop bridging local connections onto multiplexed streams.
//!
//! Each connection accepted on the listening socket gets exactly one freshly
//! opened stream from the session; the pair is then forwarded in its own task
//! while the loop keeps accepting. The loop reports a single terminal outcome
//! on a oneshot channel: the first accept or stream-open failure, or success
//! when it was stopped deliberately through its [BridgeListener].

use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::net::UnixListener;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing_futures::Instrument;

use crate::common::session::{MuxSession, SessionError};
use crate::util::forward_streams;
use crate::util::resource::{Closeable, ResourceHandle};

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
  #[error("failed to bind listener at {path:?}")]
  Bind {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to accept a local connection")]
  Accept(#[source] std::io::Error),
  #[error("failed to open a multiplexed stream for an accepted connection")]
  StreamOpen(#[source] SessionError),
}

/// Close-once handle for the listening side of the bridge.
///
/// Closing cancels the accept loop and waits until the loop has actually
/// dropped the socket and removed its filesystem entry, so the listener is
/// guaranteed closed by the time `close` resolves. Cancelling an
/// already-finished loop is a no-op, so this stays safe when it races the
/// loop's own error exit.
pub struct BridgeListener {
  token: CancellationToken,
  released: Option<oneshot::Receiver<()>>,
}

impl Closeable for BridgeListener {
  fn close(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
    self.token.cancel();
    let released = self.released.take();
    async move {
      if let Some(released) = released {
        // A dropped sender also means the loop task is gone and the socket
        // with it.
        let _ = released.await;
      }
      Ok(())
    }
    .boxed()
  }
}

pub struct ServeHandle {
  pub listener: ResourceHandle<BridgeListener>,
  pub result: oneshot::Receiver<Result<(), BridgeError>>,
}

/// Binds `listen_path` and starts the accept loop over `session`.
///
/// Returns as soon as the listener is bound; the loop itself runs in the
/// background and delivers its terminal outcome through the handle.
pub fn serve<S>(session: S, listen_path: &Path) -> Result<ServeHandle, BridgeError>
where
  S: MuxSession,
{
  let listener = UnixListener::bind(listen_path).map_err(|source| BridgeError::Bind {
    path: listen_path.to_path_buf(),
    source,
  })?;
  tracing::debug!(path = ?listen_path, "listener bound");

  let token = CancellationToken::new();
  let (result_tx, result_rx) = oneshot::channel();
  let (released_tx, released_rx) = oneshot::channel();
  let loop_token = token.clone();
  let listen_path = listen_path.to_path_buf();
  tokio::task::spawn(
    async move {
      let outcome = accept_loop(&session, &listener, &loop_token).await;
      // The loop exit is the only place the socket is closed, whichever of
      // the error path or a deliberate cancellation got it there first. The
      // release is signalled only once the socket is truly gone.
      drop(listener);
      let _ = std::fs::remove_file(&listen_path);
      let _ = released_tx.send(());
      if result_tx.send(outcome).is_err() {
        tracing::debug!("bridge outcome discarded, receiver dropped");
      }
    }
    .instrument(tracing::debug_span!("accept_loop")),
  );

  Ok(ServeHandle {
    listener: ResourceHandle::new(BridgeListener {
      token,
      released: Some(released_rx),
    }),
    result: result_rx,
  })
}

async fn accept_loop<S>(
  session: &S,
  listener: &UnixListener,
  shutdown: &CancellationToken,
) -> Result<(), BridgeError>
where
  S: MuxSession,
{
  loop {
    // A deliberate close is a clean stop, not an accept fault.
    let conn = tokio::select! {
      _ = shutdown.cancelled() => return Ok(()),
      accepted = listener.accept() => accepted.map_err(BridgeError::Accept)?.0,
    };
    let stream = tokio::select! {
      _ = shutdown.cancelled() => return Ok(()),
      opened = session.open_stream() => opened.map_err(BridgeError::StreamOpen)?,
    };
    // Pairings are unbounded and detached; a copy failure tears down its own
    // pair without touching the loop.
    tokio::task::spawn(
      async move {
        if let Err(error) = forward_streams(conn, stream).await {
          tracing::debug!(?error, "connection pair closed with error");
        }
      }
      .instrument(tracing::trace_span!("connection_pair")),
    );
  }
}
