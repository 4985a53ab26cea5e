// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Client side of the multiplexing session layered over the transport
//! connection.
//!
//! The wire protocol itself is an external collaborator (yamux); this module
//! only exposes the "open a new logical stream" capability the bridge needs,
//! behind the [MuxSession] seam so the accept loop can be exercised against
//! stub sessions.

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_yamux::{config::Config, session::Session, stream::StreamHandle, Control};

use crate::util::resource::Closeable;

/// A multiplexing session capable of opening logical streams over an
/// established transport connection.
pub trait MuxSession: Send + Sync + 'static {
  type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

  fn open_stream(&self) -> BoxFuture<'static, Result<Self::Stream, SessionError>>;
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
  #[error("failed to open a multiplexed stream")]
  StreamOpen(#[source] tokio_yamux::error::Error),
  #[error("multiplexing session is closed")]
  SessionClosed,
}

/// Establishes the client role of a yamux session over `transport`.
///
/// Frame I/O is driven by a background task whose lifetime is bound to the
/// transport connection: when the session is closed or the transport fails,
/// the task exits and the transport drops with it. The proxy contract has no
/// inbound streams, so any the peer opens are discarded.
pub fn establish<T>(transport: T, config: Config) -> Result<YamuxSession, SessionError>
where
  T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
  let mut session = Session::new_client(transport, config);
  let control = session.control();
  tokio::task::spawn(async move {
    loop {
      match session.next().await {
        Some(Ok(inbound)) => {
          tracing::debug!("discarding unexpected inbound stream");
          drop(inbound);
        }
        Some(Err(error)) => {
          tracing::debug!(?error, "mux session terminated");
          break;
        }
        None => break,
      }
    }
  });
  Ok(YamuxSession { control })
}

/// Client-role yamux session; cheap to clone, all clones share the one
/// underlying transport connection.
#[derive(Clone)]
pub struct YamuxSession {
  control: Control,
}

impl YamuxSession {
  /// Handle through which the shutdown path tears down the session and, with
  /// it, the transport connection.
  pub fn transport(&self) -> SessionTransport {
    SessionTransport {
      control: self.control.clone(),
    }
  }
}

impl MuxSession for YamuxSession {
  type Stream = StreamHandle;

  fn open_stream(&self) -> BoxFuture<'static, Result<Self::Stream, SessionError>> {
    let mut control = self.control.clone();
    async move {
      control
        .open_stream()
        .await
        .map_err(SessionError::StreamOpen)
    }
    .boxed()
  }
}

/// Closes the whole session: sends a GoAway to the peer and stops the session
/// driver, which releases the transport connection.
pub struct SessionTransport {
  control: Control,
}

impl Closeable for SessionTransport {
  fn close(&mut self) -> BoxFuture<'_, std::io::Result<()>> {
    async move {
      self.control.close().await;
      Ok(())
    }
    .boxed()
  }
}
