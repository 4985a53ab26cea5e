// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Process orchestration: wires the transport dial, the mux session, the
//! accept-loop bridge and the shutdown coordinator together for one proxy run.

use anyhow::{Context as AnyhowContext, Result};
use std::path::PathBuf;
use tokio::net::UnixStream;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tokio_yamux::config::Config;

use crate::common::{bridge, session, shutdown};
use crate::util::resource::ResourceHandle;

pub const PROXY_NAME: &str = "muxproxy";

/// Configuration for one proxy run: the transport channel to multiplex on and
/// the local socket to accept client connections on. Exactly one transport
/// connection and one listening socket exist per run.
#[derive(Eq, PartialEq, Clone, Debug)]
pub struct ProxyDaemon {
  pub mux_addr: PathBuf,
  pub listen_addr: PathBuf,
}

impl ProxyDaemon {
  /// Runs the proxy until a termination signal is handled or a fatal error
  /// surfaces. There is no retry anywhere: dial, session establishment and
  /// listener failures are all immediately fatal.
  #[tracing::instrument(skip(self), fields(mux = ?self.mux_addr, listen = ?self.listen_addr), err)]
  pub async fn run(self) -> Result<()> {
    let mut signals = spawn_signal_notifier()?;

    let transport = UnixStream::connect(&self.mux_addr)
      .await
      .with_context(|| format!("failed to dial mux channel {:?}", self.mux_addr))?;
    tracing::debug!("transport connected");

    let session = session::establish(transport, Config::default())
      .context("failed to establish multiplexing session")?;
    let transport_handle = ResourceHandle::new(session.transport());

    let handle = bridge::serve(session, &self.listen_addr)
      .with_context(|| format!("failed to serve at {:?}", self.listen_addr))?;
    let listener_handle = handle.listener;
    let mut result = handle.result;

    let shutdown =
      shutdown::await_and_shutdown(&mut signals, &listener_handle, &transport_handle);
    futures::pin_mut!(shutdown);

    tokio::select! {
      res = &mut shutdown => {
        res.context("shutdown failed")?;
        tracing::debug!("shutting down");
      }
      res = &mut result => match res {
        Ok(Ok(())) => {
          // A clean loop stop only happens once shutdown has begun; let the
          // teardown run to completion before exiting.
          shutdown.await.context("shutdown failed")?;
          tracing::debug!("shutting down");
        }
        Ok(Err(error)) => {
          return Err(anyhow::Error::new(error).context("proxy bridge failed"));
        }
        Err(_) => anyhow::bail!("proxy bridge stopped without reporting an outcome"),
      },
    }
    Ok(())
  }
}

/// Installs the SIGTERM watcher and forwards each delivery into a channel the
/// shutdown coordinator consumes. The channel is the coordinator's only
/// input; nothing else observes it.
fn spawn_signal_notifier() -> Result<mpsc::Receiver<SignalKind>> {
  let (tx, rx) = mpsc::channel(8);
  let mut term = tokio::signal::unix::signal(shutdown::term_signal())
    .context("failed to install the termination signal handler")?;
  tokio::task::spawn(async move {
    while term.recv().await.is_some() {
      if tx.send(shutdown::term_signal()).await.is_err() {
        break;
      }
    }
  });
  Ok(rx)
}
