// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0

//! Optional side channel tailing the agent's log socket and republishing its
//! lines into the process log, tagged so they are distinguishable from the
//! proxy's own entries.

use anyhow::{bail, Context as AnyhowContext, Result};
use futures::StreamExt;
use muxproxy::util::validators::parse_unix_addr;
use std::os::unix::fs::PermissionsExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio_stream::wrappers::LinesStream;

const OTHER_PERM_MASK: u32 = 0o007;

/// Dials the agent log socket and spawns the tailing task. The socket must
/// not be readable or writable by "other".
pub async fn tail_agent_logs(sock: &str) -> Result<()> {
  let path = parse_unix_addr(sock).context("invalid agent logs socket address")?;

  let mode = std::fs::metadata(&path)
    .with_context(|| format!("failed to stat agent logs socket {:?}", path))?
    .permissions()
    .mode();
  check_other_permissions(mode)?;

  let conn = UnixStream::connect(&path)
    .await
    .with_context(|| format!("failed to dial agent logs socket {:?}", path))?;

  tokio::task::spawn(async move {
    let mut lines = LinesStream::new(BufReader::new(conn).lines());
    while let Some(line) = lines.next().await {
      match line {
        Ok(line) => tracing::info!(source = "agent", "{}", line),
        Err(error) => {
          tracing::error!(?error, "failed reading agent logs from socket");
          break;
        }
      }
    }
  });

  Ok(())
}

fn check_other_permissions(mode: u32) -> Result<()> {
  let other = mode & OTHER_PERM_MASK;
  if other != 0 {
    bail!(
      "all socket permissions for 'other' should be disabled, got {:03o}",
      other
    );
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::check_other_permissions;

  #[test]
  fn sockets_unreachable_by_other_are_accepted() {
    assert!(check_other_permissions(0o660).is_ok());
    assert!(check_other_permissions(0o600).is_ok());
  }

  #[test]
  fn sockets_reachable_by_other_are_rejected() {
    assert!(check_other_permissions(0o666).is_err());
    assert!(check_other_permissions(0o602).is_err());
    assert!(check_other_permissions(0o601).is_err());
  }

  #[tokio::test]
  async fn missing_flag_value_path_fails_fast() {
    assert!(super::tail_agent_logs("").await.is_err());
    assert!(super::tail_agent_logs("tcp://host/logs").await.is_err());
  }
}
