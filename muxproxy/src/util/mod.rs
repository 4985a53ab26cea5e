// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use tokio::io::{AsyncRead, AsyncWrite};

pub mod resource;
pub mod validators;

const FORWARD_BUFFER_CAPACITY: usize = 1024 * 32;

/// Copies bytes between two open streams in both directions until each
/// direction reaches end-of-stream or either side fails.
///
/// Both endpoints are owned by this future, so regardless of which direction
/// terminates first - or whether both race to do so - both streams are closed
/// exactly once when it resolves. No timeout is applied; termination is driven
/// entirely by stream closure.
#[tracing::instrument(level = "trace", err, skip(a, b))]
pub async fn forward_streams<A, B>(mut a: A, mut b: B) -> Result<(u64, u64), std::io::Error>
where
  A: AsyncRead + AsyncWrite + Unpin,
  B: AsyncRead + AsyncWrite + Unpin,
{
  let mut a =
    tokio::io::BufStream::with_capacity(FORWARD_BUFFER_CAPACITY, FORWARD_BUFFER_CAPACITY, &mut a);
  let mut b =
    tokio::io::BufStream::with_capacity(FORWARD_BUFFER_CAPACITY, FORWARD_BUFFER_CAPACITY, &mut b);
  match tokio::io::copy_bidirectional(&mut a, &mut b).await {
    Ok((a_to_b, b_to_a)) => {
      tracing::trace!(a_to_b, b_to_a, "stream pair drained");
      Ok((a_to_b, b_to_a))
    }
    Err(e) => {
      tracing::debug!(error = ?e, "stream pair closed with error");
      Err(e)
    }
  }
  // `a` and `b` drop here, closing the still-copying side as well when one
  // direction failed partway.
}
