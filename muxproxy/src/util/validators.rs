// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Parses a unix socket URI into the filesystem path to connect or bind to.
///
/// The scheme must be absent or explicitly `unix`; the effective address is
/// the host and path components joined, so `unix:///run/proxy.sock` and
/// `/run/proxy.sock` are equivalent.
pub fn parse_unix_addr(uri: &str) -> Result<PathBuf> {
  if uri.is_empty() {
    bail!("empty socket uri");
  }
  let addr = match uri.split_once("://") {
    Some(("unix", rest)) => rest,
    Some((scheme, _)) => bail!("invalid socket scheme {:?}, expected \"unix\"", scheme),
    None => uri,
  };
  if addr.is_empty() {
    bail!("socket uri {:?} names no path", uri);
  }
  Ok(PathBuf::from(addr))
}

pub fn validate_unix_addr(v: &str) -> Result<(), String> {
  parse_unix_addr(v).map(|_| ()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
  use std::path::PathBuf;

  use super::parse_unix_addr;

  #[test]
  fn empty_uri_is_rejected() {
    assert!(parse_unix_addr("").is_err());
  }

  #[test]
  fn unix_scheme_yields_the_path() {
    assert_eq!(
      parse_unix_addr("unix:///tmp/s.sock").unwrap(),
      PathBuf::from("/tmp/s.sock")
    );
  }

  #[test]
  fn host_and_path_are_joined() {
    assert_eq!(
      parse_unix_addr("unix://host/path").unwrap(),
      PathBuf::from("host/path")
    );
  }

  #[test]
  fn scheme_less_uri_passes_through() {
    assert_eq!(
      parse_unix_addr("/run/proxy.sock").unwrap(),
      PathBuf::from("/run/proxy.sock")
    );
  }

  #[test]
  fn foreign_schemes_are_rejected() {
    assert!(parse_unix_addr("tcp://host/path").is_err());
    assert!(parse_unix_addr("vsock://3:1024").is_err());
  }

  #[test]
  fn scheme_without_a_path_is_rejected() {
    assert!(parse_unix_addr("unix://").is_err());
  }
}
