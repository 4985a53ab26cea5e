// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license OR Apache 2.0
#![warn(unused_imports)]

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use muxproxy::common::daemon::{ProxyDaemon, PROXY_NAME};
use muxproxy::util::validators::{parse_unix_addr, validate_unix_addr};
use tracing_futures::Instrument;

mod agent_logs;

fn main() {
  let app = Command::new(env!("CARGO_BIN_NAME"))
    .version(env!("CARGO_PKG_VERSION"))
    .about(env!("CARGO_PKG_DESCRIPTION"))
    .arg(
      Arg::new("mux-socket")
        .long("mux-socket")
        .short('m')
        .help("unix socket uri of the channel to multiplex on")
        .validator(validate_unix_addr)
        .takes_value(true)
        .required(true),
    )
    .arg(
      Arg::new("listen-socket")
        .long("listen-socket")
        .short('l')
        .help("unix socket uri to accept local client connections on")
        .validator(validate_unix_addr)
        .takes_value(true)
        .required(true),
    )
    .arg(
      Arg::new("agent-logs-socket")
        .long("agent-logs-socket")
        .help("optional unix socket uri to tail for agent log lines")
        .validator(validate_unix_addr)
        .takes_value(true)
        .required(false),
    )
    .arg(
      Arg::new("log")
        .long("log")
        .help("log messages above the specified level: trace, debug, info, warn or error")
        .default_value("warn")
        .takes_value(true),
    );
  let matches = app.get_matches();

  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
    tracing_subscriber::EnvFilter::new(matches.value_of("log").unwrap_or("warn"))
  });
  let collector = tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .finish();
  tracing::subscriber::set_global_default(collector).expect("Logger init must succeed");

  let rt = tokio::runtime::Builder::new_multi_thread()
    .thread_name("tokio-reactor-worker")
    .enable_all()
    .build()
    .expect("Tokio Runtime setup failure");

  let span = tracing::info_span!(
    "proxy",
    name = PROXY_NAME,
    pid = std::process::id(),
    source = "proxy"
  );
  match rt.block_on(main_args_handler(&matches).instrument(span)) {
    Err(err) => {
      tracing::error!(err = ?err, "proxy terminated with failure");
      std::process::exit(1);
    }
    Ok(_) => tracing::info!("proxy exited successfully"),
  }
}

async fn main_args_handler(matches: &'_ ArgMatches) -> Result<()> {
  let mux_addr = parse_unix_addr(
    matches
      .value_of("mux-socket")
      .expect("Argument is marked as required"),
  )?;
  let listen_addr = parse_unix_addr(
    matches
      .value_of("listen-socket")
      .expect("Argument is marked as required"),
  )?;

  if let Some(sock) = matches.value_of("agent-logs-socket") {
    agent_logs::tail_agent_logs(sock).await?;
  }

  tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting");
  ProxyDaemon {
    mux_addr,
    listen_addr,
  }
  .run()
  .await
}
