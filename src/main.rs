//! muxd: a multi-client command server over Unix domain sockets
//!
//! A single thread serves every client. With nobody connected the server
//! parks in a blocking accept; once sessions exist it multiplexes them
//! with readiness polling. Clients get a greeting on connect and a prompt
//! after every command; `quit` ends a session.
//!
//! Features:
//! - NUL-terminated command framing with a configurable size limit
//! - Insertion-ordered session registry with never-reused session ids
//! - Orderly teardown on SIGINT/SIGTERM, including socket file removal
//! - Configuration via CLI arguments or TOML file

use muxd::config::Config;
use muxd::shutdown;
use muxd::Server;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        socket = %config.socket.display(),
        backlog = config.backlog,
        frame_size = config.frame_size,
        poll_timeout_ms = config.poll_timeout_ms,
        idle_wait_ms = config.idle_wait_ms,
        "Starting muxd server"
    );

    let server = match Server::bind(&config) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    if let Err(e) = shutdown::install(server.shutdown_handle()) {
        error!("Failed to install signal handlers: {}", e);
        process::exit(1);
    }

    // run() reports its own failures and always tears down.
    if server.run().is_err() {
        process::exit(1);
    }
}
