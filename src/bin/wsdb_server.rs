// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Record database server.
//
// Usage: wsdb_server   (settings come from WSDB_* environment variables)
//
// Ctrl-C asks for confirmation and is refused while clients are connected.
// SIGTERM waits for connected clients to leave, then exits.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use std::thread;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wsdb::{ServerConfig, ShutdownKind, Supervisor};

fn confirm_shutdown() -> bool {
    print!("Shut down the server? (y/n) ");
    io::stdout().flush().ok();
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}

fn run() -> wsdb::Result<()> {
    let config = ServerConfig::from_env()?;
    let supervisor = Supervisor::bind(&config)?;
    println!("Server listening on {}", supervisor.local_addr());

    let shutdown = supervisor.shutdown_handle();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("wsdb-signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let kind = if sig == SIGTERM {
                    ShutdownKind::Terminate
                } else {
                    ShutdownKind::Interrupt
                };
                info!(signal = sig, ?kind, "shutdown requested");
                if !shutdown.request(kind) {
                    break;
                }
            }
        })?;

    supervisor.run(confirm_shutdown)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            eprintln!("wsdb_server: {e}");
            ExitCode::FAILURE
        }
    }
}
