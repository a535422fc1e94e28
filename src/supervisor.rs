// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Server lifecycle: accept connections, run one handler thread per
// connection, reap finished handlers and decide when shutdown may proceed.
//
// Every lifecycle input (accepted connection, finished handler, shutdown
// request) arrives as an event on one channel, and only the thread inside
// `Supervisor::run` acts on them.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::lock_set::{LockSet, LOCKS_PER_SET};
use crate::proto::handler::{ConnectionHandler, ServerState};
use crate::shm_name::lock_set_name;

/// How a shutdown was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownKind {
    /// Operator interrupt: refused while connections are live, and needs
    /// confirmation when idle.
    Interrupt,
    /// Stop accepting, let live connections finish, then exit.
    Terminate,
}

enum Event {
    Accepted {
        stream: TcpStream,
        peer: SocketAddr,
    },
    Finished {
        id: u64,
        pid: i32,
        outcome: Result<()>,
    },
    Shutdown(ShutdownKind),
}

/// Sends shutdown requests to a running [`Supervisor`] from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Sender<Event>,
}

impl ShutdownHandle {
    /// Returns `false` once the supervisor has stopped.
    pub fn request(&self, kind: ShutdownKind) -> bool {
        self.tx.send(Event::Shutdown(kind)).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: Arc<ServerState>,
    tx: Sender<Event>,
    rx: Receiver<Event>,
}

impl Supervisor {
    /// Open the server's lock set, data file and log, then bind.
    pub fn bind(config: &ServerConfig) -> Result<Self> {
        let locks = Arc::new(LockSet::open(
            &lock_set_name(&config.lock_key()),
            LOCKS_PER_SET,
        )?);
        let state = ServerState::open(&config.data_path, &config.log_path, locks)?;
        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))?;
        Self::from_parts(listener, Arc::new(state))
    }

    /// Supervise an already bound listener over already opened state.
    pub fn from_parts(listener: TcpListener, state: Arc<ServerState>) -> Result<Self> {
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            listener,
            local_addr,
            state,
            tx,
            rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.tx.clone(),
        }
    }

    /// Serve until shut down. `confirm` is asked before an idle interrupt
    /// proceeds.
    ///
    /// Returns the error of a client that broke the protocol; that stops
    /// the whole server without waiting for other connections.
    pub fn run(self, mut confirm: impl FnMut() -> bool) -> Result<()> {
        let Supervisor {
            listener,
            local_addr,
            state,
            tx,
            rx,
        } = self;
        info!(addr = %local_addr, data = %state.store.path().display(), "server listening");

        let stop = Arc::new(AtomicBool::new(false));
        let acceptor = {
            let stop = Arc::clone(&stop);
            let tx = tx.clone();
            thread::Builder::new()
                .name("wsdb-accept".to_string())
                .spawn(move || accept_loop(listener, stop, tx))?
        };

        let mut workers: HashMap<u64, JoinHandle<()>> = HashMap::new();
        let mut next_id = 0u64;
        let mut draining = false;
        let mut fatal = None;

        while let Ok(event) = rx.recv() {
            match event {
                Event::Accepted { stream, peer } => {
                    if draining {
                        continue;
                    }
                    next_id += 1;
                    match spawn_handler(next_id, stream, peer, &state, &tx) {
                        Ok(h) => {
                            workers.insert(next_id, h);
                            info!(peer = %peer, live = workers.len(), "accepted connection");
                        }
                        Err(e) => warn!(peer = %peer, error = %e, "could not start handler"),
                    }
                }
                Event::Finished { id, pid, outcome } => {
                    if let Some(h) = workers.remove(&id) {
                        if h.join().is_err() {
                            warn!(id, "handler thread panicked");
                        }
                    }
                    let live = workers.len();
                    match outcome {
                        Ok(()) => info!(pid, live, "client disconnected"),
                        Err(e @ Error::UnknownRequest(_)) => {
                            error!(pid, error = %e, "protocol violation; stopping server");
                            fatal = Some(e);
                            break;
                        }
                        Err(e) if e.is_transport() => warn!(pid, live, error = %e, "connection lost"),
                        Err(e) => warn!(pid, live, error = %e, "connection ended with error"),
                    }
                    if draining && workers.is_empty() {
                        break;
                    }
                }
                Event::Shutdown(ShutdownKind::Interrupt) => {
                    if !workers.is_empty() {
                        warn!(live = workers.len(), "shutdown refused: clients still connected");
                        continue;
                    }
                    if confirm() {
                        break;
                    }
                    info!("shutdown cancelled");
                }
                Event::Shutdown(ShutdownKind::Terminate) => {
                    if workers.is_empty() {
                        break;
                    }
                    info!(live = workers.len(), "terminating once live connections finish");
                    draining = true;
                    stop_accepting(&stop, local_addr);
                }
            }
        }

        stop_accepting(&stop, local_addr);
        if acceptor.join().is_err() {
            warn!("accept thread panicked");
        }
        state.locks().destroy();
        info!(addr = %local_addr, "server stopped");
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn accept_loop(listener: TcpListener, stop: Arc<AtomicBool>, tx: Sender<Event>) {
    for conn in listener.incoming() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let stream = match conn {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let peer = match stream.peer_addr() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "accepted connection has no peer address");
                continue;
            }
        };
        if tx.send(Event::Accepted { stream, peer }).is_err() {
            break;
        }
    }
    debug!("accept loop stopped");
}

/// Flag the accept loop and wake it with a throwaway connection.
fn stop_accepting(stop: &AtomicBool, addr: SocketAddr) {
    if stop.swap(true, Ordering::AcqRel) {
        return;
    }
    let mut wake = addr;
    if wake.ip().is_unspecified() {
        wake.set_ip(match wake.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
        });
    }
    if let Err(e) = TcpStream::connect_timeout(&wake, Duration::from_secs(1)) {
        warn!(addr = %wake, error = %e, "could not wake accept loop");
    }
}

fn spawn_handler(
    id: u64,
    stream: TcpStream,
    peer: SocketAddr,
    state: &Arc<ServerState>,
    tx: &Sender<Event>,
) -> io::Result<JoinHandle<()>> {
    let state = Arc::clone(state);
    let tx = tx.clone();
    thread::Builder::new()
        .name(format!("wsdb-conn-{id}"))
        .spawn(move || {
            let mut handler = ConnectionHandler::new(stream, peer.ip().to_string(), state);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler.run()))
                .unwrap_or_else(|_| Err(io::Error::other("connection handler panicked").into()));
            let pid = handler.client_pid();
            // Close the socket before reporting completion.
            drop(handler);
            let _ = tx.send(Event::Finished { id, pid, outcome });
        })
}
