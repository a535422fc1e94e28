// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Server side of one connection: AWAIT_HELLO → SERVING → CLOSED.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::lock_set::{LockSet, ServerLock};
use crate::oplog::OpLog;
use crate::proto::message::{LogLine, Message, RequestCode, DISPLAY_ALL, MODIFY_ORDINAL_SLOT};
use crate::store::RecordStore;

// ---------------------------------------------------------------------------
// ServerState
// ---------------------------------------------------------------------------

/// Everything the connection handlers of one server share.
pub struct ServerState {
    pub store: RecordStore,
    pub log: OpLog,
    locks: Arc<LockSet>,
}

impl ServerState {
    /// Open the data file and the server log under `locks`.
    pub fn open(
        data_path: impl AsRef<Path>,
        log_path: impl AsRef<Path>,
        locks: Arc<LockSet>,
    ) -> Result<Self> {
        let store = RecordStore::open(data_path, Arc::clone(&locks))?;
        let log = OpLog::open(log_path, Arc::clone(&locks), ServerLock::LogWriter)?;
        Ok(Self { store, log, locks })
    }

    pub fn locks(&self) -> &Arc<LockSet> {
        &self.locks
    }

    /// Append one entry to the server operation log.
    pub fn log_op(&self, pid: i32, operation: &str) -> Result<()> {
        self.log
            .append_line(&format!("Client PID: {pid} | Operation: {operation}"))
    }
}

// ---------------------------------------------------------------------------
// ConnectionHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    AwaitHello,
    Serving,
    Closed,
}

/// Runs the request loop of one accepted connection.
pub struct ConnectionHandler<S> {
    stream: S,
    peer: String,
    client_pid: i32,
    state: HandlerState,
    server: Arc<ServerState>,
}

impl<S: Read + Write> ConnectionHandler<S> {
    pub fn new(stream: S, peer: impl Into<String>, server: Arc<ServerState>) -> Self {
        Self {
            stream,
            peer: peer.into(),
            client_pid: 0,
            state: HandlerState::AwaitHello,
            server,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Pid the client announced in its hello frame (0 before that).
    pub fn client_pid(&self) -> i32 {
        self.client_pid
    }

    /// Serve until the client disconnects or the connection fails. Either
    /// way the handler ends `Closed`; an `Err` names what ended it.
    pub fn run(&mut self) -> Result<()> {
        let result = self.serve();
        self.state = HandlerState::Closed;
        result
    }

    fn serve(&mut self) -> Result<()> {
        let hello = Message::read_from(&mut self.stream)?;
        self.client_pid = hello.sender;
        info!(pid = self.client_pid, peer = %self.peer, "client connected");
        self.server
            .log_op(self.client_pid, &format!("connected from [{}]", self.peer))?;
        self.state = HandlerState::Serving;

        loop {
            let msg = Message::read_from(&mut self.stream)?;
            let code = match msg.code() {
                Ok(code) => code,
                Err(e) => {
                    error!(pid = self.client_pid, request = msg.request, "client sent invalid request number");
                    return Err(e);
                }
            };
            if code == RequestCode::Disconnect {
                info!(pid = self.client_pid, "client requests disconnect");
                return self.server.log_op(msg.sender, "client disconnected");
            }
            self.dispatch(code, msg)?;
        }
    }

    fn dispatch(&mut self, code: RequestCode, msg: Message) -> Result<()> {
        debug!(pid = msg.sender, ?code, "received request");
        match code {
            RequestCode::Create => {
                self.server.log_op(msg.sender, "requesting to create record")?;
                self.create(msg)
            }
            RequestCode::Display => {
                self.server.log_op(msg.sender, "requesting to display records")?;
                self.display(msg)
            }
            RequestCode::Modify => {
                self.server.log_op(msg.sender, "requesting to modify record")?;
                self.modify(msg)
            }
            RequestCode::ShowLog => {
                self.server.log_op(msg.sender, "requesting to send log file")?;
                self.show_log(msg)
            }
            RequestCode::Count => {
                self.server.log_op(msg.sender, "requesting number of records")?;
                self.send_count()
            }
            RequestCode::Disconnect => Ok(()),
        }
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        msg.write_to(&mut self.stream)?;
        self.stream.flush()?;
        Ok(())
    }

    fn refuse(&mut self, err: Error) -> Result<()> {
        warn!(pid = self.client_pid, error = %err, "refusing request");
        self.send(&Message::new(self.client_pid))
    }

    fn create(&mut self, msg: Message) -> Result<()> {
        self.server.log_op(msg.sender, "creating new record")?;
        let ordinal = self.server.store.append(&msg.record())?;
        debug!(pid = msg.sender, ordinal, "record created");
        self.send(&msg)?;
        self.server.log_op(msg.sender, "sent record-created confirmation")
    }

    fn send_count(&mut self) -> Result<()> {
        let n = self.server.store.count()?;
        debug!(pid = self.client_pid, records = n, "sending record count");
        let mut reply = Message::new(self.client_pid);
        reply.request = n as i32;
        self.send(&reply)?;
        self.server.log_op(self.client_pid, "sending number of records")
    }

    fn display(&mut self, msg: Message) -> Result<()> {
        let ordinal = msg.payload[0];
        if ordinal == DISPLAY_ALL {
            self.server.log_op(msg.sender, "sending ALL records to client")?;
            for record in self.server.store.read_all()? {
                self.send(&msg.with_record(&record))?;
            }
            return Ok(());
        }

        self.server.log_op(msg.sender, "sending 1 record to client")?;
        match self.server.store.read_at(ordinal as i64) {
            Ok(record) => self.send(&msg.with_record(&record)),
            Err(e @ Error::OrdinalOutOfRange { .. }) => self.refuse(e),
            Err(e) => Err(e),
        }
    }

    fn modify(&mut self, msg: Message) -> Result<()> {
        let ordinal = msg.payload[MODIFY_ORDINAL_SLOT] as i64 + 1;
        self.server.log_op(msg.sender, "modifying record")?;
        match self.server.store.overwrite_at(ordinal, &msg.record()) {
            Ok(()) => {}
            Err(e @ Error::OrdinalOutOfRange { .. }) => return self.refuse(e),
            Err(e) => return Err(e),
        }
        self.send(&msg)?;
        self.server.log_op(msg.sender, "sent record-modified confirmation")
    }

    fn show_log(&mut self, msg: Message) -> Result<()> {
        // Two locked passes: a line appended in between is not streamed,
        // since the log only grows and the first `count` lines are stable.
        let count = self.server.log.line_count()?;
        debug!(pid = msg.sender, lines = count, "sending log messages");
        let mut reply = msg;
        reply.request = count as i32;
        self.send(&reply)?;

        let lines = self.server.log.read_all_lines()?;
        for line in lines.iter().take(count) {
            LogLine::new(self.client_pid, line).write_to(&mut self.stream)?;
        }
        self.stream.flush()?;
        self.server
            .log_op(msg.sender, &format!("sent {count} log messages"))
    }
}
