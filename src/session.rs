// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client side of one connection: the requests behind each menu item.
//
// A session owns this process's registry slot. Every frame it sends or
// receives is counted against that slot.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::lock_set::ClientLock;
use crate::oplog::OpLog;
use crate::proto::message::{LogLine, Message, RequestCode, DISPLAY_ALL, MODIFY_ORDINAL_SLOT};
use crate::record::{Record, RECORD_FIELDS};
use crate::registry::{ClientEntry, ClientRegistry, Detach};

pub struct Session<S = TcpStream> {
    stream: S,
    pid: i32,
    registry: ClientRegistry,
    log: OpLog,
}

impl Session<TcpStream> {
    /// Attach to the host registry, open the client log and connect.
    ///
    /// A full registry fails here, before anything is sent to the server.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let pid = std::process::id() as i32;
        let registry = ClientRegistry::attach_as(&config.registry_key, pid)?;
        let log = OpLog::open(
            &config.log_path,
            Arc::clone(registry.locks()),
            ClientLock::LogWrite,
        )?;
        let stream = TcpStream::connect((config.server_addr.as_str(), config.port))?;
        info!(server = %config.server_addr, port = config.port, slot = registry.slot(), "connected");
        Self::start(stream, pid, registry, log)
    }
}

impl<S: Read + Write> Session<S> {
    /// Send the hello frame on an open stream and begin the session.
    pub fn start(stream: S, pid: i32, registry: ClientRegistry, log: OpLog) -> Result<Self> {
        let mut session = Self {
            stream,
            pid,
            registry,
            log,
        };
        session.send(&Message::new(pid))?;
        session.log_op("connected to server, waiting for user input")?;
        Ok(session)
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    fn log_op(&self, text: &str) -> Result<()> {
        self.log.append_line(&format!("PID: {} | {text}", self.pid))
    }

    fn send(&mut self, msg: &Message) -> Result<()> {
        msg.write_to(&mut self.stream)?;
        self.stream.flush()?;
        self.registry.record_activity()
    }

    fn recv(&mut self) -> Result<Message> {
        let msg = Message::read_from(&mut self.stream)?;
        self.registry.record_activity()?;
        Ok(msg)
    }

    /// Receive the answer to `code`, mapping a negative acknowledgement.
    fn recv_reply(&mut self, code: RequestCode) -> Result<Message> {
        let reply = self.recv()?;
        if reply.is_refusal() {
            return Err(Error::Refused(code.as_i32()));
        }
        Ok(reply)
    }

    /// Number of records on the server.
    pub fn count(&mut self) -> Result<u32> {
        self.send(&Message::request(self.pid, RequestCode::Count))?;
        let reply = self.recv()?;
        Ok(reply.request.max(0) as u32)
    }

    /// Append `record` on the server; returns the server's echo.
    pub fn create(&mut self, record: &Record) -> Result<Record> {
        let msg = Message::request(self.pid, RequestCode::Create).with_record(record);
        self.send(&msg)?;
        let reply = self.recv_reply(RequestCode::Create)?;
        self.log_op("created new record")?;
        Ok(reply.record())
    }

    /// Fetch one record without checking the ordinal first. The server
    /// refuses ordinals it does not hold.
    pub fn fetch(&mut self, ordinal: i32) -> Result<Record> {
        let mut msg = Message::request(self.pid, RequestCode::Display);
        msg.payload[0] = ordinal;
        self.send(&msg)?;
        Ok(self.recv_reply(RequestCode::Display)?.record())
    }

    /// Fetch record `ordinal` after checking it against the current count.
    pub fn display(&mut self, ordinal: i32) -> Result<Record> {
        let count = self.count()?;
        if ordinal < 1 || ordinal as i64 > count as i64 {
            return Err(Error::OrdinalOutOfRange {
                ordinal: ordinal as i64,
                count,
            });
        }
        let record = self.fetch(ordinal)?;
        self.log_op(&format!("requested to view record #{ordinal}"))?;
        Ok(record)
    }

    /// Every record, as many as the count taken just before the request.
    ///
    /// A record appended by another client between the two requests is
    /// left unread in the stream; callers that need exact results should
    /// reconnect after a display-all while others write.
    pub fn display_all(&mut self) -> Result<Vec<Record>> {
        let count = self.count()?;
        let mut msg = Message::request(self.pid, RequestCode::Display);
        msg.payload[0] = DISPLAY_ALL;
        self.send(&msg)?;
        let mut records = Vec::with_capacity(count as usize);
        for _ in 0..count {
            records.push(self.recv()?.record());
        }
        debug!(records = records.len(), "received all records");
        Ok(records)
    }

    /// Overwrite record `ordinal` with `record`; returns the server's echo.
    pub fn replace(&mut self, ordinal: i32, record: &Record) -> Result<Record> {
        let mut msg = Message::request(self.pid, RequestCode::Modify).with_record(record);
        msg.payload[MODIFY_ORDINAL_SLOT] = ordinal - 1;
        self.send(&msg)?;
        let reply = self.recv_reply(RequestCode::Modify)?;
        self.log_op(&format!("modified record #{ordinal}"))?;
        Ok(reply.record())
    }

    /// Change one field of record `ordinal`, leaving the others as stored.
    pub fn modify(&mut self, ordinal: i32, field: usize, value: i32) -> Result<Record> {
        if field >= RECORD_FIELDS {
            return Err(Error::InvalidField(field));
        }
        let updated = self.display(ordinal)?.with_field(field, value)?;
        self.replace(ordinal, &updated)
    }

    /// The server's operation log, oldest line first.
    pub fn show_log(&mut self) -> Result<Vec<String>> {
        self.send(&Message::request(self.pid, RequestCode::ShowLog))?;
        let n = self.recv()?.request.max(0) as usize;
        let mut lines = Vec::with_capacity(n);
        for _ in 0..n {
            let line = LogLine::read_from(&mut self.stream)?;
            self.registry.record_activity()?;
            lines.push(line.text());
        }
        self.log_op("displayed server's log file")?;
        Ok(lines)
    }

    /// The clients connected from this host. No network traffic.
    pub fn clients(&self) -> Result<Vec<ClientEntry>> {
        self.registry.snapshot()
    }

    /// Say goodbye to the server and give up the registry slot. The last
    /// client on the host removes the registry and its lock set.
    pub fn disconnect(mut self) -> Result<Detach> {
        self.log_op("disconnecting from server")?;
        self.send(&Message::request(self.pid, RequestCode::Disconnect))?;
        let Session { registry, log, .. } = self;
        drop(log);
        let outcome = registry.detach()?;
        info!(?outcome, "disconnected");
        Ok(outcome)
    }
}
