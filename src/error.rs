// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Crate-wide error type. The OS-level primitives (`platform`, `shm`) speak
// `std::io::Result`; everything above them converts into `Error`.

use std::io;

use thiserror::Error;

/// Errors raised by the record database, its lock sets and the wire layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Any failure of the underlying file, shared memory or socket.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer closed the stream in the middle of, or before, a frame.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A request frame carried a code outside the protocol.
    #[error("unrecognized request code {0}")]
    UnknownRequest(i32),

    /// A record ordinal outside `1..=count`.
    #[error("record ordinal {ordinal} out of range (1..={count})")]
    OrdinalOutOfRange { ordinal: i64, count: u32 },

    /// A record field index outside `0..9`.
    #[error("field index {0} out of range")]
    InvalidField(usize),

    /// Every slot of the host's client registry is taken.
    #[error("client registry is full ({capacity} slots in use)")]
    RegistryFull { capacity: usize },

    /// The lock set was torn down by its last user while we waited on it.
    #[error("lock set '{name}' was removed")]
    LockSetRemoved { name: String },

    /// A lock index past the end of its lock set.
    #[error("lock index {index} out of range for a set of {len}")]
    LockIndex { index: usize, len: usize },

    /// The server answered with a negative acknowledgement.
    #[error("server refused request {0}")]
    Refused(i32),

    /// An environment override that does not parse.
    #[error("invalid value for {key}: '{value}'")]
    Config { key: String, value: String },
}

impl Error {
    /// Transport failures end the connection they happened on, nothing more.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
