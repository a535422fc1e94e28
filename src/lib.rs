// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Multi-client record database over TCP. The server keeps fixed-size
// records in a flat binary file and serves them to one handler thread per
// connection; clients on the same host share a registry of who is
// connected. All cross-process coordination uses named lock sets built on
// POSIX shared memory and robust process-shared mutexes.

#[cfg(not(unix))]
compile_error!("wsdb needs POSIX shared memory and process-shared mutexes");

pub mod shm_name;

mod platform;

mod shm;
pub use shm::SharedSegment;

pub mod error;
pub use error::{Error, Result};

pub mod lock_set;
pub use lock_set::{ClientLock, LockId, LockSet, ServerLock, LOCKS_PER_SET};

mod scoped_access;
pub use scoped_access::ScopedAccess;

pub mod record;
pub use record::{Record, FIELD_NAMES, RECORD_FIELDS, RECORD_SIZE};

pub mod store;
pub use store::RecordStore;

pub mod oplog;
pub use oplog::OpLog;

pub mod registry;
pub use registry::{ClientEntry, ClientRegistry, Detach, MAX_CLIENTS};

pub mod proto;

pub mod config;
pub use config::{ClientConfig, ServerConfig, DEFAULT_PORT};

pub mod supervisor;
pub use supervisor::{ShutdownHandle, ShutdownKind, Supervisor};

pub mod session;
pub use session::Session;
