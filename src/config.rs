// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Runtime settings for both binaries. Defaults can be overridden through
// WSDB_* environment variables; nothing is read from the command line.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::shm_name::{client_key, current_uid, server_key};

/// TCP port the server listens on and clients dial.
pub const DEFAULT_PORT: u16 = 15003;

/// Read `key` from the environment, parsed, or fall back to `default`.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| Error::Config {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub data_path: PathBuf,
    pub log_path: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            data_path: PathBuf::from("wsdb.bin"),
            log_path: PathBuf::from("log.ser"),
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `WSDB_BIND`, `WSDB_PORT`, `WSDB_DATA_FILE`
    /// and `WSDB_LOG_FILE`.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            bind_addr: env_or("WSDB_BIND", d.bind_addr)?,
            port: env_or("WSDB_PORT", d.port)?,
            data_path: env_or("WSDB_DATA_FILE", d.data_path)?,
            log_path: env_or("WSDB_LOG_FILE", d.log_path)?,
        })
    }

    /// Key of the server's lock set; one per listening port.
    pub fn lock_key(&self) -> String {
        server_key(self.port)
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_addr: String,
    pub port: u16,
    pub log_path: PathBuf,
    /// Key of the host registry and client lock set, shared by every
    /// client the same user runs on this host.
    pub registry_key: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            log_path: PathBuf::from("log.cli"),
            registry_key: client_key(current_uid()),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `WSDB_SERVER`, `WSDB_PORT` and `WSDB_CLIENT_LOG`.
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            server_addr: env_or("WSDB_SERVER", d.server_addr)?,
            port: env_or("WSDB_PORT", d.port)?,
            log_path: env_or("WSDB_CLIENT_LOG", d.log_path)?,
            registry_key: d.registry_key,
        })
    }
}
